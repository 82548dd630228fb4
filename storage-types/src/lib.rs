// SPDX-License-Identifier: GPL-3.0-only

//! Canonical domain models for the storage topology planner
//!
//! This crate holds the small, serializable vocabulary shared by every other
//! crate in the workspace:
//!
//! - **storage-sys**: parsers return records that use these enums
//! - **storage-engine**: the device graph is tagged with these kinds and
//!   reports its state through the `*Info` structs
//! - **storage-cli**: plan files and JSON output are (de)serialized from these
//!
//! ## Units
//!
//! All sizes are in KiB, matching what the planner and the external tools
//! exchange. `common::kib_to_pretty` renders them for humans.

pub mod commit;
pub mod common;
pub mod container;
pub mod filesystem;
pub mod lvm;
pub mod partition;
pub mod raid;
pub mod volume;

pub use commit::{CommitInfo, CommitStage};
pub use common::{GIB, KIB_PER_MIB, Region, TIB, kib_to_pretty, pretty_to_kib};
pub use container::{ContainerInfo, ContainerKind, UsedBy, UsedByKind};
pub use filesystem::{EncryptType, FsType, MountBy};
pub use lvm::{LogicalVolumeInfo, PhysicalVolumeInfo, VolumeGroupInfo};
pub use partition::{DiskLabel, PartitionId, PartitionInfo, PartitionType};
pub use raid::{MdLevel, MdParity, RaidInfo};
pub use volume::VolumeInfo;
