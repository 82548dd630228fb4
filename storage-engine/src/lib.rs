// SPDX-License-Identifier: GPL-3.0-only

//! Storage topology planner and commit engine
//!
//! A [`Storage`] instance holds a graph of containers (disks, volume groups
//! and the md/loop/dm/btrfs pools) and the volumes they own. Requested
//! changes only mark pending state on that graph; [`Storage::commit`] turns
//! the pending state into ordered external-tool invocations:
//!
//! - **Decrease**: removals and shrinks, dependents first
//! - **Increase**: creations and extends, foundations first
//! - **Format**, **Mount** and **Fstab**: filesystem work on the result
//!
//! Nothing here runs a process directly. Commands go through the
//! `CommandRunner` contract, so a `RecordingRunner` gives an exact dry run.

pub mod allocator;
pub mod commit;
pub mod comparator;
pub mod config;
pub mod container;
pub mod device;
pub mod error;
pub mod graph;
pub mod kinds;
pub mod probe;
pub mod storage;
pub mod volume;

pub use allocator::{ExtentPool, ExtentUser, LvExtents, PeMap, PhysicalVolume};
pub use commit::{PlannedAction, Target, preview};
pub use comparator::{check_consistency, equal_content, log_difference};
pub use config::{BoundedCommand, EngineConfig};
pub use container::{Container, ContainerData, ContainerId};
pub use device::Device;
pub use error::{
    BtrfsError, DiskError, DmError, Error, FstabError, InternalError, LoopError, LvmError,
    MdError, PeError, Result, StorageError, VolumeError, status,
};
pub use graph::DeviceGraph;
pub use probe::{Facts, build_graph};
pub use storage::{Activation, Storage};
pub use volume::{Volume, VolumeData, VolumeId};
