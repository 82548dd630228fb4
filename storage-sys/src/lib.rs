// SPDX-License-Identifier: GPL-3.0-only

//! Host-facing collaborators for the storage planner
//!
//! This crate holds everything that touches the running system:
//! - Command execution (`SystemCmd`) and its dry-run twin (`RecordingRunner`)
//! - Fact parsers for parted, LVM, mdadm, btrfs, dmsetup, losetup and dasdview
//! - `/etc/fstab` and `mdadm.conf` editing with atomic rewrite
//! - The advisory instance lock
//! - In-memory stand-ins for the config files, used by dry runs
//!
//! Parsers take captured stdout lines and return plain records; turning
//! records into a device graph is the engine's job.

pub mod ascii_file;
pub mod cmd;
pub mod disk;
pub mod error;
pub mod fstab;
pub mod lock;
pub mod logical;
pub mod mdadm_conf;
pub mod memory;
pub mod mounts;

pub use ascii_file::AsciiFile;
pub use cmd::{RecordingRunner, SystemCmd, run_capture, tool_available};
pub use error::{Result, SysError};
pub use fstab::EtcFstab;
pub use lock::StorageLock;
pub use mdadm_conf::EtcMdadm;
pub use memory::{MemoryFstab, MemoryMdadm};
pub use mounts::{MountRecord, parse_proc_mounts, parse_proc_swaps};
