// SPDX-License-Identifier: GPL-3.0-only

//! Contracts between the planning engine and the host.
//!
//! The engine never spawns a process or touches a config file directly; it
//! goes through the traits defined here. `storage-sys` provides the real
//! implementations, tests provide recording fakes.

pub mod protocol;
pub mod traits;

pub use protocol::{CommandLine, CommandOutput, ExecMode, ToolError, ToolErrorKind};
pub use traits::{CommandRunner, FstabEntry, MountTable, RaidConfig};
