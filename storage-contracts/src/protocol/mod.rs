// SPDX-License-Identifier: GPL-3.0-only

pub mod command;
pub mod error;

pub use command::{CommandLine, CommandOutput, ExecMode};
pub use error::{ToolError, ToolErrorKind};
