// SPDX-License-Identifier: GPL-3.0-only

use storage_contracts::{ToolError, ToolErrorKind};
use thiserror::Error;

/// Error types for system-level operations
#[derive(Error, Debug)]
pub enum SysError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("{command} failed (exit {code}): {stderr}")]
    Exec {
        command: String,
        code: i32,
        stderr: String,
    },

    #[error("cannot parse {tool} output: {reason}")]
    Parse { tool: &'static str, reason: String },

    #[error("{command} killed after exceeding its budget")]
    Timeout { command: String },

    #[error("{path} is locked by process {pid}")]
    Locked { path: String, pid: i32 },

    #[error("Operation failed: {0}")]
    OperationFailed(String),
}

impl SysError {
    pub fn parse(tool: &'static str, reason: impl Into<String>) -> Self {
        Self::Parse {
            tool,
            reason: reason.into(),
        }
    }
}

impl From<ToolError> for SysError {
    fn from(error: ToolError) -> Self {
        match error.kind {
            ToolErrorKind::Timeout => SysError::Timeout {
                command: error.message,
            },
            ToolErrorKind::Parse => SysError::Parse {
                tool: "tool",
                reason: error.message,
            },
            _ => SysError::OperationFailed(error.message),
        }
    }
}

impl From<SysError> for ToolError {
    fn from(error: SysError) -> Self {
        let kind = match &error {
            SysError::Io(_) => ToolErrorKind::Io,
            SysError::Parse { .. } => ToolErrorKind::Parse,
            SysError::Timeout { .. } => ToolErrorKind::Timeout,
            SysError::DeviceNotFound(_) => ToolErrorKind::Unavailable,
            _ => ToolErrorKind::Exec,
        };
        ToolError::new(kind, error.to_string())
    }
}

/// Result type alias for system operations
pub type Result<T> = std::result::Result<T, SysError>;
