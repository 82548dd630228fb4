// SPDX-License-Identifier: GPL-3.0-only

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure class reported by a collaborator.
///
/// Parse failures are kept apart from execution failures so callers can
/// tell "the tool failed" from "we could not read what the tool said".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolErrorKind {
    /// The command could not be spawned or exited non-zero.
    Exec,
    /// Output could not be parsed.
    Parse,
    /// Bounded command exceeded its time or line budget and was killed.
    Timeout,
    /// Reading or writing a persisted file failed.
    Io,
    /// The tool is not installed.
    Unavailable,
}

impl ToolErrorKind {
    pub fn code(self) -> u16 {
        match self {
            Self::Exec => 500,
            Self::Parse => 422,
            Self::Timeout => 504,
            Self::Io => 507,
            Self::Unavailable => 503,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind:?}: {message}")]
pub struct ToolError {
    pub kind: ToolErrorKind,
    pub message: String,
}

impl ToolError {
    pub fn new(kind: ToolErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn exec(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::Exec, message)
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::Parse, message)
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::Io, message)
    }
}

impl From<std::io::Error> for ToolError {
    fn from(error: std::io::Error) -> Self {
        Self::io(error.to_string())
    }
}
