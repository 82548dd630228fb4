// SPDX-License-Identifier: GPL-3.0-only

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use storage_engine::EngineConfig;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/storage-planner.toml";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoggingLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LoggingLevel {
    pub fn as_directive(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }

    /// One step more verbose per `-v`.
    pub fn raised(self, steps: u8) -> Self {
        let mut level = self;
        for _ in 0..steps {
            level = match level {
                Self::Error => Self::Warn,
                Self::Warn => Self::Info,
                Self::Info => Self::Debug,
                Self::Debug | Self::Trace => Self::Trace,
            };
        }
        level
    }
}

/// Front end settings plus the engine's own table.
///
/// ```toml
/// log_level = "debug"
/// log_to_file = true
///
/// [engine]
/// recursive_removal = true
/// default_mount_by = "uuid"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    pub log_level: LoggingLevel,
    pub log_to_file: bool,
    /// Overrides the state directory the daily log files go to.
    pub log_dir: Option<PathBuf>,
    pub engine: EngineConfig,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            log_level: LoggingLevel::Info,
            log_to_file: false,
            log_dir: None,
            engine: EngineConfig::default(),
        }
    }
}

impl CliConfig {
    /// Read `path`, or the system file when none is given. A missing
    /// system file means defaults; a missing explicit file is an error.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let (path, explicit) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (PathBuf::from(DEFAULT_CONFIG_PATH), false),
        };
        match fs::read_to_string(&path) {
            Ok(text) => Self::parse(&text)
                .with_context(|| format!("invalid configuration in {}", path.display())),
            Err(e) if e.kind() == ErrorKind::NotFound && !explicit => Ok(Self::default()),
            Err(e) => Err(e).with_context(|| format!("cannot read {}", path.display())),
        }
    }

    pub fn parse(text: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use storage_types::MountBy;

    #[test]
    fn empty_file_gives_defaults() {
        let config = CliConfig::parse("").expect("parse");
        assert_eq!(config, CliConfig::default());
        assert_eq!(config.log_level.as_directive(), "info");
        assert!(!config.engine.recursive_removal);
    }

    #[test]
    fn engine_table_is_read() {
        let config = CliConfig::parse(
            r#"
log_level = "debug"

[engine]
recursive_removal = true
default_mount_by = "uuid"
root_prefix = "/mnt"
"#,
        )
        .expect("parse");
        assert_eq!(config.log_level, LoggingLevel::Debug);
        assert!(config.engine.recursive_removal);
        assert_eq!(config.engine.default_mount_by, MountBy::Uuid);
        assert_eq!(config.engine.prefixed("/etc/fstab"), "/mnt/etc/fstab");
    }

    #[test]
    fn unknown_level_is_rejected() {
        assert!(CliConfig::parse("log_level = \"loud\"").is_err());
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let missing = Path::new("/nonexistent/storage-planner.toml");
        assert!(CliConfig::load(Some(missing)).is_err());
    }

    #[test]
    fn verbosity_saturates_at_trace() {
        assert_eq!(LoggingLevel::Warn.raised(1), LoggingLevel::Info);
        assert_eq!(LoggingLevel::Info.raised(5), LoggingLevel::Trace);
    }
}
