// SPDX-License-Identifier: GPL-3.0-only

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use storage_contracts::CommandLine;
use storage_types::{FsType, MountBy};

use crate::error::{InternalError, Result};

/// Ceilings for commands run in bounded mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoundedCommand {
    pub timeout_secs: u64,
    pub max_lines: usize,
}

impl Default for BoundedCommand {
    fn default() -> Self {
        Self {
            timeout_secs: 60,
            max_lines: 10_000,
        }
    }
}

impl BoundedCommand {
    pub fn apply(&self, command: CommandLine) -> CommandLine {
        command.bounded(Duration::from_secs(self.timeout_secs), self.max_lines)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Prefix for every path the planner writes or mounts below, used when
    /// installing into a target root.
    pub root_prefix: String,
    pub readonly: bool,
    /// Remove dependents of a used device instead of refusing.
    pub recursive_removal: bool,
    pub default_mount_by: MountBy,
    pub default_fs: FsType,
    /// Zero the first 200 KiB of new partitions.
    pub zero_new_partitions: bool,
    pub lock_path: PathBuf,
    pub fstab_path: PathBuf,
    pub mdadm_conf_path: PathBuf,
    pub tmp_dir: PathBuf,
    pub bounded_command: BoundedCommand,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            root_prefix: String::new(),
            readonly: false,
            recursive_removal: false,
            default_mount_by: MountBy::Device,
            default_fs: FsType::Ext4,
            zero_new_partitions: false,
            lock_path: PathBuf::from("/run/storage-planner.lock"),
            fstab_path: PathBuf::from("/etc/fstab"),
            mdadm_conf_path: PathBuf::from("/etc/mdadm.conf"),
            tmp_dir: std::env::temp_dir().join("storage-planner"),
            bounded_command: BoundedCommand::default(),
        }
    }
}

impl EngineConfig {
    /// Load from a TOML file; a missing file gives the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        match fs::read_to_string(path) {
            Ok(text) => Self::from_toml_str(&text),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("no config at {}, using defaults", path.display());
                Ok(Self::default())
            }
            Err(error) => {
                Err(InternalError::Config(format!("{}: {error}", path.display())).into())
            }
        }
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| InternalError::Config(e.to_string()).into())
    }

    /// `path` below the target root.
    pub fn prefixed(&self, path: &str) -> String {
        if self.root_prefix.is_empty() || self.root_prefix == "/" {
            path.to_string()
        } else if path == "/" {
            self.root_prefix.clone()
        } else {
            format!("{}{}", self.root_prefix.trim_end_matches('/'), path)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let config = EngineConfig::from_toml_str(
            "recursive_removal = true\ndefault_mount_by = \"uuid\"\n\n[bounded_command]\nmax_lines = 50\n",
        )
        .expect("config");
        assert!(config.recursive_removal);
        assert_eq!(config.default_mount_by, MountBy::Uuid);
        assert_eq!(config.bounded_command.max_lines, 50);
        assert_eq!(config.bounded_command.timeout_secs, 60);
        assert_eq!(config.fstab_path, PathBuf::from("/etc/fstab"));
    }

    #[test]
    fn missing_file_is_default() {
        let config = EngineConfig::load(Path::new("/nonexistent/storage-planner.toml")).expect("load");
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn bad_toml_is_config_error() {
        let error = EngineConfig::from_toml_str("readonly = 3").expect_err("type mismatch");
        assert_eq!(error.code(), -99003);
    }

    #[test]
    fn root_prefix_is_prepended() {
        let config = EngineConfig {
            root_prefix: "/mnt/".to_string(),
            ..EngineConfig::default()
        };
        assert_eq!(config.prefixed("/home"), "/mnt/home");
        assert_eq!(config.prefixed("/"), "/mnt/");
        assert_eq!(EngineConfig::default().prefixed("/home"), "/home");
    }
}
