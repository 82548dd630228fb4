// SPDX-License-Identifier: GPL-3.0-only

use serde::{Deserialize, Serialize};

use crate::ToolError;

/// One fstab line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FstabEntry {
    /// Device spec as written (`/dev/sda1`, `UUID=...`, `LABEL=...`)
    pub device: String,
    pub mount: String,
    pub fs: String,
    pub options: Vec<String>,
    pub freq: u32,
    pub passno: u32,
}

impl FstabEntry {
    pub fn new(device: impl Into<String>, mount: impl Into<String>, fs: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            mount: mount.into(),
            fs: fs.into(),
            options: vec!["defaults".to_string()],
            freq: 0,
            passno: 0,
        }
    }

    pub fn options_string(&self) -> String {
        if self.options.is_empty() {
            "defaults".to_string()
        } else {
            self.options.join(",")
        }
    }

    pub fn has_option(&self, option: &str) -> bool {
        self.options.iter().any(|o| o == option)
    }
}

/// Mount table (fstab) reader/writer.
///
/// Edits are kept in memory until `flush`, which rewrites the file
/// atomically.
pub trait MountTable {
    fn entries(&self) -> Vec<FstabEntry>;

    fn find_by_mount(&self, mount: &str) -> Option<FstabEntry> {
        self.entries().into_iter().find(|e| e.mount == mount)
    }

    /// Insert or replace the entry for `entry.mount`, or for `old_mount` when
    /// the mount point itself moves.
    fn upsert(&mut self, old_mount: Option<&str>, entry: FstabEntry);

    /// Drop the entry for `mount`. Returns false when none existed.
    fn remove(&mut self, mount: &str) -> bool;

    fn flush(&mut self) -> Result<(), ToolError>;
}
