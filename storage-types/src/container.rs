// SPDX-License-Identifier: GPL-3.0-only

//! Container kinds and used-by relations

use std::fmt;

use serde::{Deserialize, Serialize};

/// Kind tag of a container.
///
/// The declaration order is significant: commit ordering compares kinds,
/// so disks come before RAID, RAID before loop files, and so on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerKind {
    Disk,
    Md,
    Loop,
    Lvm,
    Dm,
    Btrfs,
}

impl ContainerKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disk => "disk",
            Self::Md => "md",
            Self::Loop => "loop",
            Self::Lvm => "lvm",
            Self::Dm => "dm",
            Self::Btrfs => "btrfs",
        }
    }

    /// Containers of this kind own volumes carved out of extents.
    pub fn is_extent_based(self) -> bool {
        matches!(self, Self::Lvm)
    }
}

impl fmt::Display for ContainerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of consumer sitting on top of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsedByKind {
    Lvm,
    Md,
    Dm,
    Btrfs,
}

impl UsedByKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Lvm => "lvm",
            Self::Md => "md",
            Self::Dm => "dm",
            Self::Btrfs => "btrfs",
        }
    }
}

impl fmt::Display for UsedByKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A used-by edge: the consumer's kind and device (or VG name, or fs uuid).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UsedBy {
    pub kind: UsedByKind,
    pub device: String,
}

impl UsedBy {
    pub fn new(kind: UsedByKind, device: impl Into<String>) -> Self {
        Self {
            kind,
            device: device.into(),
        }
    }
}

impl fmt::Display for UsedBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.kind, self.device)
    }
}

/// Snapshot of a container for reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerInfo {
    pub kind: ContainerKind,
    pub name: String,
    pub device: String,
    pub size_k: u64,
    pub readonly: bool,
    pub created: bool,
    pub deleted: bool,
    pub used_by: Vec<UsedBy>,
    pub volumes: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn container_kinds_order_for_commit() {
        assert!(ContainerKind::Disk < ContainerKind::Md);
        assert!(ContainerKind::Md < ContainerKind::Loop);
        assert!(ContainerKind::Loop < ContainerKind::Lvm);
        assert!(ContainerKind::Lvm < ContainerKind::Btrfs);
    }

    #[test]
    fn used_by_roundtrips() {
        let edge = UsedBy::new(UsedByKind::Lvm, "/dev/system");
        let json = serde_json::to_string(&edge).expect("serialize edge");
        let parsed: UsedBy = serde_json::from_str(&json).expect("deserialize edge");
        assert_eq!(parsed, edge);
        assert_eq!(edge.to_string(), "lvm[/dev/system]");
    }
}
