// SPDX-License-Identifier: GPL-3.0-only

use serde::{Deserialize, Serialize};
use storage_types::{UsedBy, UsedByKind};

/// Identity, size and ownership flags shared by containers and volumes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub name: String,
    pub device: String,
    pub size_k: u64,
    pub major: u32,
    pub minor: u32,
    pub created: bool,
    pub deleted: bool,
    /// Runtime only; not part of device content when graphs are compared.
    #[serde(skip)]
    pub silent: bool,
    pub used_by: Vec<UsedBy>,
    pub alt_names: Vec<String>,
}

impl Device {
    pub fn new(name: impl Into<String>, device: impl Into<String>, size_k: u64) -> Self {
        Self {
            name: name.into(),
            device: device.into(),
            size_k,
            major: 0,
            minor: 0,
            created: false,
            deleted: false,
            silent: false,
            used_by: Vec::new(),
            alt_names: Vec::new(),
        }
    }

    /// Whether `path` names this device by its name, node or a udev link.
    pub fn matches(&self, path: &str) -> bool {
        self.device == path || self.name == path || self.alt_names.iter().any(|a| a == path)
    }

    pub fn is_used(&self) -> bool {
        !self.used_by.is_empty()
    }

    pub fn is_used_by(&self, kind: UsedByKind) -> bool {
        self.used_by.iter().any(|u| u.kind == kind)
    }

    pub fn add_used_by(&mut self, edge: UsedBy) {
        if !self.used_by.contains(&edge) {
            self.used_by.push(edge);
        }
    }

    pub fn remove_used_by(&mut self, edge: &UsedBy) {
        self.used_by.retain(|u| u != edge);
    }

    pub fn major_minor(&self) -> String {
        format!("{}:{}", self.major, self.minor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_alternate_names() {
        let mut dev = Device::new("sda1", "/dev/sda1", 1024);
        dev.alt_names.push("/dev/disk/by-id/ata-X-part1".to_string());
        assert!(dev.matches("/dev/sda1"));
        assert!(dev.matches("sda1"));
        assert!(dev.matches("/dev/disk/by-id/ata-X-part1"));
        assert!(!dev.matches("/dev/sda2"));
    }

    #[test]
    fn used_by_edges_are_a_set() {
        let mut dev = Device::new("sda2", "/dev/sda2", 1024);
        dev.add_used_by(UsedBy::new(UsedByKind::Lvm, "/dev/system"));
        dev.add_used_by(UsedBy::new(UsedByKind::Lvm, "/dev/system"));
        assert_eq!(dev.used_by.len(), 1);
        assert!(dev.is_used_by(UsedByKind::Lvm));
        dev.remove_used_by(&UsedBy::new(UsedByKind::Lvm, "/dev/system"));
        assert!(!dev.is_used());
    }
}
