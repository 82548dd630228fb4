// SPDX-License-Identifier: GPL-3.0-only

//! Whole-disk discovery and partition-table parsers.

pub mod dasdview;
pub mod parted;

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::Result;

/// Block devices that are never partitionable disks.
const SKIPPED_PREFIXES: &[&str] = &["loop", "ram", "dm-", "md", "zram", "sr", "fd", "nbd"];

/// A disk as listed under `/sys/block`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskEntry {
    pub name: String,
    pub device: String,
    pub size_k: u64,
    pub readonly: bool,
    pub major: u32,
    pub minor: u32,
}

fn read_trimmed(path: &Path) -> Option<String> {
    fs::read_to_string(path).ok().map(|s| s.trim().to_string())
}

/// List disks from a sysfs `block` directory.
pub fn list_disks(sys_block: &Path) -> Result<Vec<DiskEntry>> {
    let mut disks = Vec::new();
    let entries = match fs::read_dir(sys_block) {
        Ok(entries) => entries,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(disks),
        Err(error) => return Err(error.into()),
    };

    for entry in entries {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        if SKIPPED_PREFIXES.iter().any(|p| name.starts_with(p)) {
            continue;
        }
        let dir = entry.path();
        let sectors: u64 = read_trimmed(&dir.join("size"))
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);
        if sectors == 0 {
            continue;
        }
        let (major, minor) = read_trimmed(&dir.join("dev"))
            .and_then(|dev| {
                let (major, minor) = dev.split_once(':')?;
                Some((major.parse().ok()?, minor.parse().ok()?))
            })
            .unwrap_or((0, 0));

        disks.push(DiskEntry {
            device: format!("/dev/{}", name.replace('!', "/")),
            name: name.replace('!', "/"),
            size_k: sectors / 2,
            readonly: read_trimmed(&dir.join("ro")).as_deref() == Some("1"),
            major,
            minor,
        });
    }

    disks.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(disks)
}

/// `major:minor` → device node for every block device under a sysfs
/// `class/block` directory.
pub fn block_numbers(sys_class_block: &Path) -> Result<BTreeMap<String, String>> {
    let mut numbers = BTreeMap::new();
    let entries = match fs::read_dir(sys_class_block) {
        Ok(entries) => entries,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(numbers),
        Err(error) => return Err(error.into()),
    };
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().replace('!', "/");
        if let Some(dev) = read_trimmed(&entry.path().join("dev")) {
            numbers.insert(dev, format!("/dev/{name}"));
        }
    }
    Ok(numbers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicU64, Ordering};

    static COUNTER: AtomicU64 = AtomicU64::new(0);

    struct TempDir {
        path: PathBuf,
    }

    impl TempDir {
        fn new() -> Self {
            let unique = COUNTER.fetch_add(1, Ordering::Relaxed);
            let path = std::env::temp_dir().join(format!(
                "storage-sys-sysblock-{}-{unique}",
                std::process::id()
            ));
            fs::create_dir_all(&path).expect("create temp dir");
            Self { path }
        }

        fn disk(&self, name: &str, sectors: u64, dev: &str, ro: bool) {
            let dir = self.path.join(name);
            fs::create_dir_all(&dir).expect("disk dir");
            fs::write(dir.join("size"), format!("{sectors}\n")).expect("size");
            fs::write(dir.join("dev"), format!("{dev}\n")).expect("dev");
            fs::write(dir.join("ro"), if ro { "1\n" } else { "0\n" }).expect("ro");
        }
    }

    impl Drop for TempDir {
        fn drop(&mut self) {
            let _ = fs::remove_dir_all(&self.path);
        }
    }

    #[test]
    fn lists_partitionable_disks() {
        let temp = TempDir::new();
        temp.disk("sda", 2000, "8:0", false);
        temp.disk("cciss!c0d0", 4000, "104:0", true);
        temp.disk("loop0", 100, "7:0", false);
        temp.disk("sdb", 0, "8:16", false);

        let disks = list_disks(&temp.path).expect("list");
        assert_eq!(disks.len(), 2);
        assert_eq!(disks[0].device, "/dev/cciss/c0d0");
        assert!(disks[0].readonly);
        assert_eq!(disks[1].name, "sda");
        assert_eq!(disks[1].size_k, 1000);
        assert_eq!((disks[1].major, disks[1].minor), (8, 0));
    }

    #[test]
    fn maps_device_numbers() {
        let temp = TempDir::new();
        temp.disk("sda", 2000, "8:0", false);
        temp.disk("dm-0", 100, "253:0", false);
        let numbers = block_numbers(&temp.path).expect("numbers");
        assert_eq!(numbers.get("8:0").map(String::as_str), Some("/dev/sda"));
        assert_eq!(numbers.get("253:0").map(String::as_str), Some("/dev/dm-0"));
    }

    #[test]
    fn missing_sysfs_is_empty() {
        let disks = list_disks(Path::new("/nonexistent/sys/block")).expect("list");
        assert!(disks.is_empty());
    }
}
