// SPDX-License-Identifier: GPL-3.0-only

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::Result;

/// Pseudo filesystems that never back a block device.
const VIRTUAL_FS_TYPES: &[&str] = &[
    "autofs",
    "binfmt_misc",
    "bpf",
    "cgroup",
    "cgroup2",
    "configfs",
    "debugfs",
    "devpts",
    "devtmpfs",
    "efivarfs",
    "fusectl",
    "hugetlbfs",
    "mqueue",
    "nsfs",
    "overlay",
    "proc",
    "pstore",
    "ramfs",
    "rpc_pipefs",
    "securityfs",
    "selinuxfs",
    "sysfs",
    "tmpfs",
    "tracefs",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountRecord {
    pub device: String,
    pub mount_point: String,
    pub fs: String,
    pub options: Vec<String>,
}

/// Block-device mounts from `/proc/mounts`-formatted text.
pub fn parse_proc_mounts(input: &str) -> Vec<MountRecord> {
    input
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let device = fields.next()?;
            let mount_point = fields.next()?;
            let fs = fields.next()?;
            let options = fields.next().unwrap_or("defaults");
            if VIRTUAL_FS_TYPES.contains(&fs) || !device.starts_with('/') {
                return None;
            }
            Some(MountRecord {
                device: unescape_mount_field(device),
                mount_point: unescape_mount_field(mount_point),
                fs: fs.to_string(),
                options: options.split(',').map(ToString::to_string).collect(),
            })
        })
        .collect()
}

/// Active swap devices and files from `/proc/swaps`.
pub fn parse_proc_swaps(input: &str) -> Vec<String> {
    input
        .lines()
        .skip_while(|line| line.starts_with("Filename"))
        .filter_map(|line| line.split_whitespace().next())
        .map(unescape_mount_field)
        .collect()
}

pub fn read_mounts(path: &Path) -> Result<Vec<MountRecord>> {
    Ok(parse_proc_mounts(&fs::read_to_string(path)?))
}

pub fn read_swaps(path: &Path) -> Result<Vec<String>> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(parse_proc_swaps(&content)),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(error) => Err(error.into()),
    }
}

/// Decode the `\ooo` octal escapes the kernel and fstab use for blanks.
pub fn unescape_mount_field(value: &str) -> String {
    let mut output = String::with_capacity(value.len());
    let bytes = value.as_bytes();
    let mut index = 0;

    while index < bytes.len() {
        if bytes[index] == b'\\'
            && index + 3 < bytes.len()
            && bytes[index + 1].is_ascii_digit()
            && bytes[index + 2].is_ascii_digit()
            && bytes[index + 3].is_ascii_digit()
        {
            if let Ok(num) = u8::from_str_radix(&value[index + 1..index + 4], 8) {
                output.push(num as char);
                index += 4;
                continue;
            }
        }

        output.push(bytes[index] as char);
        index += 1;
    }

    output
}
