// SPDX-License-Identifier: GPL-3.0-only

use serde::{Deserialize, Serialize};
use storage_contracts::{CommandLine, CommandRunner};

use crate::{Result, SysError, run_capture};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BtrfsDevice {
    pub device: String,
    pub size_k: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BtrfsRecord {
    pub label: Option<String>,
    pub uuid: String,
    pub used_k: Option<u64>,
    pub devices: Vec<BtrfsDevice>,
}

impl BtrfsRecord {
    pub fn size_k(&self) -> u64 {
        self.devices.iter().map(|d| d.size_k).sum()
    }
}

pub fn show_command() -> CommandLine {
    CommandLine::new("btrfs").args(["filesystem", "show", "--raw"])
}

pub fn subvolume_list_command(mount_point: &str) -> CommandLine {
    CommandLine::new("btrfs").args(["subvolume", "list", mount_point])
}

/// Parse `btrfs filesystem show --raw`; byte counts become KiB.
pub fn parse_btrfs_show(lines: &[String]) -> Result<Vec<BtrfsRecord>> {
    let mut filesystems = Vec::new();
    let mut current: Option<BtrfsRecord> = None;

    for line in lines {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if line.starts_with("Label:") {
            if let Some(previous) = current.take() {
                filesystems.push(previous);
            }

            let label = line
                .split("Label:")
                .nth(1)
                .and_then(|rest| rest.split("uuid:").next())
                .map(str::trim)
                .map(|value| value.trim_matches('\''))
                .filter(|value| !value.is_empty() && *value != "none")
                .map(ToString::to_string);

            let raw_uuid = line.split("uuid:").nth(1).map(str::trim).unwrap_or_default();
            let uuid = uuid::Uuid::parse_str(raw_uuid)
                .map_err(|e| SysError::parse("btrfs", format!("bad uuid '{raw_uuid}': {e}")))?;

            current = Some(BtrfsRecord {
                label,
                uuid: uuid.hyphenated().to_string(),
                used_k: None,
                devices: Vec::new(),
            });

            continue;
        }

        if let Some(current_fs) = current.as_mut() {
            if line.starts_with("Total devices")
                && let Some(used_fragment) = line.split("FS bytes used").nth(1)
            {
                current_fs.used_k = parse_first_u64(used_fragment).map(|b| b / 1024);
                continue;
            }

            if line.starts_with("devid") {
                let path = line
                    .split(" path ")
                    .nth(1)
                    .map(str::trim)
                    .unwrap_or_default()
                    .to_string();

                let size = line
                    .split(" size ")
                    .nth(1)
                    .and_then(parse_first_u64)
                    .unwrap_or(0);

                if !path.is_empty() {
                    current_fs.devices.push(BtrfsDevice {
                        device: path,
                        size_k: size / 1024,
                    });
                }
            }
        }
    }

    if let Some(last) = current {
        filesystems.push(last);
    }

    Ok(filesystems)
}

/// Subvolume paths from `btrfs subvolume list`.
pub fn parse_subvolume_list(lines: &[String]) -> Vec<String> {
    lines
        .iter()
        .filter_map(|line| line.split_once(" path ").map(|(_, path)| path.trim().to_string()))
        .filter(|path| !path.is_empty())
        .collect()
}

fn parse_first_u64(input: &str) -> Option<u64> {
    let digits: String = input
        .chars()
        .skip_while(|character| !character.is_ascii_digit())
        .take_while(|character| character.is_ascii_digit())
        .collect();

    if digits.is_empty() {
        None
    } else {
        digits.parse().ok()
    }
}

pub fn probe_btrfs(runner: &mut dyn CommandRunner) -> Result<Vec<BtrfsRecord>> {
    if !cfg!(feature = "btrfs-tools") {
        return Ok(Vec::new());
    }

    if runner.executes() && which::which("btrfs").is_err() {
        return Ok(Vec::new());
    }

    parse_btrfs_show(&run_capture(runner, &show_command())?)
}

pub fn probe_subvolumes(runner: &mut dyn CommandRunner, mount_point: &str) -> Result<Vec<String>> {
    Ok(parse_subvolume_list(&run_capture(
        runner,
        &subvolume_list_command(mount_point),
    )?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(text: &str) -> Vec<String> {
        text.lines().map(ToString::to_string).collect()
    }

    #[test]
    fn parses_btrfs_show_output() {
        let parsed = parse_btrfs_show(&lines(
            "Label: 'rootfs'  uuid: 0b5e3ec4-6e32-4b8f-a3a4-3a6b7e1c2d90\n\
             \tTotal devices 2 FS bytes used 1048576\n\
             \tdevid    1 size 4194304 used 1048576 path /dev/sda2\n\
             \tdevid    2 size 4194304 used 0 path /dev/sdb2\n",
        ))
        .expect("show");

        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].label.as_deref(), Some("rootfs"));
        assert_eq!(parsed[0].uuid, "0b5e3ec4-6e32-4b8f-a3a4-3a6b7e1c2d90");
        assert_eq!(parsed[0].devices.len(), 2);
        assert_eq!(parsed[0].used_k, Some(1024));
        assert_eq!(parsed[0].size_k(), 8192);
    }

    #[test]
    fn rejects_garbled_uuid() {
        let err = parse_btrfs_show(&lines("Label: none  uuid: not-a-uuid\n")).expect_err("uuid");
        assert!(matches!(err, SysError::Parse { tool: "btrfs", .. }));
    }

    #[test]
    fn lists_subvolume_paths() {
        let paths = parse_subvolume_list(&lines(
            "ID 256 gen 8 top level 5 path @\nID 257 gen 9 top level 256 path @/home\n",
        ));
        assert_eq!(paths, vec!["@".to_string(), "@/home".to_string()]);
    }
}
