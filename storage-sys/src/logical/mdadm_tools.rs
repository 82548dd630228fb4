// SPDX-License-Identifier: GPL-3.0-only

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use storage_contracts::{CommandLine, CommandRunner};
use storage_types::{MdLevel, MdParity};

use super::parse_size_k;
use crate::{Result, SysError, run_capture};

/// One `ARRAY` line of `mdadm --detail --scan`.
#[derive(Debug, Clone, PartialEq, Eq)]
struct MdArrayScan {
    device: String,
    name: Option<String>,
    uuid: Option<String>,
}

/// An active array as seen in `/proc/mdstat`, merged with its scan line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MdRecord {
    pub number: u32,
    pub device: String,
    pub level: MdLevel,
    pub parity: MdParity,
    pub members: Vec<String>,
    pub spares: Vec<String>,
    pub chunk_k: u64,
    pub size_k: u64,
    pub uuid: Option<String>,
    pub name: Option<String>,
    pub degraded: bool,
    pub readonly: bool,
}

pub fn scan_command() -> CommandLine {
    CommandLine::new("mdadm").args(["--detail", "--scan"])
}

pub fn detail_command(device: &str) -> CommandLine {
    CommandLine::new("mdadm").args(["--detail", "--export", device])
}

/// `MD_UUID` from `mdadm --detail --export`.
pub fn parse_detail_uuid(lines: &[String]) -> Option<String> {
    lines
        .iter()
        .find_map(|line| line.trim().strip_prefix("MD_UUID="))
        .map(ToString::to_string)
        .filter(|uuid| !uuid.is_empty())
}

fn parse_mdadm_scan(lines: &[String]) -> Vec<MdArrayScan> {
    lines
        .iter()
        .filter_map(|line| {
            let line = line.trim();
            if !line.starts_with("ARRAY ") {
                return None;
            }

            let mut parts = line.split_whitespace();
            let _array = parts.next()?;
            let device = parts.next()?.to_string();

            let mut name = None;
            let mut uuid = None;
            for token in parts {
                if let Some(value) = token.strip_prefix("name=") {
                    name = Some(value.to_string());
                }
                if let Some(value) = token.strip_prefix("UUID=") {
                    uuid = Some(value.to_string());
                }
            }

            Some(MdArrayScan { device, name, uuid })
        })
        .collect()
}

fn parity_from_algorithm(algorithm: u32) -> MdParity {
    match algorithm {
        0 => MdParity::LeftAsymmetric,
        1 => MdParity::RightAsymmetric,
        2 => MdParity::LeftSymmetric,
        3 => MdParity::RightSymmetric,
        _ => MdParity::Default,
    }
}

/// Parse `/proc/mdstat`. The status line after each array header supplies
/// size, chunk, parity and health.
pub fn parse_proc_mdstat(input: &str) -> Result<Vec<MdRecord>> {
    let mut arrays: Vec<MdRecord> = Vec::new();

    for raw in input.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with("Personalities") || line.starts_with("unused") {
            continue;
        }

        if line.starts_with("md") && line.contains(" : ") {
            let (head, rest) = line
                .split_once(" : ")
                .ok_or_else(|| SysError::parse("mdstat", line.to_string()))?;
            let number = head
                .trim_start_matches("md")
                .parse::<u32>()
                .map_err(|_| SysError::parse("mdstat", format!("bad array name '{head}'")))?;

            let parts: Vec<&str> = rest.split_whitespace().collect();
            let readonly = parts.iter().any(|p| p.contains("read-only"));
            let level = parts
                .iter()
                .find(|p| p.starts_with("raid") || **p == "multipath" || **p == "linear")
                .and_then(|p| p.parse::<MdLevel>().ok())
                .unwrap_or(MdLevel::Unknown);

            let mut members = Vec::new();
            let mut spares = Vec::new();
            for part in parts.iter().filter(|p| p.contains('[') && p.contains(']')) {
                let device = format!("/dev/{}", part.split('[').next().unwrap_or(part));
                if part.ends_with("(S)") {
                    spares.push(device);
                } else {
                    members.push(device);
                }
            }

            arrays.push(MdRecord {
                number,
                device: format!("/dev/md{number}"),
                level,
                parity: MdParity::Default,
                members,
                spares,
                chunk_k: 0,
                size_k: 0,
                uuid: None,
                name: None,
                degraded: false,
                readonly,
            });
            continue;
        }

        let Some(current) = arrays.last_mut() else {
            continue;
        };
        if !raw.starts_with(char::is_whitespace) {
            continue;
        }

        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.first() == Some(&"bitmap:") {
            continue;
        }
        if let Some(pos) = tokens.iter().position(|t| *t == "blocks")
            && pos > 0
            && current.size_k == 0
        {
            current.size_k = parse_size_k(tokens[pos - 1]).unwrap_or(0);
        }
        if let Some(pos) = tokens.iter().position(|t| t.starts_with("chunk"))
            && pos > 0
        {
            current.chunk_k = parse_size_k(tokens[pos - 1]).unwrap_or(0);
        }
        if let Some(pos) = tokens.iter().position(|t| *t == "algorithm")
            && let Some(value) = tokens.get(pos + 1)
            && let Ok(algorithm) = value.parse::<u32>()
        {
            current.parity = parity_from_algorithm(algorithm);
        }
        if let Some(health) = tokens
            .iter()
            .rev()
            .find(|t| t.starts_with('[') && t.ends_with(']') && !t.contains('/'))
        {
            current.degraded = health.contains('_');
        }
    }

    Ok(arrays)
}

fn merge_scan(mut arrays: Vec<MdRecord>, scan: Vec<MdArrayScan>) -> Vec<MdRecord> {
    let by_device: HashMap<String, MdArrayScan> =
        scan.into_iter().map(|s| (s.device.clone(), s)).collect();
    for array in &mut arrays {
        if let Some(found) = by_device.get(&array.device) {
            array.uuid = found.uuid.clone();
            array.name = found.name.clone();
        }
    }
    arrays
}

/// Probe active arrays from `mdstat_path` and enrich them with mdadm's scan.
pub fn probe_md(runner: &mut dyn CommandRunner, mdstat_path: &Path) -> Result<Vec<MdRecord>> {
    if !cfg!(feature = "md-tools") {
        return Ok(Vec::new());
    }

    let mdstat = std::fs::read_to_string(mdstat_path).unwrap_or_default();
    let arrays = parse_proc_mdstat(&mdstat)?;
    if arrays.is_empty() {
        return Ok(arrays);
    }

    let scan = if !runner.executes() || which::which("mdadm").is_ok() {
        run_capture(runner, &scan_command()).unwrap_or_default()
    } else {
        Vec::new()
    };
    Ok(merge_scan(arrays, parse_mdadm_scan(&scan)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detail_export_gives_uuid() {
        let lines: Vec<String> = ["MD_LEVEL=raid1", "MD_DEVICES=2", "MD_UUID=0a1b2c3d:4e5f6071:8293a4b5:c6d7e8f9"]
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(
            parse_detail_uuid(&lines).as_deref(),
            Some("0a1b2c3d:4e5f6071:8293a4b5:c6d7e8f9")
        );
        assert_eq!(parse_detail_uuid(&[]), None);
    }

    const MDSTAT: &str = "Personalities : [raid1] [raid6] [raid5] [raid4]\n\
md0 : active raid1 sdb1[1] sda1[0]\n      976630336 blocks super 1.2 [2/2] [UU]\n      bitmap: 0/8 pages [0KB], 65536KB chunk\n\n\
md1 : active raid5 sdd1[3](S) sdc1[2] sdb2[1] sda2[0]\n      1953260544 blocks super 1.2 level 5, 512k chunk, algorithm 2 [3/2] [UU_]\n\n\
unused devices: <none>\n";

    #[test]
    fn parses_mdadm_scan_rows() {
        let parsed = parse_mdadm_scan(&[
            "ARRAY /dev/md0 metadata=1.2 name=host:0 UUID=abcd".to_string(),
            "ARRAY /dev/md1 UUID=efgh".to_string(),
        ]);

        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].device, "/dev/md0");
        assert_eq!(parsed[0].name.as_deref(), Some("host:0"));
        assert_eq!(parsed[0].uuid.as_deref(), Some("abcd"));
    }

    #[test]
    fn parses_proc_mdstat_arrays() {
        let arrays = parse_proc_mdstat(MDSTAT).expect("mdstat");
        assert_eq!(arrays.len(), 2);

        let mirror = &arrays[0];
        assert_eq!(mirror.level, MdLevel::Raid1);
        assert_eq!(mirror.members, vec!["/dev/sdb1".to_string(), "/dev/sda1".to_string()]);
        assert_eq!(mirror.size_k, 976630336);
        assert!(!mirror.degraded);

        let parity = &arrays[1];
        assert_eq!(parity.number, 1);
        assert_eq!(parity.level, MdLevel::Raid5);
        assert_eq!(parity.spares, vec!["/dev/sdd1".to_string()]);
        assert_eq!(parity.members.len(), 3);
        assert_eq!(parity.chunk_k, 512);
        assert_eq!(parity.parity, MdParity::LeftSymmetric);
        assert!(parity.degraded);
    }

    #[test]
    fn merges_uuid_from_scan() {
        let arrays = parse_proc_mdstat(MDSTAT).expect("mdstat");
        let merged = merge_scan(
            arrays,
            vec![MdArrayScan {
                device: "/dev/md1".to_string(),
                name: None,
                uuid: Some("1111:2222".to_string()),
            }],
        );
        assert_eq!(merged[0].uuid, None);
        assert_eq!(merged[1].uuid.as_deref(), Some("1111:2222"));
    }

    #[test]
    fn bad_array_name_is_parse_error() {
        let err = parse_proc_mdstat("mdX : active raid1 sda1[0]\n").expect_err("bad name");
        assert!(matches!(err, SysError::Parse { tool: "mdstat", .. }));
    }
}
