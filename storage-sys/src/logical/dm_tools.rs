// SPDX-License-Identifier: GPL-3.0-only

use serde::{Deserialize, Serialize};
use storage_contracts::{CommandLine, CommandRunner};

use crate::{Result, SysError, run_capture};

/// A device-mapper table folded over its target lines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DmRecord {
    pub name: String,
    /// Target of the first segment (`linear`, `striped`, `crypt`, ...).
    pub target: String,
    pub size_k: u64,
    /// Underlying devices as `major:minor`.
    pub devices: Vec<String>,
}

pub fn table_command() -> CommandLine {
    CommandLine::new("dmsetup").arg("table")
}

fn is_major_minor(token: &str) -> bool {
    token
        .split_once(':')
        .is_some_and(|(major, minor)| {
            !major.is_empty()
                && !minor.is_empty()
                && major.chars().all(|c| c.is_ascii_digit())
                && minor.chars().all(|c| c.is_ascii_digit())
        })
}

/// Parse `dmsetup table` lines of the form
/// `name: start length target args...`.
pub fn parse_dm_table(lines: &[String]) -> Result<Vec<DmRecord>> {
    let mut tables: Vec<DmRecord> = Vec::new();

    for line in lines {
        let line = line.trim();
        if line.is_empty() || line == "No devices found" {
            continue;
        }
        let (name, rest) = line
            .split_once(": ")
            .ok_or_else(|| SysError::parse("dmsetup", format!("no name in '{line}'")))?;
        let tokens: Vec<&str> = rest.split_whitespace().collect();
        if tokens.len() < 3 {
            return Err(SysError::parse("dmsetup", format!("short table line '{line}'")));
        }
        let sectors: u64 = tokens[1]
            .parse()
            .map_err(|_| SysError::parse("dmsetup", format!("bad length '{}'", tokens[1])))?;
        let devices = tokens[3..].iter().filter(|t| is_major_minor(t)).map(ToString::to_string);

        match tables.iter_mut().find(|t| t.name == name) {
            Some(table) => {
                table.size_k += sectors / 2;
                for device in devices {
                    if !table.devices.contains(&device) {
                        table.devices.push(device);
                    }
                }
            }
            None => tables.push(DmRecord {
                name: name.to_string(),
                target: tokens[2].to_string(),
                size_k: sectors / 2,
                devices: devices.collect(),
            }),
        }
    }

    Ok(tables)
}

pub fn probe_dm(runner: &mut dyn CommandRunner) -> Result<Vec<DmRecord>> {
    if runner.executes() && which::which("dmsetup").is_err() {
        return Ok(Vec::new());
    }
    parse_dm_table(&run_capture(runner, &table_command())?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(text: &str) -> Vec<String> {
        text.lines().map(ToString::to_string).collect()
    }

    #[test]
    fn folds_multi_segment_tables() {
        let tables = parse_dm_table(&lines(
            "system-root: 0 2097152 linear 8:2 2048\n\
             system-root: 2097152 1048576 linear 8:17 2048\n\
             cr_home: 0 4194304 crypt aes-xts-plain64 :64:logon:cryptsetup:x 0 253:2 4096\n",
        ))
        .expect("table");
        assert_eq!(tables.len(), 2);
        assert_eq!(tables[0].size_k, 1572864);
        assert_eq!(tables[0].devices, vec!["8:2".to_string(), "8:17".to_string()]);
        assert_eq!(tables[1].target, "crypt");
        assert_eq!(tables[1].devices, vec!["253:2".to_string()]);
    }

    #[test]
    fn no_devices_is_empty() {
        assert!(parse_dm_table(&lines("No devices found\n")).expect("empty").is_empty());
    }
}
