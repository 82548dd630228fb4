// SPDX-License-Identifier: GPL-3.0-only

use serde::{Deserialize, Serialize};
use storage_contracts::{CommandLine, CommandRunner};

use crate::{Result, SysError, run_capture};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DasdFormat {
    #[default]
    None,
    Ldl,
    Cdl,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DasdInfo {
    pub format: DasdFormat,
    pub cylinders: u64,
    pub heads: u64,
    pub sectors: u64,
    pub block_size: u64,
}

impl DasdInfo {
    pub fn size_k(&self) -> u64 {
        self.cylinders * self.heads * self.sectors * self.block_size / 1024
    }
}

pub fn dasdview_command(device: &str) -> CommandLine {
    CommandLine::new("dasdview").args(["-x", device])
}

/// The decimal value of a `name : hex X dec N` line.
fn dec_value(line: &str) -> Option<u64> {
    let (_, value) = line.split_once(':')?;
    let mut tokens = value.split_whitespace();
    while let Some(token) = tokens.next() {
        if token == "dec" {
            return tokens.next()?.parse().ok();
        }
    }
    None
}

pub fn parse_dasdview(lines: &[String]) -> Result<DasdInfo> {
    let mut info = DasdInfo::default();
    for line in lines {
        let key = line.split(':').next().unwrap_or_default().trim();
        match key {
            "format" => {
                info.format = if line.contains("CDL formatted") {
                    DasdFormat::Cdl
                } else if line.contains("LDL formatted") {
                    DasdFormat::Ldl
                } else {
                    DasdFormat::None
                };
            }
            "number of cylinders" => info.cylinders = dec_value(line).unwrap_or(0),
            "tracks per cylinder" => info.heads = dec_value(line).unwrap_or(0),
            "blocks per track" => info.sectors = dec_value(line).unwrap_or(0),
            "blocksize" => info.block_size = dec_value(line).unwrap_or(0),
            _ => {}
        }
    }
    if info.cylinders == 0 || info.block_size == 0 {
        return Err(SysError::parse("dasdview", "missing geometry"));
    }
    Ok(info)
}

pub fn probe_dasd(runner: &mut dyn CommandRunner, device: &str) -> Result<Option<DasdInfo>> {
    if !cfg!(feature = "dasd-tools") {
        return Ok(None);
    }
    if runner.executes() && which::which("dasdview").is_err() {
        return Ok(None);
    }
    parse_dasdview(&run_capture(runner, &dasdview_command(device))?).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_geometry() {
        let lines: Vec<String> = "--- general DASD information ---
blocksize               : hex 1000      dec 4096
--- geometry ---
number of cylinders     : hex 2721      dec 10017
tracks per cylinder     : hex f         dec 15
blocks per track        : hex c         dec 12
--- extended DASD information ---
format                  : hex 2         dec 2              CDL formatted"
            .lines()
            .map(ToString::to_string)
            .collect();
        let info = parse_dasdview(&lines).expect("dasdview");
        assert_eq!(info.format, DasdFormat::Cdl);
        assert_eq!(info.cylinders, 10017);
        assert_eq!(info.heads, 15);
        assert_eq!(info.sectors, 12);
        assert_eq!(info.size_k(), 10017 * 15 * 12 * 4);
    }

    #[test]
    fn missing_geometry_fails() {
        assert!(parse_dasdview(&["format : hex 0 dec 0 NOT formatted".to_string()]).is_err());
    }
}
