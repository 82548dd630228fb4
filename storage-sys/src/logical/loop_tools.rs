// SPDX-License-Identifier: GPL-3.0-only

use serde::{Deserialize, Serialize};
use storage_contracts::{CommandLine, CommandRunner};

use crate::{Result, SysError, run_capture};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopRecord {
    pub device: String,
    pub file: String,
}

pub fn list_command() -> CommandLine {
    CommandLine::new("losetup").arg("-a")
}

/// Parse `losetup -a`: `/dev/loop0: [2049]:1234 (/var/tmp/disk.img)`.
pub fn parse_losetup(lines: &[String]) -> Result<Vec<LoopRecord>> {
    lines
        .iter()
        .map(|line| line.trim())
        .filter(|line| !line.is_empty())
        .map(|line| {
            let (device, rest) = line
                .split_once(':')
                .ok_or_else(|| SysError::parse("losetup", format!("no device in '{line}'")))?;
            let open = rest.find('(');
            let close = rest.rfind(')');
            let file = match (open, close) {
                (Some(open), Some(close)) if close > open => &rest[open + 1..close],
                _ => {
                    return Err(SysError::parse(
                        "losetup",
                        format!("no backing file in '{line}'"),
                    ));
                }
            };
            Ok(LoopRecord {
                device: device.to_string(),
                file: file.to_string(),
            })
        })
        .collect()
}

pub fn probe_loops(runner: &mut dyn CommandRunner) -> Result<Vec<LoopRecord>> {
    if runner.executes() && which::which("losetup").is_err() {
        return Ok(Vec::new());
    }
    parse_losetup(&run_capture(runner, &list_command())?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_backing_files() {
        let loops = parse_losetup(&[
            "/dev/loop0: [2049]:1311 (/var/lib/images/disk.img)".to_string(),
            "/dev/loop1: [0044]:77, offset 512 (/srv/my image.img)".to_string(),
        ])
        .expect("losetup");
        assert_eq!(loops[0].device, "/dev/loop0");
        assert_eq!(loops[0].file, "/var/lib/images/disk.img");
        assert_eq!(loops[1].file, "/srv/my image.img");
    }

    #[test]
    fn line_without_file_is_parse_error() {
        assert!(parse_losetup(&["/dev/loop3: []".to_string()]).is_err());
    }
}
