// SPDX-License-Identifier: GPL-3.0-only

use std::path::PathBuf;

use storage_contracts::{RaidConfig, ToolError};

use crate::{AsciiFile, Result};

/// `mdadm.conf` keyed by array number.
///
/// An entry spans the `ARRAY /dev/mdN ...` line and any indented
/// continuation lines after it.
#[derive(Debug, Clone)]
pub struct EtcMdadm {
    file: AsciiFile,
    dirty: bool,
}

impl EtcMdadm {
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        Ok(Self {
            file: AsciiFile::load(path)?,
            dirty: false,
        })
    }

    /// Half-open line range of the entry for `/dev/md<number>`.
    fn entry_range(&self, number: u32) -> Option<(usize, usize)> {
        let lines = self.file.lines();
        let start = lines
            .iter()
            .position(|line| array_number(line) == Some(number))?;
        let mut end = start + 1;
        while end < lines.len() && is_continuation(&lines[end]) {
            end += 1;
        }
        Some((start, end))
    }

    pub fn lines(&self) -> &[String] {
        self.file.lines()
    }
}

fn is_continuation(line: &str) -> bool {
    line.starts_with(' ') || line.starts_with('\t')
}

/// The array number of an `ARRAY` line, for both `/dev/mdN` and
/// `/dev/md/N` spellings.
fn array_number(line: &str) -> Option<u32> {
    let mut tokens = line.split_whitespace();
    if tokens.next()? != "ARRAY" {
        return None;
    }
    let device = tokens.next()?;
    let tail = device
        .strip_prefix("/dev/md/")
        .or_else(|| device.strip_prefix("/dev/md"))?;
    tail.parse().ok()
}

impl RaidConfig for EtcMdadm {
    fn update_entry(&mut self, number: u32, line: &str) {
        match self.entry_range(number) {
            Some((start, end)) => {
                self.file
                    .lines_mut()
                    .splice(start..end, std::iter::once(line.to_string()));
            }
            None => self.file.push(line),
        }
        self.dirty = true;
    }

    fn remove_entry(&mut self, number: u32) -> bool {
        match self.entry_range(number) {
            Some((start, end)) => {
                self.file.lines_mut().drain(start..end);
                self.dirty = true;
                true
            }
            None => false,
        }
    }

    fn flush(&mut self) -> std::result::Result<(), ToolError> {
        if !self.dirty {
            return Ok(());
        }
        self.file.save()?;
        self.dirty = false;
        Ok(())
    }
}
