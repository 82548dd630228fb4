// SPDX-License-Identifier: GPL-3.0-only

//! Common utility types shared across models

use anyhow::Result;
use num_format::{Locale, ToFormattedString};
use serde::{Deserialize, Serialize};

pub const KIB_PER_MIB: u64 = 1024;
pub const GIB: u64 = 1024 * 1024;
pub const TIB: u64 = 1024 * GIB;

/// A contiguous region on a disk, in KiB.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Region {
    /// First KiB (inclusive)
    pub start: u64,

    /// Length in KiB
    pub len: u64,
}

impl Region {
    pub fn new(start: u64, len: u64) -> Self {
        Self { start, len }
    }

    /// First KiB past the region
    pub fn end(&self) -> u64 {
        self.start + self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn contains(&self, other: &Region) -> bool {
        other.start >= self.start && other.end() <= self.end()
    }

    pub fn intersects(&self, other: &Region) -> bool {
        self.start < other.end() && other.start < self.end()
    }

    pub fn intersect(&self, other: &Region) -> Region {
        let start = self.start.max(other.start);
        let end = self.end().min(other.end());
        if end <= start {
            Region::new(start, 0)
        } else {
            Region::new(start, end - start)
        }
    }
}

impl std::fmt::Display for Region {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{},{}]", self.start, self.len)
    }
}

/// Convert KiB to human-readable format (e.g., "1.50 GiB")
pub fn kib_to_pretty(kib: u64, add_kib: bool) -> String {
    let mut steps = 0;
    let mut val: f64 = kib as f64;

    while val >= 1024. && steps < 5 {
        val /= 1024.;
        steps += 1;
    }

    let unit = match steps {
        0 => "KiB",
        1 => "MiB",
        2 => "GiB",
        3 => "TiB",
        4 => "PiB",
        _ => "EiB",
    };

    if add_kib {
        let kib_str = kib.to_formatted_string(&Locale::en);
        format!("{:.2} {} ({} KiB)", val, unit, kib_str)
    } else {
        format!("{:.2} {}", val, unit)
    }
}

/// Parse human-readable format to KiB (e.g., "1.5 GiB" -> KiB)
pub fn pretty_to_kib(pretty: &str) -> Result<u64> {
    let split = pretty.split_whitespace().collect::<Vec<&str>>();
    let string_value = split
        .first()
        .ok_or_else(|| anyhow::anyhow!("Invalid input"))?;

    let mut val: f64 = string_value.parse()?;
    let unit = if split.len() > 1 {
        *split
            .last()
            .ok_or_else(|| anyhow::anyhow!("Invalid input"))?
    } else {
        "KiB"
    };

    let mut steps = match unit {
        "K" | "KiB" => 0,
        "M" | "MiB" => 1,
        "G" | "GiB" => 2,
        "T" | "TiB" => 3,
        "P" | "PiB" => 4,
        _ => return Err(anyhow::anyhow!("Invalid unit: {}", unit)),
    };

    while steps > 0 {
        val *= 1024.;
        steps -= 1;
    }

    Ok(val as u64)
}
