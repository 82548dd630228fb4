// SPDX-License-Identifier: GPL-3.0-only

//! Software RAID (md) types

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// RAID personality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MdLevel {
    Raid0,
    Raid1,
    Raid5,
    Raid6,
    Raid10,
    Multipath,
    Unknown,
}

impl MdLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Raid0 => "raid0",
            Self::Raid1 => "raid1",
            Self::Raid5 => "raid5",
            Self::Raid6 => "raid6",
            Self::Raid10 => "raid10",
            Self::Multipath => "multipath",
            Self::Unknown => "unknown",
        }
    }

    /// Smallest number of active members the level accepts.
    pub fn min_devices(self) -> usize {
        match self {
            Self::Raid5 => 3,
            Self::Raid6 => 4,
            _ => 2,
        }
    }

    /// Levels that get an internal write-intent bitmap on creation.
    pub fn wants_bitmap(self) -> bool {
        matches!(self, Self::Raid1 | Self::Raid5 | Self::Raid6 | Self::Raid10)
    }

    /// Usable size in KiB for `count` members whose smallest is `smallest_k`
    /// and whose sizes add up to `sum_k`.
    pub fn usable_size_k(self, count: usize, smallest_k: u64, sum_k: u64) -> Option<u64> {
        if count < self.min_devices() {
            return None;
        }
        let count = count as u64;
        match self {
            Self::Raid0 => Some(sum_k),
            Self::Raid1 | Self::Multipath => Some(smallest_k),
            Self::Raid5 => Some(smallest_k * (count - 1)),
            Self::Raid6 => Some(smallest_k * (count - 2)),
            Self::Raid10 => Some(smallest_k * count / 2),
            Self::Unknown => None,
        }
    }
}

impl fmt::Display for MdLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MdLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_lowercase().as_str() {
            "raid0" | "0" | "stripe" => Self::Raid0,
            "raid1" | "1" | "mirror" => Self::Raid1,
            "raid5" | "5" => Self::Raid5,
            "raid6" | "6" => Self::Raid6,
            "raid10" | "10" => Self::Raid10,
            "multipath" => Self::Multipath,
            other => return Err(format!("unknown raid level: {other}")),
        })
    }
}

/// Parity layout of raid5/raid6.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MdParity {
    #[default]
    Default,
    LeftAsymmetric,
    LeftSymmetric,
    RightAsymmetric,
    RightSymmetric,
}

impl MdParity {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::LeftAsymmetric => "left-asymmetric",
            Self::LeftSymmetric => "left-symmetric",
            Self::RightAsymmetric => "right-asymmetric",
            Self::RightSymmetric => "right-symmetric",
        }
    }
}

impl fmt::Display for MdParity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of an md array for reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RaidInfo {
    pub device: String,
    pub number: u32,
    pub level: MdLevel,
    pub parity: MdParity,
    pub chunk_k: u64,
    pub uuid: String,
    pub devices: Vec<String>,
    pub spares: Vec<String>,
    pub size_k: u64,
}
