// SPDX-License-Identifier: GPL-3.0-only

//! Partition and partition-table types

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{Region, TIB};

/// Primary/extended/logical slot of a partition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartitionType {
    #[default]
    Primary,
    Extended,
    Logical,
    /// Let the disk pick primary or logical from the requested region.
    Any,
}

impl PartitionType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Extended => "extended",
            Self::Logical => "logical",
            Self::Any => "any",
        }
    }
}

impl fmt::Display for PartitionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// MBR style system id of a partition.
///
/// GPT disks carry the same ids; the planner maps them to parted flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PartitionId(pub u32);

impl PartitionId {
    pub const SWAP: Self = Self(0x82);
    pub const LINUX: Self = Self(0x83);
    pub const EXTENDED: Self = Self(0x05);
    pub const LVM: Self = Self(0x8e);
    pub const RAID: Self = Self(0xfd);
    pub const DOS: Self = Self(0x0c);
    pub const EFI: Self = Self(0xef);
    pub const GPT_BIOS: Self = Self(0x102);

    /// parted flag that expresses this id, if any.
    pub fn parted_flag(self) -> Option<&'static str> {
        match self {
            Self::LVM => Some("lvm"),
            Self::RAID => Some("raid"),
            Self::SWAP => Some("swap"),
            Self::EFI => Some("esp"),
            Self::GPT_BIOS => Some("bios_grub"),
            _ => None,
        }
    }

    /// Filesystem hint passed to `parted mkpart`.
    pub fn mkpart_fs_hint(self) -> &'static str {
        match self {
            Self::SWAP => "linux-swap",
            Self::DOS | Self::EFI => "fat32",
            _ => "ext2",
        }
    }
}

impl Default for PartitionId {
    fn default() -> Self {
        Self::LINUX
    }
}

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

/// Partition table label and the limits it imposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiskLabel {
    Msdos,
    Gpt,
    Bsd,
    Sun,
    Mac,
    Dasd,
    Aix,
    Amiga,
    /// No partition table (or one parted does not know).
    None,
}

impl DiskLabel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Msdos => "msdos",
            Self::Gpt => "gpt",
            Self::Bsd => "bsd",
            Self::Sun => "sun",
            Self::Mac => "mac",
            Self::Dasd => "dasd",
            Self::Aix => "aix",
            Self::Amiga => "amiga",
            Self::None => "",
        }
    }

    pub fn extended_possible(self) -> bool {
        matches!(self, Self::Msdos)
    }

    /// Highest primary partition number.
    pub fn max_primary(self) -> u32 {
        match self {
            Self::Msdos => 4,
            Self::Gpt => 128,
            Self::Bsd | Self::Sun => 8,
            Self::Mac => 64,
            Self::Dasd => 3,
            Self::Amiga => 63,
            Self::Aix | Self::None => 0,
        }
    }

    /// Highest logical partition number.
    pub fn max_logical(self) -> u32 {
        match self {
            Self::Msdos => 256,
            _ => 0,
        }
    }

    /// Largest disk the label can address, in KiB.
    pub fn max_size_k(self) -> u64 {
        match self {
            Self::Gpt => 16 * 1024 * TIB,
            Self::None => 0,
            _ => 2 * TIB,
        }
    }
}

impl fmt::Display for DiskLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DiskLabel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_lowercase().as_str() {
            "msdos" | "dos" => Self::Msdos,
            "gpt" => Self::Gpt,
            "bsd" => Self::Bsd,
            "sun" => Self::Sun,
            "mac" => Self::Mac,
            "dasd" => Self::Dasd,
            "aix" => Self::Aix,
            "amiga" => Self::Amiga,
            "" | "loop" | "unknown" => Self::None,
            other => return Err(format!("unknown disk label: {other}")),
        })
    }
}

/// Snapshot of a partition for reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionInfo {
    pub device: String,
    pub number: u32,
    pub region: Region,
    pub partition_type: PartitionType,
    pub id: PartitionId,
    pub boot: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_limits() {
        assert_eq!(DiskLabel::Msdos.max_primary(), 4);
        assert!(DiskLabel::Msdos.extended_possible());
        assert!(!DiskLabel::Gpt.extended_possible());
        assert_eq!(DiskLabel::Gpt.max_primary(), 128);
        assert_eq!("dos".parse::<DiskLabel>().unwrap(), DiskLabel::Msdos);
    }

    #[test]
    fn partition_id_flags() {
        assert_eq!(PartitionId::LVM.parted_flag(), Some("lvm"));
        assert_eq!(PartitionId::LINUX.parted_flag(), None);
        assert_eq!(PartitionId::SWAP.mkpart_fs_hint(), "linux-swap");
        assert_eq!(PartitionId::LVM.to_string(), "0x8e");
    }
}
