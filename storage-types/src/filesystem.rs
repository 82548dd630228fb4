// SPDX-License-Identifier: GPL-3.0-only

//! Filesystem, mount-by and encryption vocabulary

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Filesystem type on a volume.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FsType {
    #[default]
    Unknown,
    None,
    Ext2,
    Ext3,
    Ext4,
    Btrfs,
    Xfs,
    Vfat,
    Ntfs,
    Swap,
}

impl FsType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::None => "none",
            Self::Ext2 => "ext2",
            Self::Ext3 => "ext3",
            Self::Ext4 => "ext4",
            Self::Btrfs => "btrfs",
            Self::Xfs => "xfs",
            Self::Vfat => "vfat",
            Self::Ntfs => "ntfs",
            Self::Swap => "swap",
        }
    }

    /// Whether a filesystem label can be written after creation.
    pub fn supports_label(self) -> bool {
        matches!(
            self,
            Self::Ext2 | Self::Ext3 | Self::Ext4 | Self::Xfs | Self::Swap | Self::Btrfs
        )
    }

    pub fn is_formatted(self) -> bool {
        !matches!(self, Self::Unknown | Self::None)
    }
}

impl fmt::Display for FsType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FsType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_lowercase().as_str() {
            "" | "none" => Self::None,
            "ext2" => Self::Ext2,
            "ext3" => Self::Ext3,
            "ext4" => Self::Ext4,
            "btrfs" => Self::Btrfs,
            "xfs" => Self::Xfs,
            "vfat" | "fat16" | "fat32" => Self::Vfat,
            "ntfs" => Self::Ntfs,
            "swap" | "linux-swap" | "linux-swap(v1)" => Self::Swap,
            "unknown" => Self::Unknown,
            other => return Err(format!("unknown filesystem type: {other}")),
        })
    }
}

/// How fstab refers to a volume.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MountBy {
    #[default]
    Device,
    Uuid,
    Label,
    Id,
    Path,
}

impl MountBy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Device => "device",
            Self::Uuid => "uuid",
            Self::Label => "label",
            Self::Id => "id",
            Self::Path => "path",
        }
    }
}

impl fmt::Display for MountBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Encryption layer on a volume.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EncryptType {
    #[default]
    None,
    Luks,
    Unknown,
}

impl EncryptType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Luks => "luks",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for EncryptType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tool_spellings() {
        assert_eq!("linux-swap(v1)".parse::<FsType>().unwrap(), FsType::Swap);
        assert_eq!("fat32".parse::<FsType>().unwrap(), FsType::Vfat);
        assert_eq!("".parse::<FsType>().unwrap(), FsType::None);
        assert!("zfs".parse::<FsType>().is_err());
    }

    #[test]
    fn label_support() {
        assert!(FsType::Ext4.supports_label());
        assert!(!FsType::Vfat.supports_label());
        assert!(!FsType::None.is_formatted());
    }
}
