// SPDX-License-Identifier: GPL-3.0-only

//! Volume reporting model

use serde::{Deserialize, Serialize};

use crate::{ContainerKind, EncryptType, FsType, MountBy, UsedBy};

/// Snapshot of a volume for reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeInfo {
    pub device: String,
    pub name: String,
    pub container: String,
    pub container_kind: ContainerKind,
    pub number: u32,
    pub size_k: u64,
    pub orig_size_k: u64,
    pub fs: FsType,
    pub detected_fs: FsType,
    pub format: bool,
    pub label: String,
    pub uuid: String,
    pub mount_point: String,
    pub mount_by: MountBy,
    pub fstab_options: String,
    pub is_mounted: bool,
    pub encryption: EncryptType,
    pub created: bool,
    pub deleted: bool,
    pub used_by: Vec<UsedBy>,
    pub alt_names: Vec<String>,
}

impl VolumeInfo {
    pub fn needs_resize(&self) -> bool {
        !self.deleted && self.size_k != self.orig_size_k
    }
}
