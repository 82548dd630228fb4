// SPDX-License-Identifier: GPL-3.0-only

use serde::{Deserialize, Serialize};
use storage_types::{ContainerKind, DiskLabel};

use crate::allocator::ExtentPool;
use crate::device::Device;
use crate::volume::{Volume, VolumeId};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ContainerId(pub u32);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskData {
    pub label: DiskLabel,
    pub model: Option<String>,
    /// The partition table is rewritten from scratch on commit.
    pub del_ptable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VgData {
    pub uuid: String,
    pub pool: ExtentPool,
}

/// Per-kind part of a container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum ContainerData {
    Disk(DiskData),
    Lvm(VgData),
    Md,
    Loop,
    Dm,
    Btrfs,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Container {
    pub id: ContainerId,
    pub dev: Device,
    pub readonly: bool,
    pub volumes: Vec<Volume>,
    pub data: ContainerData,
}

impl Container {
    pub fn new(id: ContainerId, dev: Device, data: ContainerData) -> Self {
        Self {
            id,
            dev,
            readonly: false,
            volumes: Vec::new(),
            data,
        }
    }

    pub fn kind(&self) -> ContainerKind {
        match self.data {
            ContainerData::Disk(_) => ContainerKind::Disk,
            ContainerData::Lvm(_) => ContainerKind::Lvm,
            ContainerData::Md => ContainerKind::Md,
            ContainerData::Loop => ContainerKind::Loop,
            ContainerData::Dm => ContainerKind::Dm,
            ContainerData::Btrfs => ContainerKind::Btrfs,
        }
    }

    pub fn name(&self) -> &str {
        &self.dev.name
    }

    pub fn device(&self) -> &str {
        &self.dev.device
    }

    pub fn disk(&self) -> Option<&DiskData> {
        match &self.data {
            ContainerData::Disk(d) => Some(d),
            _ => None,
        }
    }

    pub fn disk_mut(&mut self) -> Option<&mut DiskData> {
        match &mut self.data {
            ContainerData::Disk(d) => Some(d),
            _ => None,
        }
    }

    pub fn vg(&self) -> Option<&VgData> {
        match &self.data {
            ContainerData::Lvm(vg) => Some(vg),
            _ => None,
        }
    }

    pub fn vg_mut(&mut self) -> Option<&mut VgData> {
        match &mut self.data {
            ContainerData::Lvm(vg) => Some(vg),
            _ => None,
        }
    }

    /// Volumes in list order, deleted ones included.
    pub fn owned_volumes(&self) -> &[Volume] {
        &self.volumes
    }

    /// Volumes that are not pending deletion.
    pub fn live_volumes(&self) -> impl Iterator<Item = &Volume> {
        self.volumes.iter().filter(|v| !v.deleted())
    }

    pub fn volume(&self, id: VolumeId) -> Option<&Volume> {
        self.volumes.iter().find(|v| v.id == id)
    }

    pub fn volume_mut(&mut self, id: VolumeId) -> Option<&mut Volume> {
        self.volumes.iter_mut().find(|v| v.id == id)
    }

    /// Insert keeping numbered volumes in number order.
    pub fn add_volume(&mut self, volume: Volume) {
        let at = if volume.numeric {
            self.volumes
                .iter()
                .position(|v| v.numeric && v.num > volume.num)
                .unwrap_or(self.volumes.len())
        } else {
            self.volumes.len()
        };
        self.volumes.insert(at, volume);
    }

    pub fn remove_volume(&mut self, id: VolumeId) -> Option<Volume> {
        let index = self.volumes.iter().position(|v| v.id == id)?;
        Some(self.volumes.remove(index))
    }

    /// Pending work on the container itself, not on its volumes.
    pub fn has_own_work(&self) -> bool {
        self.dev.created
            || self.dev.deleted
            || self.disk().is_some_and(|d| d.del_ptable)
            || self
                .vg()
                .is_some_and(|vg| !vg.pool.pvs_add.is_empty() || !vg.pool.pvs_remove.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::volume::{DmData, VolumeData};

    fn volume(id: u32, num: u32) -> Volume {
        Volume::new(
            VolumeId(id),
            ContainerId(1),
            Device::new(format!("v{num}"), format!("/dev/v{num}"), 10),
            num,
            VolumeData::Dm(DmData {
                target: "linear".to_string(),
                devices: Vec::new(),
            }),
        )
    }

    #[test]
    fn numbered_volumes_stay_sorted() {
        let mut container = Container::new(
            ContainerId(1),
            Device::new("sda", "/dev/sda", 100),
            ContainerData::Disk(DiskData {
                label: DiskLabel::Msdos,
                model: None,
                del_ptable: false,
            }),
        );
        container.add_volume(volume(1, 5));
        container.add_volume(volume(2, 1));
        container.add_volume(volume(3, 3));
        let nums: Vec<u32> = container.volumes.iter().map(|v| v.num).collect();
        assert_eq!(nums, vec![1, 3, 5]);
        assert_eq!(container.kind(), ContainerKind::Disk);
        assert!(container.remove_volume(VolumeId(3)).is_some());
        assert!(container.remove_volume(VolumeId(3)).is_none());
    }

    #[test]
    fn pending_pv_changes_are_own_work() {
        let mut container = Container::new(
            ContainerId(2),
            Device::new("system", "/dev/system", 0),
            ContainerData::Lvm(VgData {
                uuid: String::new(),
                pool: ExtentPool::new(4096),
            }),
        );
        assert!(!container.has_own_work());
        if let Some(vg) = container.vg_mut() {
            vg.pool.pvs_add.push(crate::allocator::PhysicalVolume::new("/dev/sdb1", 10));
        }
        assert!(container.has_own_work());
    }
}
