// SPDX-License-Identifier: GPL-3.0-only

//! The container/volume graph.
//!
//! Containers own their volumes; everything else (used-by edges, the
//! volume's container handle) refers to entities by device path or id.

use serde::{Deserialize, Serialize};
use storage_types::{
    ContainerInfo, ContainerKind, LogicalVolumeInfo, PhysicalVolumeInfo, UsedBy, VolumeGroupInfo,
    VolumeInfo,
};

use crate::container::{Container, ContainerData, ContainerId};
use crate::device::Device;
use crate::volume::{Volume, VolumeData, VolumeId};

#[derive(Debug, Clone, Copy)]
enum Slot {
    Volume(VolumeId),
    Disk(ContainerId),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceGraph {
    containers: Vec<Container>,
    next_container: u32,
    next_volume: u32,
}

impl DeviceGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_container(&mut self, dev: Device, data: ContainerData) -> ContainerId {
        self.next_container += 1;
        let id = ContainerId(self.next_container);
        self.containers.push(Container::new(id, dev, data));
        id
    }

    /// The single pool container of `kind`, created on first use.
    pub fn ensure_pool(&mut self, kind: ContainerKind) -> ContainerId {
        if let Some(c) = self.containers.iter().find(|c| c.kind() == kind) {
            return c.id;
        }
        let (name, data) = match kind {
            ContainerKind::Md => ("md", ContainerData::Md),
            ContainerKind::Loop => ("loop", ContainerData::Loop),
            ContainerKind::Dm => ("mapper", ContainerData::Dm),
            _ => ("btrfs", ContainerData::Btrfs),
        };
        self.add_container(Device::new(name, format!("/dev/{name}"), 0), data)
    }

    pub fn pool(&self, kind: ContainerKind) -> Option<&Container> {
        self.containers.iter().find(|c| c.kind() == kind)
    }

    pub fn containers(&self) -> impl Iterator<Item = &Container> {
        self.containers.iter()
    }

    pub(crate) fn containers_mut(&mut self) -> impl Iterator<Item = &mut Container> {
        self.containers.iter_mut()
    }

    pub fn container_ids(&self) -> Vec<ContainerId> {
        self.containers.iter().map(|c| c.id).collect()
    }

    pub fn container(&self, id: ContainerId) -> Option<&Container> {
        self.containers.iter().find(|c| c.id == id)
    }

    pub fn container_mut(&mut self, id: ContainerId) -> Option<&mut Container> {
        self.containers.iter_mut().find(|c| c.id == id)
    }

    /// Container by name or device path. Live containers win over ones
    /// pending deletion.
    pub fn find_container(&self, name: &str) -> Option<&Container> {
        let mut matching = self.containers.iter().filter(|c| c.dev.matches(name));
        let first = matching.next()?;
        if !first.dev.deleted {
            return Some(first);
        }
        matching.find(|c| !c.dev.deleted).or(Some(first))
    }

    pub fn find_container_id(&self, name: &str) -> Option<ContainerId> {
        self.find_container(name).map(|c| c.id)
    }

    pub fn remove_container(&mut self, id: ContainerId) -> Option<Container> {
        let index = self.containers.iter().position(|c| c.id == id)?;
        Some(self.containers.remove(index))
    }

    pub fn volumes(&self) -> impl Iterator<Item = &Volume> {
        self.containers.iter().flat_map(|c| c.volumes.iter())
    }

    pub fn owned_volumes(&self, id: ContainerId) -> &[Volume] {
        self.container(id).map(Container::owned_volumes).unwrap_or(&[])
    }

    /// Live volume by name, device path or alternate name. A btrfs
    /// filesystem shares its device path with its first member, so block
    /// volumes win on such a path.
    pub fn find_volume(&self, path: &str) -> Option<&Volume> {
        self.containers
            .iter()
            .filter(|c| c.kind() != ContainerKind::Btrfs)
            .chain(self.containers.iter().filter(|c| c.kind() == ContainerKind::Btrfs))
            .flat_map(|c| c.volumes.iter())
            .find(|v| !v.deleted() && v.dev.matches(path))
    }

    pub fn find_volume_id(&self, path: &str) -> Option<VolumeId> {
        self.find_volume(path).map(|v| v.id)
    }

    pub fn volume(&self, id: VolumeId) -> Option<&Volume> {
        self.volumes().find(|v| v.id == id)
    }

    pub fn volume_mut(&mut self, id: VolumeId) -> Option<&mut Volume> {
        self.containers
            .iter_mut()
            .flat_map(|c| c.volumes.iter_mut())
            .find(|v| v.id == id)
    }

    pub fn new_volume_id(&mut self) -> VolumeId {
        self.next_volume += 1;
        VolumeId(self.next_volume)
    }

    /// Attach `volume` to its container. Returns false when the container
    /// is gone.
    pub fn add_volume(&mut self, volume: Volume) -> bool {
        match self.container_mut(volume.container) {
            Some(container) => {
                container.add_volume(volume);
                true
            }
            None => false,
        }
    }

    pub fn remove_volume(&mut self, id: VolumeId) -> Option<Volume> {
        self.containers
            .iter_mut()
            .find_map(|c| c.remove_volume(id))
    }

    /// Flag a volume for creation. Only the flag changes.
    pub fn mark_created(&mut self, id: VolumeId) {
        if let Some(v) = self.volume_mut(id) {
            v.dev.created = true;
        }
    }

    /// Flag a volume for deletion. Only the flag changes.
    pub fn mark_deleted(&mut self, id: VolumeId) {
        if let Some(v) = self.volume_mut(id) {
            v.dev.deleted = true;
        }
    }

    /// Record a target size. The pending resize is the difference to the
    /// original size.
    pub fn mark_resize(&mut self, id: VolumeId, size_k: u64) {
        if let Some(v) = self.volume_mut(id) {
            v.dev.size_k = size_k;
            if v.dev.created {
                v.orig_size_k = size_k;
            }
        }
    }

    /// Where `path` lives: a block volume, a disk container, or a btrfs
    /// filesystem, in that order.
    fn locate(&self, path: &str) -> Option<Slot> {
        let live = |c: &&Container| !c.dev.deleted;
        let block = self
            .containers
            .iter()
            .filter(|c| c.kind() != ContainerKind::Btrfs)
            .flat_map(|c| c.volumes.iter())
            .find(|v| !v.deleted() && v.dev.matches(path));
        if let Some(v) = block {
            return Some(Slot::Volume(v.id));
        }
        let disk = self
            .containers
            .iter()
            .filter(live)
            .find(|c| c.kind() == ContainerKind::Disk && c.dev.matches(path));
        if let Some(c) = disk {
            return Some(Slot::Disk(c.id));
        }
        self.find_volume_id(path).map(Slot::Volume)
    }

    /// Live volume or disk container known under `path`.
    pub fn device(&self, path: &str) -> Option<&Device> {
        match self.locate(path)? {
            Slot::Volume(id) => self.volume(id).map(|v| &v.dev),
            Slot::Disk(id) => self.container(id).map(|c| &c.dev),
        }
    }

    fn device_mut(&mut self, path: &str) -> Option<&mut Device> {
        match self.locate(path)? {
            Slot::Volume(id) => self.volume_mut(id).map(|v| &mut v.dev),
            Slot::Disk(id) => self.container_mut(id).map(|c| &mut c.dev),
        }
    }

    pub fn used_by(&self, path: &str) -> Vec<UsedBy> {
        self.device(path).map(|d| d.used_by.clone()).unwrap_or_default()
    }

    /// Returns false when no device is known under `path`.
    pub fn add_used_by(&mut self, path: &str, edge: UsedBy) -> bool {
        match self.device_mut(path) {
            Some(dev) => {
                dev.add_used_by(edge);
                true
            }
            None => {
                tracing::debug!("no device {path} to mark as {edge}");
                false
            }
        }
    }

    pub fn remove_used_by(&mut self, path: &str, edge: &UsedBy) {
        if let Some(dev) = self.device_mut(path) {
            dev.remove_used_by(edge);
        }
    }

    /// Drop `edge` from every device that carries it.
    pub fn clear_used_by(&mut self, edge: &UsedBy) {
        for container in &mut self.containers {
            container.dev.remove_used_by(edge);
            for volume in &mut container.volumes {
                volume.dev.remove_used_by(edge);
            }
        }
    }

    pub fn container_info(&self) -> Vec<ContainerInfo> {
        self.containers
            .iter()
            .map(|c| ContainerInfo {
                kind: c.kind(),
                name: c.name().to_string(),
                device: c.device().to_string(),
                size_k: c.dev.size_k,
                readonly: c.readonly,
                created: c.dev.created,
                deleted: c.dev.deleted,
                used_by: c.dev.used_by.clone(),
                volumes: c.volumes.iter().map(|v| v.device().to_string()).collect(),
            })
            .collect()
    }

    pub fn volume_info(&self) -> Vec<VolumeInfo> {
        self.containers
            .iter()
            .flat_map(|c| c.volumes.iter().map(move |v| volume_info(c, v)))
            .collect()
    }

    pub fn lvm_vg_info(&self, name: &str) -> Option<VolumeGroupInfo> {
        let container = self
            .containers
            .iter()
            .find(|c| c.kind() == ContainerKind::Lvm && c.dev.matches(name))?;
        let vg = container.vg()?;
        let pool = &vg.pool;
        let pv_info = |pv: &crate::allocator::PhysicalVolume| PhysicalVolumeInfo {
            device: pv.device.clone(),
            vg_name: Some(container.name().to_string()),
            pe_count: pv.pe_count,
            pe_free: pv.pe_free,
        };
        Some(VolumeGroupInfo {
            name: container.name().to_string(),
            uuid: vg.uuid.clone(),
            pe_size_k: pool.pe_size_k,
            pe_count: pool.pe_count,
            pe_free: pool.pe_free,
            pvs: pool.members().map(pv_info).collect(),
            pvs_add: pool.pvs_add.iter().map(|pv| pv.device.clone()).collect(),
            pvs_remove: pool.pvs_remove.iter().map(|pv| pv.device.clone()).collect(),
            lvs: container
                .live_volumes()
                .filter_map(|v| {
                    let lv = v.lv()?;
                    Some(LogicalVolumeInfo {
                        name: v.dev.name.clone(),
                        vg_name: lv.vg.clone(),
                        uuid: lv.uuid.clone(),
                        size_k: v.dev.size_k,
                        le: lv.extents.le,
                        stripes: lv.extents.stripes,
                        stripe_size_k: lv.stripe_size_k,
                        device_path: v.device().to_string(),
                    })
                })
                .collect(),
        })
    }
}

fn volume_info(container: &Container, v: &Volume) -> VolumeInfo {
    VolumeInfo {
        device: v.device().to_string(),
        name: v.dev.name.clone(),
        container: container.name().to_string(),
        container_kind: container.kind(),
        number: v.num,
        size_k: v.dev.size_k,
        orig_size_k: v.orig_size_k,
        fs: v.fs,
        detected_fs: v.detected_fs,
        format: v.format,
        label: v.label.clone(),
        uuid: match &v.data {
            VolumeData::Md(md) if v.uuid.is_empty() => md.md_uuid.clone(),
            _ => v.uuid.clone(),
        },
        mount_point: v.mount_point.clone(),
        mount_by: v.mount_by,
        fstab_options: v.fstab_opt.clone(),
        is_mounted: v.is_mounted,
        encryption: v.encryption,
        created: v.created(),
        deleted: v.deleted(),
        used_by: v.dev.used_by.clone(),
        alt_names: v.dev.alt_names.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::DiskData;
    use crate::volume::DmData;
    use storage_types::{DiskLabel, UsedByKind};

    fn graph_with_volume() -> (DeviceGraph, VolumeId) {
        let mut graph = DeviceGraph::new();
        let dm = graph.ensure_pool(ContainerKind::Dm);
        let id = graph.new_volume_id();
        let mut dev = Device::new("cr_home", "/dev/mapper/cr_home", 2048);
        dev.alt_names.push("/dev/dm-0".to_string());
        graph.add_volume(Volume::new(
            id,
            dm,
            dev,
            0,
            VolumeData::Dm(DmData {
                target: "crypt".to_string(),
                devices: vec!["/dev/sda2".to_string()],
            }),
        ));
        (graph, id)
    }

    #[test]
    fn pools_are_singletons() {
        let mut graph = DeviceGraph::new();
        let a = graph.ensure_pool(ContainerKind::Md);
        let b = graph.ensure_pool(ContainerKind::Md);
        assert_eq!(a, b);
        assert_eq!(graph.containers().count(), 1);
    }

    #[test]
    fn find_volume_by_any_name() {
        let (mut graph, id) = graph_with_volume();
        assert_eq!(graph.find_volume_id("/dev/dm-0"), Some(id));
        assert_eq!(graph.find_volume_id("cr_home"), Some(id));
        graph.mark_deleted(id);
        assert!(graph.find_volume("/dev/mapper/cr_home").is_none());
        assert!(graph.volume(id).is_some());
    }

    #[test]
    fn used_by_reaches_disks_and_volumes() {
        let (mut graph, _) = graph_with_volume();
        graph.add_container(
            Device::new("sdb", "/dev/sdb", 1 << 20),
            ContainerData::Disk(DiskData {
                label: DiskLabel::Gpt,
                model: None,
                del_ptable: false,
            }),
        );
        let edge = UsedBy::new(UsedByKind::Lvm, "/dev/system");
        assert!(graph.add_used_by("/dev/sdb", edge.clone()));
        assert!(graph.add_used_by("/dev/dm-0", edge.clone()));
        assert!(!graph.add_used_by("/dev/nope", edge.clone()));
        assert_eq!(graph.used_by("/dev/sdb"), vec![edge.clone()]);

        graph.clear_used_by(&edge);
        assert!(graph.used_by("/dev/sdb").is_empty());
        assert!(graph.used_by("/dev/mapper/cr_home").is_empty());
    }

    #[test]
    fn resize_of_created_volume_moves_original() {
        let (mut graph, id) = graph_with_volume();
        graph.mark_resize(id, 4096);
        assert!(graph.volume(id).is_some_and(|v| v.needs_extend()));
        graph.mark_created(id);
        graph.mark_resize(id, 1024);
        assert!(graph.volume(id).is_some_and(|v| !v.needs_shrink()));
    }
}
