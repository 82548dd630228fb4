// SPDX-License-Identifier: GPL-3.0-only

//! Multi-device btrfs filesystems and their subvolumes.
//!
//! A filesystem is named by its uuid and answers to the path of its first
//! member. Member and subvolume changes run against a mounted filesystem,
//! mounting it below the temp dir when needed.

use storage_contracts::CommandLine;
use storage_types::{ContainerKind, UsedBy, UsedByKind};
use tracing::debug;

use super::volume_of;
use crate::commit::{Ctx, with_mount};
use crate::error::{BtrfsError, Error, Result, StorageError};
use crate::graph::DeviceGraph;
use crate::storage::Storage;
use crate::volume::{BtrfsData, Subvolume, Volume, VolumeId};

fn btrfs_edge(vol: &Volume) -> UsedBy {
    UsedBy::new(UsedByKind::Btrfs, vol.dev.name.as_str())
}

fn subvolume_path(mount_point: &str, path: &str) -> String {
    format!("{}/{}", mount_point.trim_end_matches('/'), path.trim_start_matches('/'))
}

fn btrfs_of(vol: &Volume) -> Result<&BtrfsData> {
    vol.btrfs()
        .ok_or_else(|| Error::internal(format!("{} is not a btrfs filesystem", vol.device())))
}

impl Storage {
    /// A live filesystem by uuid, by its path, or by any of its members.
    fn btrfs_id(&self, key: &str) -> Result<VolumeId> {
        let pool = self.graph.pool(ContainerKind::Btrfs);
        let live = || pool.into_iter().flat_map(|c| c.live_volumes());
        live()
            .find(|v| v.dev.matches(key) || v.btrfs().is_some_and(|b| b.uuid == key))
            .or_else(|| {
                live().find(|v| v.btrfs().is_some_and(|b| b.devices.iter().any(|d| d == key)))
            })
            .map(|v| v.id)
            .ok_or_else(|| StorageError::BtrfsNotFound(key.to_string()).into())
    }

    fn btrfs_mut(&mut self, vid: VolumeId) -> Result<&mut BtrfsData> {
        let vol = self.volume_mut(vid)?;
        let device = vol.device().to_string();
        vol.btrfs_mut()
            .ok_or_else(|| Error::internal(format!("{device} is not a btrfs filesystem")))
    }

    pub fn create_subvolume(&mut self, device: &str, path: &str) -> Result<()> {
        self.writable(BtrfsError::ChangeReadonly)?;
        let vid = self.btrfs_id(device)?;
        let path = path.trim_start_matches('/');
        let data = self.btrfs_mut(vid)?;
        if data.subvolumes.iter().any(|s| !s.deleted && s.path == path) {
            return Err(BtrfsError::SubvolExists(path.to_string()).into());
        }
        data.subvolumes.push(Subvolume {
            path: path.to_string(),
            created: true,
            deleted: false,
        });
        debug!("{device}: planned subvolume {path}");
        Ok(())
    }

    pub fn remove_subvolume(&mut self, device: &str, path: &str) -> Result<()> {
        self.writable(BtrfsError::ChangeReadonly)?;
        let vid = self.btrfs_id(device)?;
        let path = path.trim_start_matches('/');
        let data = self.btrfs_mut(vid)?;
        let index = data
            .subvolumes
            .iter()
            .position(|s| !s.deleted && s.path == path)
            .ok_or_else(|| BtrfsError::SubvolNonExists(path.to_string()))?;
        if data.subvolumes[index].created {
            data.subvolumes.remove(index);
        } else {
            data.subvolumes[index].deleted = true;
        }
        Ok(())
    }

    pub fn extend_btrfs(&mut self, device: &str, members: &[String]) -> Result<()> {
        self.writable(BtrfsError::ChangeReadonly)?;
        if members.is_empty() {
            return Err(BtrfsError::ListEmpty.into());
        }
        let vid = self.btrfs_id(device)?;
        let vol = volume_of(&self.graph, vid)?;
        let mut data = btrfs_of(&vol)?.clone();
        let mut added_k = 0;
        for member in members {
            if data.devices_remove.contains(member) {
                data.devices_remove.retain(|d| d != member);
                added_k += self.graph.device(member).map_or(0, |d| d.size_k);
                continue;
            }
            let dev = self
                .graph
                .device(member)
                .ok_or_else(|| BtrfsError::DeviceUnknown(member.clone()))?;
            if dev.is_used() || data.devices.contains(member) || data.devices_add.contains(member) {
                return Err(BtrfsError::DeviceUsed(member.clone()).into());
            }
            added_k += dev.size_k;
            data.devices_add.push(member.clone());
        }

        let edge = btrfs_edge(&vol);
        let target = self.volume_mut(vid)?;
        target.dev.size_k += added_k;
        target.orig_size_k = target.dev.size_k;
        if let Some(b) = target.btrfs_mut() {
            *b = data;
        }
        for member in members {
            self.graph.add_used_by(member, edge.clone());
        }
        Ok(())
    }

    pub fn shrink_btrfs(&mut self, device: &str, members: &[String]) -> Result<()> {
        self.writable(BtrfsError::ChangeReadonly)?;
        if members.is_empty() {
            return Err(BtrfsError::ListEmpty.into());
        }
        let vid = self.btrfs_id(device)?;
        let vol = volume_of(&self.graph, vid)?;
        let mut data = btrfs_of(&vol)?.clone();
        for member in members {
            if data.devices_add.contains(member) {
                data.devices_add.retain(|d| d != member);
            } else if data.devices.contains(member) && !data.devices_remove.contains(member) {
                data.devices_remove.push(member.clone());
            } else {
                return Err(BtrfsError::NotMember(member.clone()).into());
            }
        }
        let remaining = data
            .devices
            .iter()
            .chain(&data.devices_add)
            .filter(|d| !data.devices_remove.contains(d))
            .count();
        if remaining == 0 {
            return Err(BtrfsError::LastDevice.into());
        }

        let removed_k: u64 = members
            .iter()
            .filter_map(|m| self.graph.device(m))
            .map(|d| d.size_k)
            .sum();
        let edge = btrfs_edge(&vol);
        let target = self.volume_mut(vid)?;
        target.dev.size_k = target.dev.size_k.saturating_sub(removed_k);
        target.orig_size_k = target.dev.size_k;
        if let Some(b) = target.btrfs_mut() {
            *b = data;
        }
        for member in members {
            self.graph.remove_used_by(member, &edge);
        }
        Ok(())
    }

    pub fn remove_btrfs(&mut self, device: &str) -> Result<()> {
        self.writable(BtrfsError::ChangeReadonly)?;
        let vid = self.btrfs_id(device)?;
        let vol = volume_of(&self.graph, vid)?;
        self.release_users(&vol.dev.name, StorageError::RemoveUsedVolume(vol.dev.name.clone()))?;
        self.graph.clear_used_by(&btrfs_edge(&vol));
        self.graph.mark_deleted(vid);
        debug!("btrfs {} removed from plan", vol.dev.name);
        Ok(())
    }
}

/// Wipe the signature off every member.
pub(crate) fn commit_remove(graph: &mut DeviceGraph, ctx: &mut Ctx, vid: VolumeId) -> Result<()> {
    let vol = volume_of(graph, vid)?;
    let data = btrfs_of(&vol)?;
    for member in &data.devices {
        ctx.run(
            CommandLine::new("wipefs").args(["-a", member.as_str()]),
            BtrfsError::RemoveFailed,
        )?;
    }
    Ok(())
}

pub(crate) fn commit_shrink(graph: &mut DeviceGraph, ctx: &mut Ctx, vid: VolumeId) -> Result<()> {
    let vol = volume_of(graph, vid)?;
    let data = btrfs_of(&vol)?;
    let removed = data.devices_remove.clone();
    with_mount(ctx, &vol, BtrfsError::CannotTmpMount, |ctx, mount_point| {
        let command = CommandLine::new("btrfs")
            .args(["device", "delete"])
            .args(removed.iter().cloned())
            .arg(mount_point);
        ctx.run(command, BtrfsError::ShrinkFailed)
    })?;

    if let Some(v) = graph.volume_mut(vid) {
        let mut first = None;
        if let Some(b) = v.btrfs_mut() {
            b.devices.retain(|d| !removed.contains(d));
            b.devices_remove.clear();
            first = b.devices.first().cloned();
        }
        if removed.contains(&v.dev.device) {
            if let Some(first) = first {
                v.dev.device = first;
            }
        }
    }
    Ok(())
}

pub(crate) fn commit_extend(graph: &mut DeviceGraph, ctx: &mut Ctx, vid: VolumeId) -> Result<()> {
    let vol = volume_of(graph, vid)?;
    let added = btrfs_of(&vol)?.devices_add.clone();
    with_mount(ctx, &vol, BtrfsError::CannotTmpMount, |ctx, mount_point| {
        let command = CommandLine::new("btrfs")
            .args(["device", "add", "-f"])
            .args(added.iter().cloned())
            .arg(mount_point);
        ctx.run(command, BtrfsError::ExtendFailed)
    })?;

    if let Some(b) = graph.volume_mut(vid).and_then(Volume::btrfs_mut) {
        b.devices.append(&mut b.devices_add);
    }
    Ok(())
}

/// Delete, then create, pending subvolumes.
pub(crate) fn commit_subvolumes(
    graph: &mut DeviceGraph,
    ctx: &mut Ctx,
    vid: VolumeId,
) -> Result<()> {
    let vol = volume_of(graph, vid)?;
    let data = btrfs_of(&vol)?;
    let removed: Vec<String> = data
        .subvolumes
        .iter()
        .filter(|s| s.deleted)
        .map(|s| s.path.clone())
        .collect();
    let created: Vec<String> = data
        .subvolumes
        .iter()
        .filter(|s| s.created && !s.deleted)
        .map(|s| s.path.clone())
        .collect();

    with_mount(ctx, &vol, BtrfsError::CannotTmpMount, |ctx, mount_point| {
        for path in &removed {
            let target = subvolume_path(mount_point, path);
            ctx.run(
                CommandLine::new("btrfs").args(["subvolume", "delete", target.as_str()]),
                BtrfsError::DeleteSubvolFailed,
            )?;
        }
        for path in &created {
            let target = subvolume_path(mount_point, path);
            ctx.run(
                CommandLine::new("btrfs").args(["subvolume", "create", target.as_str()]),
                BtrfsError::CreateSubvolFailed,
            )?;
        }
        Ok(())
    })?;

    if let Some(b) = graph.volume_mut(vid).and_then(Volume::btrfs_mut) {
        b.subvolumes.retain(|s| !s.deleted);
        for s in &mut b.subvolumes {
            s.created = false;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::container::{ContainerData, DiskData};
    use crate::device::Device;
    use crate::volume::VolumeData;
    use storage_sys::{MemoryFstab, MemoryMdadm, RecordingRunner};
    use storage_types::{DiskLabel, FsType, GIB};

    const UUID: &str = "7b2c1c8e-0d5a-4e0c-9f3e-2a1b4c5d6e7f";

    /// Btrfs on whole disk sdb, mounted on /data with subvolume `home`;
    /// sdc and sdd are free.
    fn storage(mounted: bool) -> (Storage, RecordingRunner) {
        let mut graph = DeviceGraph::new();
        for name in ["sdb", "sdc", "sdd"] {
            graph.add_container(
                Device::new(name, format!("/dev/{name}"), GIB),
                ContainerData::Disk(DiskData {
                    label: DiskLabel::Gpt,
                    model: None,
                    del_ptable: false,
                }),
            );
        }
        let cid = graph.ensure_pool(ContainerKind::Btrfs);
        let vid = graph.new_volume_id();
        let mut vol = Volume::new(
            vid,
            cid,
            Device::new(UUID, "/dev/sdb", GIB),
            0,
            VolumeData::Btrfs(BtrfsData {
                uuid: UUID.to_string(),
                devices: vec!["/dev/sdb".to_string()],
                devices_add: Vec::new(),
                devices_remove: Vec::new(),
                subvolumes: vec![Subvolume {
                    path: "home".to_string(),
                    created: false,
                    deleted: false,
                }],
            }),
        );
        vol.fs = FsType::Btrfs;
        vol.detected_fs = FsType::Btrfs;
        if mounted {
            vol.mount_point = "/data".to_string();
            vol.orig_mount_point = "/data".to_string();
            vol.is_mounted = true;
        }
        graph.add_volume(vol);
        graph.add_used_by("/dev/sdb", UsedBy::new(UsedByKind::Btrfs, UUID));

        let runner = RecordingRunner::new();
        let config = EngineConfig {
            tmp_dir: "/tmp/planner".into(),
            ..EngineConfig::default()
        };
        let storage = Storage::new(
            graph,
            config,
            Box::new(runner.clone()),
            Box::new(MemoryFstab::new()),
            Box::new(MemoryMdadm::new()),
        );
        (storage, runner)
    }

    fn devs(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| format!("/dev/{n}")).collect()
    }

    #[test]
    fn lookup_by_uuid_path_or_member() {
        let (storage, _) = storage(true);
        let id = storage.btrfs_id(UUID).expect("uuid");
        assert_eq!(storage.btrfs_id("/dev/sdb").ok(), Some(id));
        assert_eq!(storage.btrfs_id("/dev/sdc").map_err(|e| e.code()), Err(-2026));
        assert_eq!(
            storage.graph.device("/dev/sdb").map(|d| d.name.as_str()),
            Some("sdb")
        );
    }

    #[test]
    fn subvolume_rules() {
        let (mut storage, _) = storage(true);
        assert_eq!(
            storage.create_subvolume(UUID, "home").map_err(|e| e.code()),
            Err(-11004)
        );
        assert_eq!(
            storage.remove_subvolume(UUID, "srv").map_err(|e| e.code()),
            Err(-11005)
        );
        storage.create_subvolume(UUID, "/srv").expect("create");
        storage.remove_subvolume(UUID, "srv").expect("drop planned");
        storage.remove_subvolume(UUID, "home").expect("remove");
        storage.create_subvolume(UUID, "home").expect("recreate");
        let vol = storage.find_volume(UUID).expect("fs");
        let paths: Vec<(&str, bool, bool)> = vol
            .btrfs()
            .map(|b| b.subvolumes.iter().map(|s| (s.path.as_str(), s.created, s.deleted)).collect())
            .unwrap_or_default();
        assert_eq!(paths, vec![("home", false, true), ("home", true, false)]);
    }

    #[test]
    fn member_changes() {
        let (mut storage, _) = storage(true);
        assert_eq!(storage.extend_btrfs(UUID, &[]).map_err(|e| e.code()), Err(-11006));
        assert_eq!(
            storage.extend_btrfs(UUID, &devs(&["sdx"])).map_err(|e| e.code()),
            Err(-11007)
        );
        assert_eq!(
            storage.extend_btrfs(UUID, &devs(&["sdb"])).map_err(|e| e.code()),
            Err(-11008)
        );
        storage.extend_btrfs(UUID, &devs(&["sdc", "sdd"])).expect("extend");
        assert_eq!(storage.used_by("/dev/sdc"), vec![UsedBy::new(UsedByKind::Btrfs, UUID)]);
        assert_eq!(storage.find_volume(UUID).map(|v| v.dev.size_k), Some(3 * GIB));

        storage.shrink_btrfs(UUID, &devs(&["sdd"])).expect("cancel add");
        assert!(storage.used_by("/dev/sdd").is_empty());
        assert_eq!(
            storage.shrink_btrfs(UUID, &devs(&["sdd"])).map_err(|e| e.code()),
            Err(-11011)
        );
        storage.shrink_btrfs(UUID, &devs(&["sdb"])).expect("shrink");
        assert_eq!(
            storage.shrink_btrfs(UUID, &devs(&["sdc"])).map_err(|e| e.code()),
            Err(-11012)
        );
    }

    #[test]
    fn commit_runs_against_mount_point() {
        let (mut storage, runner) = storage(true);
        storage.extend_btrfs(UUID, &devs(&["sdc"])).expect("extend");
        storage.create_subvolume(UUID, "srv").expect("subvolume");
        storage.commit().expect("commit");
        assert_eq!(
            runner.rendered(),
            vec![
                "btrfs device add -f /dev/sdc /data",
                "btrfs subvolume create /data/srv",
            ]
        );
        let vol = storage.find_volume(UUID).expect("fs");
        let data = vol.btrfs().expect("btrfs");
        assert_eq!(data.devices, devs(&["sdb", "sdc"]));
        assert!(!data.pending_subvolumes());
    }

    #[test]
    fn unmounted_filesystem_is_mounted_temporarily() {
        let (mut storage, runner) = storage(false);
        storage.remove_subvolume(UUID, "home").expect("remove");
        storage.commit().expect("commit");
        let dir = format!("/tmp/planner/tmp-mp-{UUID}");
        assert_eq!(
            runner.rendered(),
            vec![
                format!("mount -t btrfs /dev/sdb {dir}"),
                format!("btrfs subvolume delete {dir}/home"),
                format!("umount {dir}"),
            ]
        );
    }

    #[test]
    fn removal_wipes_members() {
        let (mut storage, runner) = storage(false);
        storage.remove_btrfs("/dev/sdb").expect("remove");
        assert!(storage.used_by("/dev/sdb").is_empty());
        storage.commit().expect("commit");
        assert_eq!(runner.rendered(), vec!["wipefs -a /dev/sdb"]);
        assert!(storage.find_volume(UUID).is_none());
    }
}
