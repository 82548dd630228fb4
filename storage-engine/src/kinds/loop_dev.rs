// SPDX-License-Identifier: GPL-3.0-only

//! File-backed loop devices.

use std::path::Path;

use storage_contracts::CommandLine;
use storage_types::ContainerKind;
use tracing::debug;

use super::volume_of;
use crate::commit::Ctx;
use crate::device::Device;
use crate::error::{Error, LoopError, Result, VolumeError};
use crate::graph::DeviceGraph;
use crate::storage::Storage;
use crate::volume::{LoopData, Volume, VolumeData, VolumeId};

impl Storage {
    fn loops(&self) -> impl Iterator<Item = &Volume> {
        self.graph
            .pool(ContainerKind::Loop)
            .into_iter()
            .flat_map(|c| c.live_volumes())
            .filter(|v| v.loop_data().is_some())
    }

    fn loop_by_file_or_device(&self, key: &str) -> Option<VolumeId> {
        self.loops()
            .find(|v| v.dev.matches(key) || v.loop_data().is_some_and(|l| l.file == key))
            .map(|v| v.id)
    }

    fn check_loop_file(&self, file: &str, except: Option<VolumeId>) -> Result<()> {
        let taken = self
            .loops()
            .filter(|v| Some(v.id) != except)
            .any(|v| v.loop_data().is_some_and(|l| l.file == file));
        if taken {
            return Err(LoopError::DuplicateFile(file.to_string()).into());
        }
        Ok(())
    }

    /// Lowest loop number no volume of the pool holds, deleted ones included.
    fn next_free_loop(&self) -> u32 {
        let taken: Vec<u32> = self
            .graph
            .pool(ContainerKind::Loop)
            .map(|c| c.owned_volumes().iter().map(|v| v.num).collect())
            .unwrap_or_default();
        (0..).find(|n| !taken.contains(n)).unwrap_or_default()
    }

    pub fn create_loop(&mut self, file: &str, reuse: bool, size_k: u64) -> Result<String> {
        self.writable(LoopError::ChangeReadonly)?;
        self.check_loop_file(file, None)?;

        let num = self.next_free_loop();
        let device = format!("/dev/loop{num}");
        let cid = self.graph.ensure_pool(ContainerKind::Loop);
        let vid = self.graph.new_volume_id();
        let mut dev = Device::new(format!("loop{num}"), device.as_str(), size_k);
        dev.created = true;
        let mut vol = Volume::new(
            vid,
            cid,
            dev,
            num,
            VolumeData::Loop(LoopData {
                file: file.to_string(),
                reuse,
                delete_file: false,
            }),
        );
        vol.numeric = true;
        vol.mount_by = self.config.default_mount_by;
        vol.orig_mount_by = vol.mount_by;
        self.graph.add_volume(vol);
        debug!("planned {device} on {file}");
        Ok(device)
    }

    pub fn update_loop(&mut self, device: &str, file: &str, reuse: bool, size_k: u64) -> Result<()> {
        self.writable(LoopError::ChangeReadonly)?;
        let vid = self
            .loops()
            .find(|v| v.dev.matches(device))
            .map(|v| v.id)
            .ok_or_else(|| LoopError::UnknownFile(device.to_string()))?;
        if !volume_of(&self.graph, vid)?.created() {
            return Err(LoopError::ModifyExisting.into());
        }
        self.check_loop_file(file, Some(vid))?;

        let vol = self.volume_mut(vid)?;
        vol.data = VolumeData::Loop(LoopData {
            file: file.to_string(),
            reuse,
            delete_file: false,
        });
        self.graph.mark_resize(vid, size_k);
        Ok(())
    }

    pub fn remove_loop(&mut self, file_or_device: &str, remove_file: bool) -> Result<()> {
        self.writable(LoopError::ChangeReadonly)?;
        let vid = self
            .loop_by_file_or_device(file_or_device)
            .ok_or_else(|| LoopError::UnknownFile(file_or_device.to_string()))?;
        let device = volume_of(&self.graph, vid)?.device().to_string();
        self.release_users(&device, LoopError::RemoveUsedBy)?;

        let vol = self.volume_mut(vid)?;
        if vol.created() {
            self.graph.remove_volume(vid);
            return Ok(());
        }
        if let VolumeData::Loop(l) = &mut vol.data {
            l.delete_file = remove_file;
        }
        self.graph.mark_deleted(vid);
        Ok(())
    }
}

fn loop_of(vol: &Volume) -> Result<&LoopData> {
    vol.loop_data()
        .ok_or_else(|| Error::internal(format!("{} is not a loop device", vol.device())))
}

pub(crate) fn commit_create(graph: &mut DeviceGraph, ctx: &mut Ctx, vid: VolumeId) -> Result<()> {
    let vol = volume_of(graph, vid)?;
    let data = loop_of(&vol)?;
    let file = ctx.config.prefixed(&data.file);

    // a dry run cannot look at the file, so reuse is taken at its word
    let keep = data.reuse && (!ctx.executes() || Path::new(&file).exists());
    if keep {
        debug!("reusing {file}");
    } else {
        if ctx.executes() {
            if let Some(parent) = Path::new(&file).parent() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    Error::internal(format!("cannot create {}: {e}", parent.display()))
                })?;
            }
        }
        ctx.run(
            CommandLine::new("dd").args([
                "if=/dev/zero".to_string(),
                format!("of={file}"),
                "bs=1k".to_string(),
                "count=0".to_string(),
                format!("seek={}", vol.dev.size_k),
            ]),
            LoopError::FileCreateFailed,
        )?;
    }
    ctx.run(
        CommandLine::new("losetup").args([vol.device(), file.as_str()]),
        VolumeError::LosetupFailed,
    )?;
    Ok(())
}

pub(crate) fn commit_remove(graph: &mut DeviceGraph, ctx: &mut Ctx, vid: VolumeId) -> Result<()> {
    let vol = volume_of(graph, vid)?;
    let data = loop_of(&vol)?;
    ctx.run(
        CommandLine::new("losetup").args(["-d", vol.device()]),
        VolumeError::LoUnsetupFailed,
    )?;
    if data.delete_file {
        let file = ctx.config.prefixed(&data.file);
        ctx.run(
            CommandLine::new("rm").args(["-f", file.as_str()]),
            LoopError::RemoveFileFailed,
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use storage_sys::{MemoryFstab, MemoryMdadm, RecordingRunner};
    use storage_types::{FsType, GIB};

    fn storage(graph: DeviceGraph) -> (Storage, RecordingRunner) {
        let runner = RecordingRunner::new();
        let storage = Storage::new(
            graph,
            EngineConfig::default(),
            Box::new(runner.clone()),
            Box::new(MemoryFstab::new()),
            Box::new(MemoryMdadm::new()),
        );
        (storage, runner)
    }

    /// A graph with /dev/loop0 already set up on /srv/images/old.img.
    fn detected() -> DeviceGraph {
        let mut graph = DeviceGraph::new();
        let cid = graph.ensure_pool(ContainerKind::Loop);
        let vid = graph.new_volume_id();
        let mut vol = Volume::new(
            vid,
            cid,
            Device::new("loop0", "/dev/loop0", GIB),
            0,
            VolumeData::Loop(LoopData {
                file: "/srv/images/old.img".to_string(),
                reuse: true,
                delete_file: false,
            }),
        );
        vol.numeric = true;
        graph.add_volume(vol);
        graph
    }

    #[test]
    fn numbers_and_files_are_unique() {
        let (mut storage, _) = storage(detected());
        assert_eq!(
            storage.create_loop("/srv/images/old.img", false, GIB).map_err(|e| e.code()),
            Err(-7001)
        );
        assert_eq!(
            storage.create_loop("/srv/images/new.img", false, GIB).as_deref(),
            Ok("/dev/loop1")
        );
        assert_eq!(
            storage.update_loop("/dev/loop0", "/srv/x.img", false, GIB).map_err(|e| e.code()),
            Err(-7010)
        );
        storage
            .update_loop("/dev/loop1", "/srv/images/other.img", true, 2 * GIB)
            .expect("update");
        let vol = storage.find_volume("/dev/loop1").expect("loop1");
        assert_eq!(vol.dev.size_k, 2 * GIB);
        assert_eq!(vol.loop_data().map(|l| l.reuse), Some(true));
    }

    #[test]
    fn commit_creates_file_then_device() {
        let (mut storage, runner) = storage(DeviceGraph::new());
        storage.create_loop("/srv/disk.img", false, 1024).expect("loop");
        storage.change_format("/dev/loop0", true, FsType::Ext4).expect("format");
        storage.commit().expect("commit");
        assert_eq!(
            runner.rendered(),
            vec![
                "dd if=/dev/zero of=/srv/disk.img bs=1k count=0 seek=1024",
                "losetup /dev/loop0 /srv/disk.img",
                "mke2fs -t ext4 -v /dev/loop0",
                "blkid -s UUID -o value /dev/loop0",
            ]
        );
    }

    #[test]
    fn removal_can_delete_the_file() {
        let (mut storage, runner) = storage(detected());
        assert_eq!(storage.remove_loop("/nope.img", true).map_err(|e| e.code()), Err(-7002));
        storage.remove_loop("/srv/images/old.img", true).expect("remove");
        assert!(storage.find_volume("/dev/loop0").is_none());
        storage.commit().expect("commit");
        assert_eq!(
            runner.rendered(),
            vec!["losetup -d /dev/loop0", "rm -f /srv/images/old.img"]
        );
    }
}
