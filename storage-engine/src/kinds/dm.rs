// SPDX-License-Identifier: GPL-3.0-only

//! Device-mapper tables. Only detected tables exist here, and the one
//! change they accept is removal.

use storage_contracts::CommandLine;
use storage_types::{ContainerKind, UsedBy, UsedByKind};

use super::volume_of;
use crate::commit::Ctx;
use crate::error::{DmError, Result};
use crate::graph::DeviceGraph;
use crate::storage::Storage;
use crate::volume::VolumeId;

impl Storage {
    pub fn remove_dm_table(&mut self, name: &str) -> Result<()> {
        self.writable(DmError::ChangeReadonly)?;
        let vid = self
            .graph
            .pool(ContainerKind::Dm)
            .and_then(|c| c.live_volumes().find(|v| v.dev.matches(name)))
            .map(|v| v.id)
            .ok_or_else(|| DmError::UnknownTable(name.to_string()))?;
        let vol = volume_of(&self.graph, vid)?;
        self.release_users(vol.device(), DmError::RemoveUsedBy)?;
        self.graph
            .clear_used_by(&UsedBy::new(UsedByKind::Dm, vol.device()));
        if vol.created() {
            self.graph.remove_volume(vid);
        } else {
            self.graph.mark_deleted(vid);
        }
        Ok(())
    }
}

pub(crate) fn commit_remove(graph: &mut DeviceGraph, ctx: &mut Ctx, vid: VolumeId) -> Result<()> {
    let vol = volume_of(graph, vid)?;
    ctx.run(
        CommandLine::new("dmsetup").args(["remove", vol.dev.name.as_str()]),
        DmError::RemoveFailed,
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::container::{ContainerData, DiskData};
    use crate::device::Device;
    use crate::volume::{DmData, Volume, VolumeData};
    use storage_sys::{MemoryFstab, MemoryMdadm, RecordingRunner};
    use storage_types::{DiskLabel, GIB};

    /// Disk sdb mapped whole by the linear table `crypt-data`.
    fn storage() -> (Storage, RecordingRunner) {
        let mut graph = DeviceGraph::new();
        graph.add_container(
            Device::new("sdb", "/dev/sdb", GIB),
            ContainerData::Disk(DiskData {
                label: DiskLabel::Gpt,
                model: None,
                del_ptable: false,
            }),
        );
        let cid = graph.ensure_pool(ContainerKind::Dm);
        let vid = graph.new_volume_id();
        graph.add_volume(Volume::new(
            vid,
            cid,
            Device::new("crypt-data", "/dev/mapper/crypt-data", GIB),
            0,
            VolumeData::Dm(DmData {
                target: "linear".to_string(),
                devices: vec!["/dev/sdb".to_string()],
            }),
        ));
        graph.add_used_by(
            "/dev/sdb",
            UsedBy::new(UsedByKind::Dm, "/dev/mapper/crypt-data"),
        );
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

    #[test]
    fn removal_frees_mapped_devices() {
        let (mut storage, runner) = storage();
        assert_eq!(
            storage.remove_dm_table("other").map_err(|e| e.code()),
            Err(-10001)
        );
        storage.remove_dm_table("crypt-data").expect("remove");
        assert!(storage.used_by("/dev/sdb").is_empty());
        storage.commit().expect("commit");
        assert_eq!(runner.rendered(), vec!["dmsetup remove crypt-data"]);
        assert!(storage.find_volume("/dev/mapper/crypt-data").is_none());
    }

    #[test]
    fn table_in_use_needs_recursive_removal() {
        let (mut storage, _) = storage();
        storage
            .create_volume_group("vg", 4096, &["/dev/mapper/crypt-data".to_string()])
            .expect("vg");
        assert_eq!(
            storage.remove_dm_table("crypt-data").map_err(|e| e.code()),
            Err(-10002)
        );
        storage.config.recursive_removal = true;
        storage.remove_dm_table("crypt-data").expect("recursive");
        assert!(storage.find_container("vg").is_none());
    }
}
