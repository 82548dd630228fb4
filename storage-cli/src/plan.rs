// SPDX-License-Identifier: GPL-3.0-only

//! Plan files: a detected (or hand written) topology plus the changes to
//! request on it, in order.
//!
//! ```toml
//! [[topology.disks]]
//! device = "/dev/sda"
//! size_k = 20971520
//! label = "gpt"
//!
//! [[operation]]
//! op = "create_partition_any"
//! disk = "/dev/sda"
//! size = "4 GiB"
//! ```

use std::fs;
use std::path::Path;

use anyhow::{Context, anyhow};
use serde::{Deserialize, Serialize};
use storage_contracts::CommandRunner;
use storage_engine::{EngineConfig, Facts, Storage, build_graph};
use storage_sys::{MemoryFstab, MemoryMdadm};
use storage_types::{
    DiskLabel, FsType, MdLevel, MdParity, MountBy, PartitionId, PartitionType, pretty_to_kib,
};
use tracing::debug;

/// A size in KiB, or a human string such as `"1.5 GiB"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Size {
    Kib(u64),
    Pretty(String),
}

impl Size {
    pub fn kib(&self) -> anyhow::Result<u64> {
        match self {
            Self::Kib(k) => Ok(*k),
            Self::Pretty(text) => {
                pretty_to_kib(text).with_context(|| format!("invalid size {text:?}"))
            }
        }
    }
}

fn default_pe_size() -> Size {
    Size::Kib(4096)
}

fn one() -> u32 {
    1
}

fn yes() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    CreatePartition {
        disk: String,
        #[serde(default)]
        kind: PartitionType,
        start: Size,
        size: Size,
    },
    CreatePartitionAny {
        disk: String,
        size: Size,
    },
    CreatePartitionMax {
        disk: String,
        #[serde(default)]
        kind: PartitionType,
    },
    ChangePartitionId {
        device: String,
        id: PartitionId,
    },
    DestroyPartitionTable {
        disk: String,
        label: DiskLabel,
    },
    CreateVolumeGroup {
        name: String,
        #[serde(default = "default_pe_size")]
        pe_size: Size,
        devices: Vec<String>,
    },
    ExtendVolumeGroup {
        name: String,
        devices: Vec<String>,
    },
    ReduceVolumeGroup {
        name: String,
        devices: Vec<String>,
    },
    RemoveVolumeGroup {
        name: String,
    },
    CreateLogicalVolume {
        vg: String,
        name: String,
        size: Size,
        #[serde(default = "one")]
        stripes: u32,
        #[serde(default)]
        stripe_size: Option<Size>,
    },
    ChangeLvStripeCount {
        vg: String,
        name: String,
        stripes: u32,
    },
    ChangeLvStripeSize {
        vg: String,
        name: String,
        stripe_size: Size,
    },
    CreateRaid {
        number: u32,
        level: MdLevel,
        devices: Vec<String>,
        #[serde(default)]
        spares: Vec<String>,
    },
    ExtendRaid {
        number: u32,
        device: String,
    },
    ShrinkRaid {
        number: u32,
        device: String,
    },
    ChangeRaidLevel {
        number: u32,
        level: MdLevel,
    },
    ChangeRaidChunk {
        number: u32,
        chunk: Size,
    },
    ChangeRaidParity {
        number: u32,
        parity: MdParity,
    },
    RemoveRaid {
        number: u32,
        #[serde(default)]
        destroy_superblock: bool,
    },
    CreateLoop {
        file: String,
        #[serde(default)]
        reuse: bool,
        size: Size,
    },
    RemoveLoop {
        /// Backing file or loop device.
        target: String,
        #[serde(default)]
        remove_file: bool,
    },
    RemoveDmTable {
        name: String,
    },
    CreateSubvolume {
        device: String,
        path: String,
    },
    RemoveSubvolume {
        device: String,
        path: String,
    },
    ExtendBtrfs {
        device: String,
        devices: Vec<String>,
    },
    ShrinkBtrfs {
        device: String,
        devices: Vec<String>,
    },
    RemoveBtrfs {
        device: String,
    },
    ResizeVolume {
        device: String,
        size: Size,
    },
    RemoveVolume {
        device: String,
    },
    ChangeFormat {
        device: String,
        #[serde(default = "yes")]
        format: bool,
        /// Falls back to the configured default filesystem.
        #[serde(default)]
        fs: Option<FsType>,
    },
    ChangeLabel {
        device: String,
        label: String,
    },
    ChangeMountPoint {
        device: String,
        mount_point: String,
    },
    ChangeMountBy {
        device: String,
        mount_by: MountBy,
    },
    ChangeFstabOptions {
        device: String,
        options: String,
    },
    ChangeMkfsOptions {
        device: String,
        options: String,
    },
    ChangeTunefsOptions {
        device: String,
        options: String,
    },
    ChangeDescription {
        device: String,
        text: String,
    },
    SetIgnoreFstab {
        device: String,
        #[serde(default = "yes")]
        ignore: bool,
    },
}

/// Engine errors carry their numeric status into the report.
pub(crate) fn engine<T>(result: storage_engine::Result<T>) -> anyhow::Result<T> {
    result.map_err(|e| anyhow!("{e} (status {})", e.code()))
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Self::CreatePartition { .. } => "create_partition",
            Self::CreatePartitionAny { .. } => "create_partition_any",
            Self::CreatePartitionMax { .. } => "create_partition_max",
            Self::ChangePartitionId { .. } => "change_partition_id",
            Self::DestroyPartitionTable { .. } => "destroy_partition_table",
            Self::CreateVolumeGroup { .. } => "create_volume_group",
            Self::ExtendVolumeGroup { .. } => "extend_volume_group",
            Self::ReduceVolumeGroup { .. } => "reduce_volume_group",
            Self::RemoveVolumeGroup { .. } => "remove_volume_group",
            Self::CreateLogicalVolume { .. } => "create_logical_volume",
            Self::ChangeLvStripeCount { .. } => "change_lv_stripe_count",
            Self::ChangeLvStripeSize { .. } => "change_lv_stripe_size",
            Self::CreateRaid { .. } => "create_raid",
            Self::ExtendRaid { .. } => "extend_raid",
            Self::ShrinkRaid { .. } => "shrink_raid",
            Self::ChangeRaidLevel { .. } => "change_raid_level",
            Self::ChangeRaidChunk { .. } => "change_raid_chunk",
            Self::ChangeRaidParity { .. } => "change_raid_parity",
            Self::RemoveRaid { .. } => "remove_raid",
            Self::CreateLoop { .. } => "create_loop",
            Self::RemoveLoop { .. } => "remove_loop",
            Self::RemoveDmTable { .. } => "remove_dm_table",
            Self::CreateSubvolume { .. } => "create_subvolume",
            Self::RemoveSubvolume { .. } => "remove_subvolume",
            Self::ExtendBtrfs { .. } => "extend_btrfs",
            Self::ShrinkBtrfs { .. } => "shrink_btrfs",
            Self::RemoveBtrfs { .. } => "remove_btrfs",
            Self::ResizeVolume { .. } => "resize_volume",
            Self::RemoveVolume { .. } => "remove_volume",
            Self::ChangeFormat { .. } => "change_format",
            Self::ChangeLabel { .. } => "change_label",
            Self::ChangeMountPoint { .. } => "change_mount_point",
            Self::ChangeMountBy { .. } => "change_mount_by",
            Self::ChangeFstabOptions { .. } => "change_fstab_options",
            Self::ChangeMkfsOptions { .. } => "change_mkfs_options",
            Self::ChangeTunefsOptions { .. } => "change_tunefs_options",
            Self::ChangeDescription { .. } => "change_description",
            Self::SetIgnoreFstab { .. } => "set_ignore_fstab",
        }
    }

    /// Request the change on `storage`. Nothing runs until a commit.
    pub fn apply(&self, storage: &mut Storage) -> anyhow::Result<()> {
        match self {
            Self::CreatePartition {
                disk,
                kind,
                start,
                size,
            } => {
                let device =
                    engine(storage.create_partition(disk, *kind, start.kib()?, size.kib()?))?;
                debug!("planned {device}");
            }
            Self::CreatePartitionAny { disk, size } => {
                let device = engine(storage.create_partition_any(disk, size.kib()?))?;
                debug!("planned {device}");
            }
            Self::CreatePartitionMax { disk, kind } => {
                let device = engine(storage.create_partition_max(disk, *kind))?;
                debug!("planned {device}");
            }
            Self::ChangePartitionId { device, id } => {
                engine(storage.change_partition_id(device, *id))?
            }
            Self::DestroyPartitionTable { disk, label } => {
                engine(storage.destroy_partition_table(disk, *label))?
            }
            Self::CreateVolumeGroup {
                name,
                pe_size,
                devices,
            } => {
                engine(storage.create_volume_group(name, pe_size.kib()?, devices))?;
            }
            Self::ExtendVolumeGroup { name, devices } => {
                engine(storage.extend_volume_group(name, devices))?
            }
            Self::ReduceVolumeGroup { name, devices } => {
                engine(storage.reduce_volume_group(name, devices))?
            }
            Self::RemoveVolumeGroup { name } => engine(storage.remove_volume_group(name))?,
            Self::CreateLogicalVolume {
                vg,
                name,
                size,
                stripes,
                stripe_size,
            } => {
                let stripe_size_k = match stripe_size {
                    Some(s) => s.kib()?,
                    None => 0,
                };
                engine(storage.create_logical_volume(
                    vg,
                    name,
                    size.kib()?,
                    *stripes,
                    stripe_size_k,
                ))?;
            }
            Self::ChangeLvStripeCount { vg, name, stripes } => {
                engine(storage.change_lv_stripe_count(vg, name, *stripes))?
            }
            Self::ChangeLvStripeSize {
                vg,
                name,
                stripe_size,
            } => engine(storage.change_lv_stripe_size(vg, name, stripe_size.kib()?))?,
            Self::CreateRaid {
                number,
                level,
                devices,
                spares,
            } => {
                engine(storage.create_raid(*number, *level, devices, spares))?;
            }
            Self::ExtendRaid { number, device } => engine(storage.extend_raid(*number, device))?,
            Self::ShrinkRaid { number, device } => engine(storage.shrink_raid(*number, device))?,
            Self::ChangeRaidLevel { number, level } => {
                engine(storage.change_raid_level(*number, *level))?
            }
            Self::ChangeRaidChunk { number, chunk } => {
                engine(storage.change_raid_chunk(*number, chunk.kib()?))?
            }
            Self::ChangeRaidParity { number, parity } => {
                engine(storage.change_raid_parity(*number, *parity))?
            }
            Self::RemoveRaid {
                number,
                destroy_superblock,
            } => engine(storage.remove_raid(*number, *destroy_superblock))?,
            Self::CreateLoop { file, reuse, size } => {
                let device = engine(storage.create_loop(file, *reuse, size.kib()?))?;
                debug!("planned {device} for {file}");
            }
            Self::RemoveLoop {
                target,
                remove_file,
            } => engine(storage.remove_loop(target, *remove_file))?,
            Self::RemoveDmTable { name } => engine(storage.remove_dm_table(name))?,
            Self::CreateSubvolume { device, path } => {
                engine(storage.create_subvolume(device, path))?
            }
            Self::RemoveSubvolume { device, path } => {
                engine(storage.remove_subvolume(device, path))?
            }
            Self::ExtendBtrfs { device, devices } => {
                engine(storage.extend_btrfs(device, devices))?
            }
            Self::ShrinkBtrfs { device, devices } => {
                engine(storage.shrink_btrfs(device, devices))?
            }
            Self::RemoveBtrfs { device } => engine(storage.remove_btrfs(device))?,
            Self::ResizeVolume { device, size } => {
                engine(storage.resize_volume(device, size.kib()?))?
            }
            Self::RemoveVolume { device } => engine(storage.remove_volume(device))?,
            Self::ChangeFormat { device, format, fs } => {
                let fs = fs.unwrap_or(storage.config().default_fs);
                engine(storage.change_format(device, *format, fs))?
            }
            Self::ChangeLabel { device, label } => engine(storage.change_label(device, label))?,
            Self::ChangeMountPoint {
                device,
                mount_point,
            } => engine(storage.change_mount_point(device, mount_point))?,
            Self::ChangeMountBy { device, mount_by } => {
                engine(storage.change_mount_by(device, *mount_by))?
            }
            Self::ChangeFstabOptions { device, options } => {
                engine(storage.change_fstab_options(device, options))?
            }
            Self::ChangeMkfsOptions { device, options } => {
                engine(storage.change_mkfs_options(device, options))?
            }
            Self::ChangeTunefsOptions { device, options } => {
                engine(storage.change_tunefs_options(device, options))?
            }
            Self::ChangeDescription { device, text } => {
                engine(storage.change_description(device, text))?
            }
            Self::SetIgnoreFstab { device, ignore } => {
                engine(storage.set_ignore_fstab(device, *ignore))?
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Plan {
    pub topology: Facts,
    #[serde(rename = "operation")]
    pub operations: Vec<Operation>,
}

impl Plan {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text =
            fs::read_to_string(path).with_context(|| format!("cannot read {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("invalid plan {}", path.display()))
    }

    pub fn parse(text: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// The plan's topology as an in-memory storage instance. The fstab
    /// entries of the topology seed the mount table; nothing is locked.
    pub fn open(&self, config: EngineConfig, runner: Box<dyn CommandRunner>) -> Storage {
        let graph = build_graph(&self.topology, &config);
        Storage::new(
            graph,
            config,
            runner,
            Box::new(MemoryFstab::with_entries(self.topology.fstab.clone())),
            Box::new(MemoryMdadm::new()),
        )
    }

    /// Apply every operation in order, stopping at the first refusal.
    pub fn apply(&self, storage: &mut Storage) -> anyhow::Result<()> {
        for (index, operation) in self.operations.iter().enumerate() {
            operation
                .apply(storage)
                .with_context(|| format!("operation {} ({})", index + 1, operation.name()))?;
        }
        debug!("applied {} operation(s)", self.operations.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use storage_sys::RecordingRunner;
    use storage_types::{CommitStage, GIB};

    const EXAMPLE: &str = include_str!("../plans/example.toml");

    fn open(plan: &Plan) -> (Storage, RecordingRunner) {
        let runner = RecordingRunner::new();
        let storage = plan.open(EngineConfig::default(), Box::new(runner.clone()));
        (storage, runner)
    }

    #[test]
    fn sizes_accept_numbers_and_units() {
        assert_eq!(Size::Kib(2048).kib().expect("kib"), 2048);
        assert_eq!(Size::Pretty("4 GiB".to_string()).kib().expect("gib"), 4 * GIB);
        assert!(Size::Pretty("four".to_string()).kib().is_err());
    }

    #[test]
    fn operations_read_with_defaults() {
        let plan = Plan::parse(
            r#"
[[operation]]
op = "create_logical_volume"
vg = "system"
name = "root"
size = "2 GiB"

[[operation]]
op = "change_format"
device = "/dev/system/root"
"#,
        )
        .expect("parse");
        assert_eq!(
            plan.operations[0],
            Operation::CreateLogicalVolume {
                vg: "system".to_string(),
                name: "root".to_string(),
                size: Size::Pretty("2 GiB".to_string()),
                stripes: 1,
                stripe_size: None,
            }
        );
        assert_eq!(
            plan.operations[1],
            Operation::ChangeFormat {
                device: "/dev/system/root".to_string(),
                format: true,
                fs: None,
            }
        );
    }

    #[test]
    fn unknown_operation_is_rejected() {
        assert!(Plan::parse("[[operation]]\nop = \"defragment\"\n").is_err());
    }

    #[test]
    fn example_plan_previews_and_commits() {
        let plan = Plan::parse(EXAMPLE).expect("example");
        let (mut storage, runner) = open(&plan);
        plan.apply(&mut storage).expect("apply");

        let stages: Vec<CommitStage> = storage
            .get_commit_actions()
            .iter()
            .map(|a| a.stage)
            .collect();
        assert!(stages.contains(&CommitStage::Increase));
        assert!(stages.contains(&CommitStage::Format));

        storage.commit().expect("commit");
        let rendered = runner.rendered();
        assert!(rendered.iter().any(|c| c == "pvcreate -ff -y /dev/sda2"));
        assert!(rendered.iter().any(|c| c.starts_with("vgcreate -s 4096k system")));
        assert!(rendered.iter().any(|c| c.starts_with("lvcreate ")));
        assert!(storage.get_commit_actions().is_empty());
    }

    #[test]
    fn refusal_names_the_operation_and_status() {
        let plan = Plan::parse(
            r#"
[[topology.disks]]
device = "/dev/sda"
size_k = 1048576
label = "gpt"

[[operation]]
op = "create_volume_group"
name = "vg"
devices = ["/dev/sdz"]
"#,
        )
        .expect("parse");
        let (mut storage, runner) = open(&plan);
        let error = plan.apply(&mut storage).expect_err("unknown device");
        let report = format!("{error:#}");
        assert!(report.starts_with("operation 1 (create_volume_group)"), "{report}");
        assert!(report.contains("status -"), "{report}");
        assert!(runner.rendered().is_empty());
    }
}
