// SPDX-License-Identifier: GPL-3.0-only

//! The caller-facing storage instance.
//!
//! Every mutation only records pending state on the graph; nothing runs
//! until `commit`. Per-kind operations live in `kinds::*` as further
//! `impl Storage` blocks.

use std::collections::BTreeMap;
use std::path::PathBuf;

use storage_contracts::{CommandLine, CommandRunner, MountTable, RaidConfig};
use storage_sys::{EtcFstab, EtcMdadm, StorageLock};
use storage_types::{
    CommitInfo, ContainerInfo, ContainerKind, FsType, MountBy, UsedBy, UsedByKind,
    VolumeGroupInfo, VolumeInfo,
};
use tracing::{debug, info};

use crate::commit::{self, Ctx, PlannedAction};
use crate::comparator;
use crate::config::EngineConfig;
use crate::container::Container;
use crate::error::{Error, Result, StorageError, VolumeError};
use crate::graph::DeviceGraph;
use crate::probe;
use crate::volume::{Volume, VolumeId};

/// Which subsystems this instance has switched on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Activation {
    pub md: bool,
    pub lvm: bool,
    pub dm: bool,
}

pub struct Storage {
    pub(crate) graph: DeviceGraph,
    pub(crate) config: EngineConfig,
    runner: Box<dyn CommandRunner>,
    mount_table: Box<dyn MountTable>,
    raid_config: Box<dyn RaidConfig>,
    backups: BTreeMap<String, DeviceGraph>,
    activation: Activation,
    lock: Option<StorageLock>,
}

impl Storage {
    pub fn new(
        graph: DeviceGraph,
        config: EngineConfig,
        runner: Box<dyn CommandRunner>,
        mount_table: Box<dyn MountTable>,
        raid_config: Box<dyn RaidConfig>,
    ) -> Self {
        Self {
            graph,
            config,
            runner,
            mount_table,
            raid_config,
            backups: BTreeMap::new(),
            activation: Activation::default(),
            lock: None,
        }
    }

    /// Lock, load the config files and probe the running system.
    pub fn open(config: EngineConfig, mut runner: Box<dyn CommandRunner>) -> Result<Self> {
        let lock = StorageLock::acquire(&config.lock_path, config.readonly)?;
        let prefixed = |path: &PathBuf| PathBuf::from(config.prefixed(&path.to_string_lossy()));
        let fstab = EtcFstab::load(prefixed(&config.fstab_path))?;
        let mdadm = EtcMdadm::load(prefixed(&config.mdadm_conf_path))?;

        let facts = probe::collect(runner.as_mut(), fstab.entries())?;
        let graph = probe::build_graph(&facts, &config);
        info!(
            "probed {} container(s), {} volume(s)",
            graph.containers().count(),
            graph.volumes().count()
        );

        let mut storage = Self::new(graph, config, runner, Box::new(fstab), Box::new(mdadm));
        storage.lock = Some(lock);
        Ok(storage)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn graph(&self) -> &DeviceGraph {
        &self.graph
    }

    pub fn is_locked(&self) -> bool {
        self.lock.is_some()
    }

    pub fn activation(&self) -> Activation {
        self.activation
    }

    pub(crate) fn writable(&self, readonly_error: impl Into<Error>) -> Result<()> {
        if self.config.readonly {
            Err(readonly_error.into())
        } else {
            Ok(())
        }
    }

    pub(crate) fn volume_id(&self, device: &str) -> Result<VolumeId> {
        self.graph
            .find_volume_id(device)
            .ok_or_else(|| StorageError::VolumeNotFound(device.to_string()).into())
    }

    pub(crate) fn volume_mut(&mut self, id: VolumeId) -> Result<&mut Volume> {
        self.graph
            .volume_mut(id)
            .ok_or_else(|| Error::internal(format!("volume {id:?} is not in the graph")))
    }

    fn container_of(&self, device: &str) -> Result<(&Container, &Volume)> {
        let vol = self
            .graph
            .find_volume(device)
            .ok_or_else(|| StorageError::VolumeNotFound(device.to_string()))?;
        let container = self
            .graph
            .container(vol.container)
            .ok_or_else(|| StorageError::ContainerNotFound(device.to_string()))?;
        Ok((container, vol))
    }

    /// Fail with `in_use` when something consumes `device`, or remove the
    /// consumers first when recursive removal is on.
    pub(crate) fn release_users(&mut self, device: &str, in_use: impl Into<Error>) -> Result<()> {
        let users = self.graph.used_by(device);
        if users.is_empty() {
            return Ok(());
        }
        if !self.config.recursive_removal {
            return Err(in_use.into());
        }
        for edge in users {
            debug!("removing {edge} which uses {device}");
            self.remove_user(&edge)?;
        }
        Ok(())
    }

    fn remove_user(&mut self, edge: &UsedBy) -> Result<()> {
        match edge.kind {
            UsedByKind::Lvm => {
                let name = edge.device.trim_start_matches("/dev/").to_string();
                self.remove_volume_group(&name)
            }
            UsedByKind::Md | UsedByKind::Dm | UsedByKind::Btrfs => self.remove_volume(&edge.device),
        }
    }

    pub fn remove_volume(&mut self, device: &str) -> Result<()> {
        let (container, vol) = self.container_of(device)?;
        let device = vol.device().to_string();
        match container.kind() {
            ContainerKind::Disk => self.remove_partition(&device),
            ContainerKind::Lvm => self.remove_logical_volume(&device),
            ContainerKind::Md => {
                let num = vol.num;
                self.remove_raid(num, true)
            }
            ContainerKind::Loop => self.remove_loop(&device, false),
            ContainerKind::Dm => {
                let name = vol.dev.name.clone();
                self.remove_dm_table(&name)
            }
            ContainerKind::Btrfs => {
                let name = vol.dev.name.clone();
                self.remove_btrfs(&name)
            }
        }
    }

    pub fn resize_volume(&mut self, device: &str, size_k: u64) -> Result<()> {
        let (container, vol) = self.container_of(device)?;
        let device = vol.device().to_string();
        match container.kind() {
            ContainerKind::Disk => self.resize_partition(&device, size_k),
            ContainerKind::Lvm => self.resize_logical_volume(&device, size_k),
            _ => Err(VolumeError::ResizeUnsupportedByContainer.into()),
        }
    }

    pub fn change_format(&mut self, device: &str, format: bool, fs: FsType) -> Result<()> {
        self.writable(StorageError::ChangeReadonly)?;
        let id = self.volume_id(device)?;
        let vol = self.volume_mut(id)?;
        if vol.dev.is_used() {
            return Err(VolumeError::AlreadyInUse.into());
        }
        if format {
            if vol.is_extended() {
                return Err(VolumeError::FormatExtendedUnsupported.into());
            }
            if !fs.is_formatted() {
                return Err(VolumeError::FormatUnknownFs.into());
            }
            vol.format = true;
            vol.fs = fs;
            if !fs.supports_label() {
                vol.label.clear();
            }
            if vol.mount_by == MountBy::Label && !fs.supports_label() {
                vol.mount_by = MountBy::Device;
            }
        } else {
            vol.format = false;
            vol.fs = vol.detected_fs;
            vol.label = vol.orig_label.clone();
            vol.mkfs_opt.clear();
            vol.tunefs_opt.clear();
        }
        debug!("{device}: format={format} fs={}", vol.fs);
        Ok(())
    }

    pub fn change_label(&mut self, device: &str, label: &str) -> Result<()> {
        self.writable(StorageError::ChangeReadonly)?;
        let id = self.volume_id(device)?;
        let vol = self.volume_mut(id)?;
        if vol.fs.is_formatted() && !vol.fs.supports_label() {
            return Err(VolumeError::LabelNotSupported.into());
        }
        let max = match vol.fs {
            FsType::Xfs => 12,
            FsType::Btrfs => 255,
            _ => 16,
        };
        if label.len() > max {
            return Err(VolumeError::LabelTooLong.into());
        }
        vol.label = label.to_string();
        Ok(())
    }

    pub fn change_mount_point(&mut self, device: &str, mount_point: &str) -> Result<()> {
        self.writable(StorageError::ChangeReadonly)?;
        let valid = mount_point.is_empty() || mount_point == "swap" || mount_point.starts_with('/');
        if !valid {
            return Err(VolumeError::MountPointInvalid(mount_point.to_string()).into());
        }
        let id = self.volume_id(device)?;
        let vol = self.volume_mut(id)?;
        if vol.is_extended() {
            return Err(VolumeError::MountExtendedUnsupported.into());
        }
        vol.mount_point = mount_point.to_string();
        Ok(())
    }

    pub fn change_mount_by(&mut self, device: &str, mount_by: MountBy) -> Result<()> {
        self.writable(StorageError::ChangeReadonly)?;
        let id = self.volume_id(device)?;
        let vol = self.volume_mut(id)?;
        let supported = match mount_by {
            MountBy::Label => vol.fs.supports_label(),
            MountBy::Uuid => vol.fs.is_formatted(),
            _ => true,
        };
        if !supported {
            return Err(VolumeError::MountByUnsupportedByFs.into());
        }
        vol.mount_by = mount_by;
        Ok(())
    }

    pub fn change_fstab_options(&mut self, device: &str, options: &str) -> Result<()> {
        self.writable(StorageError::ChangeReadonly)?;
        let id = self.volume_id(device)?;
        self.volume_mut(id)?.fstab_opt = options.trim().to_string();
        Ok(())
    }

    pub fn change_mkfs_options(&mut self, device: &str, options: &str) -> Result<()> {
        self.writable(StorageError::ChangeReadonly)?;
        let id = self.volume_id(device)?;
        self.volume_mut(id)?.mkfs_opt = options.trim().to_string();
        Ok(())
    }

    pub fn change_tunefs_options(&mut self, device: &str, options: &str) -> Result<()> {
        self.writable(StorageError::ChangeReadonly)?;
        let id = self.volume_id(device)?;
        self.volume_mut(id)?.tunefs_opt = options.trim().to_string();
        Ok(())
    }

    pub fn change_description(&mut self, device: &str, text: &str) -> Result<()> {
        self.writable(StorageError::ChangeReadonly)?;
        let id = self.volume_id(device)?;
        self.volume_mut(id)?.description = text.to_string();
        Ok(())
    }

    pub fn set_ignore_fstab(&mut self, device: &str, ignore: bool) -> Result<()> {
        self.writable(StorageError::ChangeReadonly)?;
        let id = self.volume_id(device)?;
        self.volume_mut(id)?.ignore_fstab = ignore;
        Ok(())
    }

    pub fn containers(&self) -> impl Iterator<Item = &Container> {
        self.graph.containers()
    }

    pub fn volumes(&self) -> impl Iterator<Item = &Volume> {
        self.graph.volumes()
    }

    pub fn find_volume(&self, path: &str) -> Option<&Volume> {
        self.graph.find_volume(path)
    }

    pub fn find_container(&self, name: &str) -> Option<&Container> {
        self.graph.find_container(name)
    }

    pub fn used_by(&self, device: &str) -> Vec<UsedBy> {
        self.graph.used_by(device)
    }

    pub fn container_info(&self) -> Vec<ContainerInfo> {
        self.graph.container_info()
    }

    pub fn volume_info(&self) -> Vec<VolumeInfo> {
        self.graph.volume_info()
    }

    pub fn lvm_vg_info(&self, name: &str) -> Result<VolumeGroupInfo> {
        self.graph
            .lvm_vg_info(name)
            .ok_or_else(|| StorageError::VgNotFound(name.to_string()).into())
    }

    pub fn create_backup_state(&mut self, name: &str) {
        debug!("backup state {name}");
        self.backups.insert(name.to_string(), self.graph.clone());
    }

    pub fn restore_backup_state(&mut self, name: &str) -> Result<()> {
        self.writable(StorageError::ChangeReadonly)?;
        let backup = self
            .backups
            .get(name)
            .ok_or_else(|| StorageError::BackupStateNotFound(name.to_string()))?;
        self.graph = backup.clone();
        info!("restored backup state {name}");
        Ok(())
    }

    /// Drop one backup, or all of them for an empty name.
    pub fn remove_backup_state(&mut self, name: &str) -> Result<()> {
        if name.is_empty() {
            self.backups.clear();
            return Ok(());
        }
        self.backups
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| StorageError::BackupStateNotFound(name.to_string()).into())
    }

    pub fn check_backup_state(&self, name: &str) -> bool {
        self.backups.contains_key(name)
    }

    /// Compare two backups; an empty name stands for the live graph.
    pub fn equal_backup_states(&self, a: &str, b: &str, verbose: bool) -> Result<bool> {
        let pick = |name: &str| -> Result<&DeviceGraph> {
            if name.is_empty() {
                Ok(&self.graph)
            } else {
                self.backups
                    .get(name)
                    .ok_or_else(|| StorageError::BackupStateNotFound(name.to_string()).into())
            }
        };
        let (left, right) = (pick(a)?, pick(b)?);
        let equal = comparator::equal_content(left, right);
        if verbose && !equal {
            for line in comparator::log_difference(left, right) {
                info!("{line}");
            }
        }
        Ok(equal)
    }

    /// Pending work in execution order.
    pub fn get_commit_actions(&self) -> Vec<PlannedAction> {
        commit::preview(&self.graph)
    }

    pub fn commit_infos(&self) -> Vec<CommitInfo> {
        self.get_commit_actions()
            .into_iter()
            .map(|action| CommitInfo {
                text: action.full_text(),
                ..action.info()
            })
            .collect()
    }

    pub fn commit(&mut self) -> Result<()> {
        self.writable(StorageError::ChangeReadonly)?;
        let mut ctx = Ctx {
            runner: self.runner.as_mut(),
            mount_table: self.mount_table.as_mut(),
            raid_config: self.raid_config.as_mut(),
            config: &self.config,
        };
        commit::run(&mut self.graph, &mut ctx)
    }

    fn run_activation(&mut self, command: CommandLine) -> Result<()> {
        let command = self.config.bounded_command.apply(command);
        info!("executing {}", command.render());
        let output = self.runner.run(&command)?;
        if !output.ok() {
            debug!("{} exited with {}", command.render(), output.exit_code);
        }
        Ok(())
    }

    /// Assemble or stop MD arrays.
    pub fn activate_md(&mut self, active: bool) -> Result<()> {
        if self.activation.md == active {
            return Ok(());
        }
        let command = if active {
            CommandLine::new("mdadm").args(["--assemble", "--scan"])
        } else {
            CommandLine::new("mdadm").args(["--stop", "--scan"])
        };
        self.run_activation(command)?;
        self.activation.md = active;
        Ok(())
    }

    pub fn activate_lvm(&mut self, active: bool) -> Result<()> {
        if self.activation.lvm == active {
            return Ok(());
        }
        let flag = if active { "y" } else { "n" };
        self.run_activation(CommandLine::new("vgchange").args(["-a", flag]))?;
        self.activation.lvm = active;
        Ok(())
    }

    pub fn activate_dm(&mut self, active: bool) -> Result<()> {
        if self.activation.dm == active {
            return Ok(());
        }
        let command = if active {
            CommandLine::new("dmsetup").arg("version")
        } else {
            CommandLine::new("dmsetup").arg("remove_all")
        };
        self.run_activation(command)?;
        self.activation.dm = active;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::Device;
    use crate::volume::{DmData, VolumeData};
    use storage_sys::{MemoryFstab, MemoryMdadm, RecordingRunner};

    fn storage() -> (Storage, RecordingRunner) {
        let runner = RecordingRunner::new();
        let mut graph = DeviceGraph::new();
        let pool = graph.ensure_pool(ContainerKind::Dm);
        let id = graph.new_volume_id();
        let mut vol = Volume::new(
            id,
            pool,
            Device::new("data", "/dev/mapper/data", 4096),
            0,
            VolumeData::Dm(DmData {
                target: "linear".to_string(),
                devices: Vec::new(),
            }),
        );
        vol.fs = FsType::Ext4;
        vol.detected_fs = FsType::Ext4;
        graph.add_volume(vol);
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
    fn mount_point_must_be_absolute() {
        let (mut storage, _) = storage();
        let error = storage
            .change_mount_point("/dev/mapper/data", "data")
            .expect_err("relative");
        assert_eq!(error.code(), -3019);
        storage.change_mount_point("/dev/mapper/data", "/data").expect("absolute");
    }

    #[test]
    fn format_can_be_cancelled() {
        let (mut storage, _) = storage();
        storage.change_format("/dev/mapper/data", true, FsType::Xfs).expect("format");
        storage.change_label("/dev/mapper/data", "scratch").expect("label");
        assert_eq!(
            storage.change_label("/dev/mapper/data", "much-too-long-label"),
            Err(VolumeError::LabelTooLong.into())
        );
        storage.change_format("/dev/mapper/data", false, FsType::Xfs).expect("cancel");
        let vol = storage.find_volume("data").expect("volume");
        assert_eq!(vol.fs, FsType::Ext4);
        assert!(vol.label.is_empty());
    }

    #[test]
    fn backups_restore_and_compare() {
        let (mut storage, _) = storage();
        storage.create_backup_state("before");
        storage.change_mount_point("/dev/mapper/data", "/srv").expect("mount");
        assert_eq!(storage.equal_backup_states("before", "", false), Ok(false));
        storage.restore_backup_state("before").expect("restore");
        assert_eq!(storage.equal_backup_states("before", "", true), Ok(true));
        assert!(storage.check_backup_state("before"));
        storage.remove_backup_state("").expect("clear");
        assert_eq!(
            storage.restore_backup_state("before").map_err(|e| e.code()),
            Err(-2024)
        );
    }

    #[test]
    fn readonly_instance_refuses_changes() {
        let (mut storage, runner) = storage();
        storage.config.readonly = true;
        assert_eq!(
            storage.change_mount_point("/dev/mapper/data", "/srv").map_err(|e| e.code()),
            Err(-2004)
        );
        assert_eq!(
            storage.change_description("/dev/mapper/data", "scratch").map_err(|e| e.code()),
            Err(-2004)
        );
        assert_eq!(
            storage.set_ignore_fstab("/dev/mapper/data", true).map_err(|e| e.code()),
            Err(-2004)
        );
        let vol = storage.find_volume("/dev/mapper/data").expect("data");
        assert!(vol.description.is_empty());
        assert!(!vol.ignore_fstab);
        assert_eq!(storage.commit().map_err(|e| e.code()), Err(-2004));
        assert!(runner.commands().is_empty());
    }

    #[test]
    fn activation_runs_once_per_state() {
        let (mut storage, runner) = storage();
        storage.activate_lvm(true).expect("activate");
        storage.activate_lvm(true).expect("already active");
        storage.activate_lvm(false).expect("deactivate");
        assert_eq!(runner.rendered(), vec!["vgchange -a y", "vgchange -a n"]);
        assert!(!storage.activation().lvm);
    }
}
