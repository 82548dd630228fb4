// SPDX-License-Identifier: GPL-3.0-only

//! Volumes and the filesystem work done on them.

use serde::{Deserialize, Serialize};
use storage_contracts::{CommandLine, FstabEntry};
use storage_types::{
    EncryptType, FsType, MdLevel, MdParity, MountBy, PartitionId, PartitionType, Region,
    kib_to_pretty,
};

use crate::allocator::{ExtentUser, LvExtents};
use crate::container::ContainerId;
use crate::device::Device;
use crate::error::VolumeError;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct VolumeId(pub u32);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionData {
    pub region: Region,
    pub kind: PartitionType,
    pub id: PartitionId,
    pub orig_id: PartitionId,
    pub boot: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LvData {
    pub vg: String,
    pub uuid: String,
    pub extents: LvExtents,
    pub orig_le: u64,
    pub stripe_size_k: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MdData {
    pub level: MdLevel,
    pub members: Vec<String>,
    pub spares: Vec<String>,
    pub chunk_k: u64,
    pub parity: MdParity,
    pub md_uuid: String,
    pub destroy_sb: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopData {
    pub file: String,
    pub reuse: bool,
    pub delete_file: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DmData {
    pub target: String,
    pub devices: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subvolume {
    pub path: String,
    pub created: bool,
    pub deleted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BtrfsData {
    pub uuid: String,
    pub devices: Vec<String>,
    pub devices_add: Vec<String>,
    pub devices_remove: Vec<String>,
    pub subvolumes: Vec<Subvolume>,
}

impl BtrfsData {
    pub fn pending_subvolumes(&self) -> bool {
        self.subvolumes.iter().any(|s| s.created || s.deleted)
    }
}

/// Per-kind part of a volume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum VolumeData {
    Partition(PartitionData),
    Lv(LvData),
    Md(MdData),
    Loop(LoopData),
    Dm(DmData),
    Btrfs(BtrfsData),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Volume {
    pub id: VolumeId,
    pub dev: Device,
    pub container: ContainerId,
    pub num: u32,
    pub orig_num: u32,
    pub numeric: bool,

    pub fs: FsType,
    pub detected_fs: FsType,
    pub format: bool,
    pub mkfs_opt: String,
    pub tunefs_opt: String,
    pub label: String,
    pub orig_label: String,
    pub uuid: String,

    pub mount_point: String,
    pub orig_mount_point: String,
    pub mount_by: MountBy,
    pub orig_mount_by: MountBy,
    pub fstab_opt: String,
    pub orig_fstab_opt: String,
    pub is_mounted: bool,
    pub ignore_fstab: bool,

    pub encryption: EncryptType,
    pub orig_encryption: EncryptType,
    pub orig_size_k: u64,
    pub description: String,

    pub data: VolumeData,
}

impl Volume {
    pub fn new(id: VolumeId, container: ContainerId, dev: Device, num: u32, data: VolumeData) -> Self {
        let orig_size_k = dev.size_k;
        Self {
            id,
            dev,
            container,
            num,
            orig_num: num,
            numeric: num > 0,
            fs: FsType::Unknown,
            detected_fs: FsType::Unknown,
            format: false,
            mkfs_opt: String::new(),
            tunefs_opt: String::new(),
            label: String::new(),
            orig_label: String::new(),
            uuid: String::new(),
            mount_point: String::new(),
            orig_mount_point: String::new(),
            mount_by: MountBy::Device,
            orig_mount_by: MountBy::Device,
            fstab_opt: String::new(),
            orig_fstab_opt: String::new(),
            is_mounted: false,
            ignore_fstab: false,
            encryption: EncryptType::None,
            orig_encryption: EncryptType::None,
            orig_size_k,
            description: String::new(),
            data,
        }
    }

    pub fn device(&self) -> &str {
        &self.dev.device
    }

    pub fn created(&self) -> bool {
        self.dev.created
    }

    pub fn deleted(&self) -> bool {
        self.dev.deleted
    }

    pub fn partition(&self) -> Option<&PartitionData> {
        match &self.data {
            VolumeData::Partition(p) => Some(p),
            _ => None,
        }
    }

    pub fn partition_mut(&mut self) -> Option<&mut PartitionData> {
        match &mut self.data {
            VolumeData::Partition(p) => Some(p),
            _ => None,
        }
    }

    pub fn lv(&self) -> Option<&LvData> {
        match &self.data {
            VolumeData::Lv(lv) => Some(lv),
            _ => None,
        }
    }

    pub fn lv_mut(&mut self) -> Option<&mut LvData> {
        match &mut self.data {
            VolumeData::Lv(lv) => Some(lv),
            _ => None,
        }
    }

    pub fn md(&self) -> Option<&MdData> {
        match &self.data {
            VolumeData::Md(md) => Some(md),
            _ => None,
        }
    }

    pub fn md_mut(&mut self) -> Option<&mut MdData> {
        match &mut self.data {
            VolumeData::Md(md) => Some(md),
            _ => None,
        }
    }

    pub fn loop_data(&self) -> Option<&LoopData> {
        match &self.data {
            VolumeData::Loop(l) => Some(l),
            _ => None,
        }
    }

    pub fn btrfs(&self) -> Option<&BtrfsData> {
        match &self.data {
            VolumeData::Btrfs(b) => Some(b),
            _ => None,
        }
    }

    pub fn btrfs_mut(&mut self) -> Option<&mut BtrfsData> {
        match &mut self.data {
            VolumeData::Btrfs(b) => Some(b),
            _ => None,
        }
    }

    pub fn is_extended(&self) -> bool {
        self.partition().is_some_and(|p| p.kind == PartitionType::Extended)
    }

    pub fn is_logical(&self) -> bool {
        self.partition().is_some_and(|p| p.kind == PartitionType::Logical)
    }

    pub fn is_swap(&self) -> bool {
        self.fs == FsType::Swap || self.mount_point == "swap"
    }

    pub fn has_option(&self, option: &str) -> bool {
        self.fstab_opt.split(',').any(|o| o.trim() == option)
    }

    pub fn needs_shrink(&self) -> bool {
        !self.deleted() && self.dev.size_k < self.orig_size_k
    }

    pub fn needs_extend(&self) -> bool {
        !self.deleted() && self.dev.size_k > self.orig_size_k
    }

    pub fn needs_label(&self) -> bool {
        self.label != self.orig_label && !(self.format && !self.fs.supports_label())
    }

    pub fn needs_remount(&self) -> bool {
        if self.deleted() {
            return false;
        }
        self.mount_point != self.orig_mount_point
            || (!self.mount_point.is_empty() && !self.is_mounted && !self.has_option("noauto"))
    }

    pub fn needs_fstab_update(&self) -> bool {
        if self.ignore_fstab || self.deleted() {
            return false;
        }
        self.mount_point != self.orig_mount_point
            || (!self.mount_point.is_empty()
                && (self.fstab_opt != self.orig_fstab_opt
                    || self.mount_by != self.orig_mount_by
                    || self.encryption != self.orig_encryption))
    }

    pub fn needs_type_change(&self) -> bool {
        !self.deleted() && self.partition().is_some_and(|p| p.id != p.orig_id)
    }

    /// Clear the mount-related pending state after fstab was written.
    pub fn fstab_update_done(&mut self) {
        self.orig_fstab_opt = self.fstab_opt.clone();
        self.orig_mount_by = self.mount_by;
        self.orig_encryption = self.encryption;
    }

    fn noun(&self) -> &'static str {
        match &self.data {
            VolumeData::Partition(_) => "partition",
            VolumeData::Lv(_) => "logical volume",
            VolumeData::Md(_) => "software RAID",
            VolumeData::Loop(_) => "file-based device",
            VolumeData::Dm(_) => "device-mapper table",
            VolumeData::Btrfs(_) => "btrfs volume",
        }
    }

    fn size_text(&self) -> String {
        kib_to_pretty(self.dev.size_k, false)
    }

    pub fn create_text(&self) -> String {
        let dev = self.device();
        let size = self.size_text();
        match &self.data {
            VolumeData::Md(md) => format!(
                "Create software RAID {dev} ({size}) from {}",
                md.members.join(" ")
            ),
            VolumeData::Loop(l) => {
                format!("Create file-based device {dev} of file {} ({size})", l.file)
            }
            VolumeData::Partition(p) if p.kind == PartitionType::Extended => {
                format!("Create extended partition {dev} ({size})")
            }
            _ => {
                let noun = self.noun();
                let fs = self.fs;
                if self.mount_point == "swap" {
                    format!("Create swap {noun} {dev} ({size})")
                } else if self.mount_point == "/" {
                    format!("Create root {noun} {dev} ({size}) with {fs}")
                } else if !self.mount_point.is_empty() {
                    format!("Create {noun} {dev} ({size}) for {} with {fs}", self.mount_point)
                } else if self.format && fs.is_formatted() {
                    format!("Create {noun} {dev} ({size}) with {fs}")
                } else {
                    format!("Create {noun} {dev} ({size})")
                }
            }
        }
    }

    pub fn remove_text(&self) -> String {
        match &self.data {
            VolumeData::Md(_) | VolumeData::Loop(_) => {
                format!("Delete {} {} ({})", self.noun(), self.device(), self.size_text())
            }
            VolumeData::Dm(_) => format!("Delete device-mapper table {}", self.dev.name),
            _ => format!("Delete {} {}", self.noun(), self.device()),
        }
    }

    pub fn resize_text(&self, shrink: bool) -> String {
        let dev = self.device();
        if let VolumeData::Btrfs(b) = &self.data {
            return if shrink {
                format!("Remove {} from btrfs {dev}", b.devices_remove.join(" "))
            } else {
                format!("Add {} to btrfs {dev}", b.devices_add.join(" "))
            };
        }
        let verb = if shrink { "Shrink" } else { "Extend" };
        format!("{verb} {} {dev} to {}", self.noun(), self.size_text())
    }

    pub fn set_type_text(&self) -> String {
        let id = self.partition().map(|p| p.id).unwrap_or_default();
        format!("Set type of partition {} to {id}", self.device())
    }

    pub fn format_text(&self) -> String {
        let dev = self.device();
        let size = self.size_text();
        if self.mount_point.is_empty() || self.mount_point == "swap" {
            format!("Format {} {dev} ({size}) with {}", self.noun(), self.fs)
        } else {
            format!(
                "Format {} {dev} ({size}) for {} with {}",
                self.noun(),
                self.mount_point,
                self.fs
            )
        }
    }

    pub fn label_text(&self) -> String {
        if self.label.is_empty() {
            format!("Clear label on {}", self.device())
        } else {
            format!("Set label on {} to {}", self.device(), self.label)
        }
    }

    pub fn mount_text(&self) -> String {
        let dev = self.device();
        if self.mount_point.is_empty() {
            format!("Unmount {dev}")
        } else if self.mount_point == "swap" {
            format!("Use {dev} as swap")
        } else if !self.orig_mount_point.is_empty() && self.orig_mount_point != self.mount_point {
            format!("Change mount point of {dev} to {}", self.mount_point)
        } else {
            format!("Set mount point of {dev} to {}", self.mount_point)
        }
    }

    pub fn fstab_text(&self) -> String {
        let dev = self.device();
        if self.deleted() || self.mount_point.is_empty() {
            format!("Remove {dev} from /etc/fstab")
        } else if self.orig_mount_point.is_empty() {
            format!("Add {dev} to /etc/fstab")
        } else {
            format!("Update /etc/fstab entry of {dev}")
        }
    }

    pub fn subvolume_texts(&self) -> Vec<String> {
        let Some(b) = self.btrfs() else {
            return Vec::new();
        };
        let collect = |pick: fn(&Subvolume) -> bool| {
            b.subvolumes
                .iter()
                .filter(|s| pick(s))
                .map(|s| s.path.as_str())
                .collect::<Vec<_>>()
        };
        let mut texts = Vec::new();
        let removed = collect(|s| s.deleted);
        if !removed.is_empty() {
            texts.push(format!(
                "Remove subvolume(s) {} on device {}",
                removed.join(" "),
                self.device()
            ));
        }
        let created = collect(|s| s.created && !s.deleted);
        if !created.is_empty() {
            texts.push(format!(
                "Create subvolume(s) {} on device {}",
                created.join(" "),
                self.device()
            ));
        }
        texts
    }

    /// mkfs for the requested filesystem.
    pub fn mkfs_command(&self) -> Result<CommandLine, VolumeError> {
        let opts = self.mkfs_opt.split_whitespace();
        let command = match self.fs {
            FsType::Ext2 | FsType::Ext3 | FsType::Ext4 => CommandLine::new("mke2fs")
                .args(["-t", self.fs.as_str(), "-v"])
                .args(opts),
            FsType::Btrfs => CommandLine::new("mkfs.btrfs").arg("-f").args(opts),
            FsType::Vfat => CommandLine::new("mkdosfs").args(opts),
            FsType::Xfs => CommandLine::new("mkfs.xfs").args(["-q", "-f"]).args(opts),
            FsType::Swap => CommandLine::new("mkswap").arg("-f").args(opts),
            _ => return Err(VolumeError::FormatUnknownFs),
        };
        Ok(command.arg(self.device()))
    }

    /// tune2fs run after mkfs, when tune options were given.
    pub fn tune_command(&self) -> Option<CommandLine> {
        let tunable = matches!(self.fs, FsType::Ext3 | FsType::Ext4);
        if !tunable || self.tunefs_opt.trim().is_empty() {
            return None;
        }
        Some(
            CommandLine::new("tune2fs")
                .args(self.tunefs_opt.split_whitespace())
                .arg(self.device()),
        )
    }

    pub fn label_command(&self) -> Result<CommandLine, VolumeError> {
        let dev = self.device();
        let command = match self.fs {
            FsType::Ext2 | FsType::Ext3 | FsType::Ext4 => {
                CommandLine::new("tune2fs").args(["-L", self.label.as_str(), dev])
            }
            FsType::Xfs => {
                let label = if self.label.is_empty() { "--" } else { self.label.as_str() };
                CommandLine::new("xfs_admin").args(["-L", label, dev])
            }
            FsType::Swap => {
                let mut command = CommandLine::new("mkswap").args(["-L", self.label.as_str()]);
                if !self.uuid.is_empty() {
                    command = command.args(["-U", self.uuid.as_str()]);
                }
                command.arg(dev)
            }
            FsType::Btrfs => {
                CommandLine::new("btrfs").args(["filesystem", "label", dev, self.label.as_str()])
            }
            _ => return Err(VolumeError::MklabelFsUnable),
        };
        Ok(command)
    }

    /// Whether `fs` can be shrunk and grown.
    pub fn fs_resize_support(fs: FsType) -> (bool, bool) {
        match fs {
            FsType::Ext2 | FsType::Ext3 | FsType::Ext4 | FsType::Btrfs | FsType::Swap => {
                (true, true)
            }
            FsType::Xfs => (false, true),
            FsType::Unknown | FsType::None => (true, true),
            FsType::Vfat | FsType::Ntfs => (false, false),
        }
    }

    /// Refuse a resize the filesystem cannot follow.
    pub fn can_resize(&self, new_size_k: u64) -> Result<(), VolumeError> {
        if self.dev.is_used() {
            return Err(VolumeError::AlreadyInUse);
        }
        if self.format || self.created() {
            return Ok(());
        }
        let (shrink, grow) = Self::fs_resize_support(self.fs);
        let allowed = if new_size_k < self.dev.size_k { shrink } else { grow };
        if allowed {
            Ok(())
        } else {
            Err(VolumeError::ResizeUnsupportedByFs)
        }
    }

    /// The filesystem needs to be mounted to be resized.
    pub fn resize_needs_mount(&self) -> bool {
        !self.format && matches!(self.fs, FsType::Xfs | FsType::Btrfs)
    }

    /// Filesystem resize to the current target size. `None` when there is
    /// no filesystem to follow the block device.
    pub fn resize_fs_command(
        &self,
        mount_point: Option<&str>,
    ) -> Result<Option<CommandLine>, VolumeError> {
        if self.format {
            return Ok(None);
        }
        let dev = self.device();
        let size = format!("{}K", self.dev.size_k);
        let command = match self.fs {
            FsType::Unknown | FsType::None => return Ok(None),
            FsType::Swap => {
                let mut command = CommandLine::new("mkswap");
                if !self.label.is_empty() {
                    command = command.args(["-L", self.label.as_str()]);
                }
                if !self.uuid.is_empty() {
                    command = command.args(["-U", self.uuid.as_str()]);
                }
                command.arg(dev)
            }
            FsType::Ext2 | FsType::Ext3 | FsType::Ext4 => {
                CommandLine::new("resize2fs").args(["-f", dev, size.as_str()])
            }
            FsType::Xfs if !self.needs_shrink() => {
                let mp = mount_point.ok_or(VolumeError::ResizeFailed)?;
                CommandLine::new("xfs_growfs").arg(mp)
            }
            FsType::Btrfs => {
                let mp = mount_point.ok_or(VolumeError::ResizeFailed)?;
                let size = format!("{}k", self.dev.size_k);
                CommandLine::new("btrfs").args(["filesystem", "resize", size.as_str(), mp])
            }
            _ => return Err(VolumeError::ResizeUnsupportedByFs),
        };
        Ok(Some(command))
    }

    pub fn mount_command(&self, target: &str) -> CommandLine {
        if self.is_swap() {
            return CommandLine::new("swapon").arg(self.device());
        }
        let mut command = CommandLine::new("mount");
        if self.fs.is_formatted() {
            command = command.args(["-t", self.fs.as_str()]);
        }
        let options: Vec<&str> = self
            .fstab_opt
            .split(',')
            .map(str::trim)
            .filter(|o| !o.is_empty() && *o != "defaults" && *o != "noauto")
            .collect();
        if !options.is_empty() {
            command = command.args(["-o".to_string(), options.join(",")]);
        }
        command.args([self.device(), target])
    }

    pub fn umount_command(&self, target: &str) -> CommandLine {
        if self.is_swap() {
            CommandLine::new("swapoff").arg(self.device())
        } else {
            CommandLine::new("umount").arg(target)
        }
    }

    /// Device spec as fstab should name it.
    pub fn mount_device(&self) -> String {
        let by_link = |prefix: &str| {
            self.dev
                .alt_names
                .iter()
                .find(|a| a.starts_with(prefix))
                .cloned()
        };
        let spec = match self.mount_by {
            MountBy::Uuid if !self.uuid.is_empty() => Some(format!("UUID={}", self.uuid)),
            MountBy::Label if !self.label.is_empty() => Some(format!("LABEL={}", self.label)),
            MountBy::Id => by_link("/dev/disk/by-id/"),
            MountBy::Path => by_link("/dev/disk/by-path/"),
            _ => None,
        };
        spec.unwrap_or_else(|| self.device().to_string())
    }

    pub fn fstab_entry(&self) -> FstabEntry {
        let mut entry = FstabEntry::new(self.mount_device(), &self.mount_point, self.fs.as_str());
        let options: Vec<String> = self
            .fstab_opt
            .split(',')
            .map(str::trim)
            .filter(|o| !o.is_empty())
            .map(ToString::to_string)
            .collect();
        if !options.is_empty() {
            entry.options = options;
        }
        let no_check = matches!(
            self.fs,
            FsType::Swap | FsType::Vfat | FsType::Ntfs | FsType::Unknown | FsType::None
        ) || self.has_option("noauto")
            || matches!(self.data, VolumeData::Loop(_));
        if self.is_swap() {
            entry.mount = "swap".to_string();
        }
        (entry.freq, entry.passno) = if no_check {
            (0, 0)
        } else if self.mount_point == "/" {
            (1, 1)
        } else {
            (1, 2)
        };
        entry
    }
}

impl ExtentUser for Volume {
    fn created(&self) -> bool {
        self.dev.created
    }

    fn deleted(&self) -> bool {
        self.dev.deleted
    }

    fn size_k(&self) -> u64 {
        self.dev.size_k
    }

    fn orig_size_k(&self) -> u64 {
        self.orig_size_k
    }

    fn set_size_k(&mut self, size_k: u64) {
        self.dev.size_k = size_k;
        if self.dev.created {
            self.orig_size_k = size_k;
        }
    }

    fn extents(&self) -> Option<&LvExtents> {
        self.lv().map(|lv| &lv.extents)
    }

    fn extents_mut(&mut self) -> Option<&mut LvExtents> {
        self.lv_mut().map(|lv| &mut lv.extents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn partition(size_k: u64) -> Volume {
        Volume::new(
            VolumeId(1),
            ContainerId(1),
            Device::new("sda1", "/dev/sda1", size_k),
            1,
            VolumeData::Partition(PartitionData {
                region: Region::new(1024, size_k),
                kind: PartitionType::Primary,
                id: PartitionId::LINUX,
                orig_id: PartitionId::LINUX,
                boot: false,
            }),
        )
    }

    #[test]
    fn resize_predicates_follow_size() {
        let mut vol = partition(1000);
        assert!(!vol.needs_shrink() && !vol.needs_extend());
        vol.dev.size_k = 500;
        assert!(vol.needs_shrink());
        vol.dev.deleted = true;
        assert!(!vol.needs_shrink());
    }

    #[test]
    fn remount_needed_for_unmounted_mount_point() {
        let mut vol = partition(1000);
        vol.mount_point = "/data".to_string();
        vol.orig_mount_point = "/data".to_string();
        assert!(vol.needs_remount());
        vol.fstab_opt = "noauto".to_string();
        assert!(!vol.needs_remount());
        vol.is_mounted = true;
        vol.fstab_opt.clear();
        assert!(!vol.needs_remount());
    }

    #[test]
    fn fstab_update_on_option_change() {
        let mut vol = partition(1000);
        vol.mount_point = "/data".to_string();
        vol.orig_mount_point = "/data".to_string();
        assert!(!vol.needs_fstab_update());
        vol.mount_by = MountBy::Uuid;
        assert!(vol.needs_fstab_update());
        vol.fstab_update_done();
        assert!(!vol.needs_fstab_update());
        vol.ignore_fstab = true;
        vol.mount_point = "/srv".to_string();
        assert!(!vol.needs_fstab_update());
    }

    #[test]
    fn label_on_unlabelable_format_is_skipped() {
        let mut vol = partition(1000);
        vol.label = "data".to_string();
        assert!(vol.needs_label());
        vol.format = true;
        vol.fs = FsType::Vfat;
        assert!(!vol.needs_label());
    }

    #[test]
    fn mkfs_per_filesystem() {
        let mut vol = partition(1000);
        vol.fs = FsType::Ext4;
        vol.mkfs_opt = "-O dir_index".to_string();
        assert_eq!(
            vol.mkfs_command().expect("mkfs").render(),
            "mke2fs -t ext4 -v -O dir_index /dev/sda1"
        );
        vol.fs = FsType::Xfs;
        vol.mkfs_opt.clear();
        assert_eq!(vol.mkfs_command().expect("mkfs").render(), "mkfs.xfs -q -f /dev/sda1");
        vol.fs = FsType::Ntfs;
        assert_eq!(vol.mkfs_command(), Err(VolumeError::FormatUnknownFs));
    }

    #[test]
    fn resize_commands() {
        let mut vol = partition(1000);
        vol.fs = FsType::Ext4;
        vol.dev.size_k = 800;
        let command = vol.resize_fs_command(None).expect("ext4").expect("command");
        assert_eq!(command.render(), "resize2fs -f /dev/sda1 800K");

        vol.fs = FsType::Xfs;
        assert_eq!(vol.can_resize(700), Err(VolumeError::ResizeUnsupportedByFs));
        assert_eq!(vol.resize_fs_command(Some("/mnt")), Err(VolumeError::ResizeUnsupportedByFs));
        vol.dev.size_k = 1200;
        assert_eq!(
            vol.resize_fs_command(Some("/mnt")).expect("grow").expect("command").render(),
            "xfs_growfs /mnt"
        );

        vol.fs = FsType::Vfat;
        assert_eq!(vol.can_resize(2000), Err(VolumeError::ResizeUnsupportedByFs));
    }

    #[test]
    fn fstab_entry_uses_mount_by() {
        let mut vol = partition(1000);
        vol.fs = FsType::Ext4;
        vol.uuid = "1234-abcd".to_string();
        vol.mount_point = "/".to_string();
        vol.mount_by = MountBy::Uuid;
        let entry = vol.fstab_entry();
        assert_eq!(entry.device, "UUID=1234-abcd");
        assert_eq!((entry.freq, entry.passno), (1, 1));
        assert_eq!(entry.options, vec!["defaults".to_string()]);

        vol.fs = FsType::Swap;
        vol.mount_point = "swap".to_string();
        vol.mount_by = MountBy::Id;
        let entry = vol.fstab_entry();
        assert_eq!(entry.device, "/dev/sda1");
        assert_eq!((entry.freq, entry.passno), (0, 0));
    }

    #[test]
    fn texts_name_the_volume() {
        let mut vol = partition(1024 * 1024);
        vol.dev.created = true;
        vol.fs = FsType::Ext4;
        vol.mount_point = "/home".to_string();
        assert_eq!(
            vol.create_text(),
            "Create partition /dev/sda1 (1.00 GiB) for /home with ext4"
        );
        vol.mount_point = "swap".to_string();
        assert_eq!(vol.mount_text(), "Use /dev/sda1 as swap");
        vol.label.clear();
        assert_eq!(vol.label_text(), "Clear label on /dev/sda1");
    }
}
