// SPDX-License-Identifier: GPL-3.0-only

//! Software RAID arrays.
//!
//! All arrays live in the single md pool container. Arrays that exist on
//! disk can be removed but not reshaped.

use storage_contracts::CommandLine;
use storage_sys::logical::mdadm_tools::{detail_command, parse_detail_uuid};
use storage_types::{ContainerKind, MdLevel, MdParity, RaidInfo, UsedBy, UsedByKind};
use tracing::{debug, warn};

use super::{member_sizes, volume_of};
use crate::commit::Ctx;
use crate::device::Device;
use crate::error::{Error, InternalError, MdError, Result};
use crate::graph::DeviceGraph;
use crate::storage::Storage;
use crate::volume::{MdData, Volume, VolumeData, VolumeId};

/// Highest array number plus one.
pub const MAX_MD_NUMBER: u32 = 256;

pub fn md_device(num: u32) -> String {
    format!("/dev/md{num}")
}

fn md_edge(num: u32) -> UsedBy {
    UsedBy::new(UsedByKind::Md, md_device(num))
}

/// The mdadm.conf line for a created array.
fn config_line(device: &str, md: &MdData) -> String {
    if md.md_uuid.is_empty() {
        format!(
            "ARRAY {device} level={} devices={}",
            md.level,
            md.members.join(",")
        )
    } else {
        format!("ARRAY {device} level={} UUID={}", md.level, md.md_uuid)
    }
}

impl Storage {
    fn raid_id(&self, num: u32) -> Result<VolumeId> {
        self.graph
            .pool(ContainerKind::Md)
            .and_then(|c| c.live_volumes().find(|v| v.num == num && v.md().is_some()))
            .map(|v| v.id)
            .ok_or_else(|| MdError::UnknownNumber(num).into())
    }

    /// The array behind `num`, if it may still be reshaped.
    fn planned_raid(&self, num: u32, on_disk: MdError) -> Result<(VolumeId, MdData)> {
        self.writable(MdError::ChangeReadonly)?;
        let vid = self.raid_id(num)?;
        let vol = volume_of(&self.graph, vid)?;
        if !vol.created() {
            return Err(on_disk.into());
        }
        let md = vol
            .md()
            .cloned()
            .ok_or_else(|| Error::internal(format!("{} is not an array", vol.device())))?;
        Ok((vid, md))
    }

    fn check_md_member(&self, device: &str) -> Result<()> {
        let dev = self
            .graph
            .device(device)
            .ok_or_else(|| MdError::DeviceUnknown(device.to_string()))?;
        if dev.is_used() {
            return Err(MdError::DeviceUsed(device.to_string()).into());
        }
        Ok(())
    }

    fn raid_size(&self, level: MdLevel, members: &[String]) -> Result<u64> {
        let (sum, smallest) = member_sizes(&self.graph, members);
        level
            .usable_size_k(members.len(), smallest, sum)
            .ok_or_else(|| MdError::TooFewDevices.into())
    }

    /// Store `md` back on the array and recompute its size.
    fn update_raid(&mut self, vid: VolumeId, md: MdData) -> Result<()> {
        let size_k = self.raid_size(md.level, &md.members)?;
        let vol = self.volume_mut(vid)?;
        vol.data = VolumeData::Md(md);
        self.graph.mark_resize(vid, size_k);
        Ok(())
    }

    pub fn create_raid(
        &mut self,
        num: u32,
        level: MdLevel,
        devices: &[String],
        spares: &[String],
    ) -> Result<String> {
        self.writable(MdError::ChangeReadonly)?;
        if num >= MAX_MD_NUMBER {
            return Err(MdError::NumberTooLarge(num).into());
        }
        if self.raid_id(num).is_ok() {
            return Err(MdError::DuplicateNumber(num).into());
        }
        if level == MdLevel::Unknown {
            return Err(MdError::NoCreateUnknown.into());
        }
        if devices.len() < level.min_devices() {
            return Err(MdError::TooFewDevices.into());
        }
        let mut seen: Vec<&String> = Vec::new();
        for member in devices.iter().chain(spares) {
            if seen.contains(&member) {
                return Err(MdError::AddDuplicate(member.clone()).into());
            }
            self.check_md_member(member)?;
            seen.push(member);
        }
        let size_k = self.raid_size(level, devices)?;

        let device = md_device(num);
        let cid = self.graph.ensure_pool(ContainerKind::Md);
        let vid = self.graph.new_volume_id();
        let mut dev = Device::new(format!("md{num}"), device.as_str(), size_k);
        dev.created = true;
        let mut vol = Volume::new(
            vid,
            cid,
            dev,
            num,
            VolumeData::Md(MdData {
                level,
                members: devices.to_vec(),
                spares: spares.to_vec(),
                chunk_k: 0,
                parity: MdParity::Default,
                md_uuid: String::new(),
                destroy_sb: false,
            }),
        );
        vol.mount_by = self.config.default_mount_by;
        vol.orig_mount_by = vol.mount_by;
        self.graph.add_volume(vol);
        for member in devices.iter().chain(spares) {
            self.graph.add_used_by(member, md_edge(num));
        }
        debug!("planned {level} array {device} of {} members", devices.len());
        Ok(device)
    }

    pub fn extend_raid(&mut self, num: u32, device: &str) -> Result<()> {
        let (vid, mut md) = self.planned_raid(num, MdError::NoResizeOnDisk)?;
        if md.members.iter().chain(&md.spares).any(|m| m == device) {
            return Err(MdError::AddDuplicate(device.to_string()).into());
        }
        self.check_md_member(device)?;
        md.members.push(device.to_string());
        self.update_raid(vid, md)?;
        self.graph.add_used_by(device, md_edge(num));
        Ok(())
    }

    pub fn shrink_raid(&mut self, num: u32, device: &str) -> Result<()> {
        let (vid, mut md) = self.planned_raid(num, MdError::NoResizeOnDisk)?;
        if let Some(index) = md.spares.iter().position(|m| m == device) {
            md.spares.remove(index);
        } else if let Some(index) = md.members.iter().position(|m| m == device) {
            if md.members.len() <= md.level.min_devices() {
                return Err(MdError::TooFewDevices.into());
            }
            md.members.remove(index);
        } else {
            return Err(MdError::RemoveNonexistent(device.to_string()).into());
        }
        self.update_raid(vid, md)?;
        self.graph.remove_used_by(device, &md_edge(num));
        Ok(())
    }

    pub fn change_raid_level(&mut self, num: u32, level: MdLevel) -> Result<()> {
        let (vid, mut md) = self.planned_raid(num, MdError::NoChangeOnDisk)?;
        if level == MdLevel::Unknown {
            return Err(MdError::NoCreateUnknown.into());
        }
        md.level = level;
        if !matches!(level, MdLevel::Raid5 | MdLevel::Raid6) {
            md.parity = MdParity::Default;
        }
        self.update_raid(vid, md)
    }

    pub fn change_raid_chunk(&mut self, num: u32, chunk_k: u64) -> Result<()> {
        let (vid, mut md) = self.planned_raid(num, MdError::NoChangeOnDisk)?;
        md.chunk_k = chunk_k;
        self.update_raid(vid, md)
    }

    pub fn change_raid_parity(&mut self, num: u32, parity: MdParity) -> Result<()> {
        let (vid, mut md) = self.planned_raid(num, MdError::NoChangeOnDisk)?;
        md.parity = parity;
        self.update_raid(vid, md)
    }

    pub fn remove_raid(&mut self, num: u32, destroy_sb: bool) -> Result<()> {
        self.writable(MdError::ChangeReadonly)?;
        let vid = self.raid_id(num)?;
        let device = md_device(num);
        self.release_users(&device, MdError::RemoveUsedBy)?;
        self.graph.clear_used_by(&md_edge(num));

        let vol = self.volume_mut(vid)?;
        if let Some(md) = vol.md_mut() {
            md.destroy_sb = destroy_sb;
        }
        if vol.created() {
            self.graph.remove_volume(vid);
        } else {
            self.graph.mark_deleted(vid);
        }
        debug!("{device} removed from plan");
        Ok(())
    }

    /// Level, members and size of an array as currently planned.
    pub fn check_raid(&self, num: u32) -> Result<RaidInfo> {
        let vol = volume_of(&self.graph, self.raid_id(num)?)?;
        let md = vol
            .md()
            .ok_or_else(|| Error::internal(format!("{} is not an array", vol.device())))?;
        Ok(RaidInfo {
            device: vol.device().to_string(),
            number: num,
            level: md.level,
            parity: md.parity,
            chunk_k: md.chunk_k,
            uuid: md.md_uuid.clone(),
            devices: md.members.clone(),
            spares: md.spares.clone(),
            size_k: vol.dev.size_k,
        })
    }
}

fn md_of(vol: &Volume) -> Result<&MdData> {
    vol.md()
        .ok_or_else(|| Error::internal(format!("{} is not an array", vol.device())))
}

fn flush_config(ctx: &mut Ctx) -> Result<()> {
    ctx.raid_config
        .flush()
        .map_err(|e| InternalError::Config(e.to_string()).into())
}

pub(crate) fn commit_create(graph: &mut DeviceGraph, ctx: &mut Ctx, vid: VolumeId) -> Result<()> {
    let vol = volume_of(graph, vid)?;
    let md = md_of(&vol)?;
    let device = vol.device();

    let mut command = CommandLine::new("mdadm").args([
        "--create".to_string(),
        device.to_string(),
        "--run".to_string(),
        format!("--level={}", md.level),
        "-e".to_string(),
        "1.0".to_string(),
    ]);
    if md.level.wants_bitmap() {
        command = command.arg("--bitmap=internal");
    }
    command = command.arg(format!("--raid-devices={}", md.members.len()));
    if !md.spares.is_empty() {
        command = command.arg(format!("--spare-devices={}", md.spares.len()));
    }
    if md.chunk_k > 0 {
        command = command.arg(format!("--chunk={}", md.chunk_k));
    }
    if md.parity != MdParity::Default {
        command = command.arg(format!("--parity={}", md.parity));
    }
    command = command.args(md.members.iter().chain(&md.spares).cloned());
    ctx.run(command, MdError::CreateFailed)?;

    let detail = ctx.runner.run(&detail_command(device))?;
    let uuid = parse_detail_uuid(&detail.stdout).unwrap_or_default();
    if uuid.is_empty() {
        warn!("no uuid reported for {device}");
    }
    let mut md = md.clone();
    md.md_uuid = uuid;
    ctx.raid_config.update_entry(vol.num, &config_line(device, &md));
    flush_config(ctx)?;

    if let Some(target) = graph.volume_mut(vid).and_then(Volume::md_mut) {
        target.md_uuid = md.md_uuid;
    }
    Ok(())
}

pub(crate) fn commit_remove(graph: &mut DeviceGraph, ctx: &mut Ctx, vid: VolumeId) -> Result<()> {
    let vol = volume_of(graph, vid)?;
    let md = md_of(&vol)?;
    ctx.run(
        CommandLine::new("mdadm").args(["--stop", vol.device()]),
        MdError::RemoveFailed,
    )?;
    if md.destroy_sb {
        for member in md.members.iter().chain(&md.spares) {
            ctx.run(
                CommandLine::new("mdadm").args(["--zero-superblock", member.as_str()]),
                MdError::RemoveFailed,
            )?;
        }
    }
    if ctx.raid_config.remove_entry(vol.num) {
        flush_config(ctx)?;
    } else {
        debug!("no mdadm.conf entry for {}", vol.device());
    }
    Ok(())
}
