// SPDX-License-Identifier: GPL-3.0-only

//! LVM volume groups and logical volumes.

use storage_contracts::CommandLine;
use storage_types::{UsedBy, UsedByKind};
use tracing::debug;

use super::volume_of;
use crate::allocator::{ExtentPool, LvExtents, PeMap, PhysicalVolume, pv_extents};
use crate::commit::Ctx;
use crate::container::{Container, ContainerData, ContainerId, VgData};
use crate::device::Device;
use crate::error::{Error, LvmError, Result, StorageError};
use crate::graph::DeviceGraph;
use crate::storage::Storage;
use crate::volume::{LvData, Volume, VolumeData, VolumeId};

const INVALID_NAME_CHARS: &[char] = &['"', '\'', '/', ' ', '\n', '\t', ':', '*', '?'];

/// Whether LVM accepts `name` for a group or volume.
pub fn valid_lvm_name(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains(INVALID_NAME_CHARS)
}

/// Extents for `size_k`, rounded up to a multiple of the stripe count.
fn extents_for(pool: &ExtentPool, size_k: u64, stripes: u32) -> u64 {
    let le = pool.size_to_le(size_k);
    let stripes = u64::from(stripes.max(1));
    le.div_ceil(stripes) * stripes
}

/// Take `le` more extents for `extents`; the pool's free count follows.
fn take_extents(pool: &mut ExtentPool, le: u64, extents: &mut LvExtents) -> Result<()> {
    if le > pool.pe_free {
        return Err(LvmError::LvNoSpace.into());
    }
    let mut pe_map = extents.pe_map.clone();
    pool.add_distribution(le, extents.stripes, &mut pe_map)?;
    pool.pe_free -= le;
    extents.pe_map = pe_map;
    Ok(())
}

/// Give `le` extents of `pe_map` back. The free count follows whatever was
/// actually restored.
fn release_extents(pool: &mut ExtentPool, le: u64, pe_map: &mut PeMap) -> Result<()> {
    let before: u64 = pe_map.values().sum();
    let result = pool.remove_distribution(le, pe_map);
    let after: u64 = pe_map.values().sum();
    pool.pe_free += before - after;
    result.map_err(Error::from)
}

/// Pool and volumes of a volume group, borrowed apart.
fn split(c: &mut Container) -> Option<(&mut ExtentPool, &mut Vec<Volume>)> {
    let Container { data, volumes, .. } = c;
    match data {
        ContainerData::Lvm(vg) => Some((&mut vg.pool, volumes)),
        _ => None,
    }
}

impl Storage {
    fn vg_id(&self, name: &str) -> Result<ContainerId> {
        self.graph
            .containers()
            .filter(|c| c.vg().is_some() && !c.dev.deleted)
            .find(|c| c.dev.matches(name))
            .map(|c| c.id)
            .ok_or_else(|| StorageError::VgNotFound(name.to_string()).into())
    }

    fn writable_vg(&self, cid: ContainerId) -> Result<&Container> {
        self.writable(LvmError::ChangeReadonly)?;
        let c = self
            .graph
            .container(cid)
            .ok_or_else(|| Error::internal(format!("volume group {cid:?} is not in the graph")))?;
        if c.readonly {
            return Err(LvmError::ChangeReadonly.into());
        }
        Ok(c)
    }

    fn lv_id(&self, device: &str) -> Result<VolumeId> {
        self.graph
            .find_volume(device)
            .filter(|v| v.lv().is_some())
            .map(|v| v.id)
            .ok_or_else(|| LvmError::LvUnknownName(device.to_string()).into())
    }

    fn lv_by_name(&self, vg: &str, name: &str) -> Result<(ContainerId, VolumeId)> {
        let cid = self.vg_id(vg)?;
        let c = self.writable_vg(cid)?;
        let vid = c
            .live_volumes()
            .find(|v| v.dev.name == name)
            .map(|v| v.id)
            .ok_or_else(|| LvmError::LvUnknownName(name.to_string()))?;
        Ok((cid, vid))
    }

    fn vg_mut(&mut self, cid: ContainerId) -> Result<&mut Container> {
        self.graph
            .container_mut(cid)
            .filter(|c| c.vg().is_some())
            .ok_or_else(|| Error::internal(format!("volume group {cid:?} is not in the graph")))
    }

    /// Size of a device that may become a physical volume.
    fn free_pv_size(&self, device: &str) -> Result<u64> {
        let dev = self
            .graph
            .device(device)
            .ok_or_else(|| LvmError::PvDeviceUnknown(device.to_string()))?;
        if dev.is_used() {
            return Err(LvmError::PvDeviceUsed(device.to_string()).into());
        }
        Ok(dev.size_k)
    }

    pub fn create_volume_group(
        &mut self,
        name: &str,
        pe_size_k: u64,
        devices: &[String],
    ) -> Result<String> {
        self.writable(LvmError::ChangeReadonly)?;
        if !valid_lvm_name(name) {
            return Err(StorageError::VgInvalidName(name.to_string()).into());
        }
        let device = format!("/dev/{name}");
        let exists = self
            .graph
            .containers()
            .any(|c| !c.dev.deleted && (c.name() == name || c.device() == device));
        if exists {
            return Err(StorageError::VgExists(name.to_string()).into());
        }
        if devices.is_empty() {
            return Err(LvmError::VgHasNonePv.into());
        }

        let mut pool = ExtentPool::new(0);
        pool.set_pe_size(pe_size_k)?;
        for member in devices {
            let size_k = self.free_pv_size(member)?;
            if pool.contains(member) {
                return Err(LvmError::PvAlreadyContained(member.clone()).into());
            }
            let pv = PhysicalVolume::new(member.as_str(), pv_extents(size_k, pe_size_k));
            pool.pe_count += pv.pe_count;
            pool.pe_free += pv.pe_free;
            pool.pvs_add.push(pv);
        }

        let mut dev = Device::new(name, device.as_str(), pool.size_k());
        dev.created = true;
        debug!("planned volume group {name} with {} extents", pool.pe_count);
        self.graph.add_container(
            dev,
            ContainerData::Lvm(VgData {
                uuid: String::new(),
                pool,
            }),
        );
        let edge = UsedBy::new(UsedByKind::Lvm, device.as_str());
        for member in devices {
            self.graph.add_used_by(member, edge.clone());
        }
        Ok(device)
    }

    pub fn extend_volume_group(&mut self, name: &str, devices: &[String]) -> Result<()> {
        let cid = self.vg_id(name)?;
        let c = self.writable_vg(cid)?;
        if devices.is_empty() {
            return Err(LvmError::ListEmpty.into());
        }
        let vg_device = c.device().to_string();
        let mut pool = c.vg().map(|vg| vg.pool.clone()).unwrap_or_default();
        for member in devices {
            if pool.contains(member) {
                return Err(LvmError::PvAlreadyContained(member.clone()).into());
            }
            let size_k = self.free_pv_size(member)?;
            if let Some(index) = pool.pvs_remove.iter().position(|pv| pv.device == *member) {
                let pv = pool.pvs_remove.remove(index);
                let pv = PhysicalVolume::new(pv.device, pv.pe_count);
                pool.pe_count += pv.pe_count;
                pool.pe_free += pv.pe_free;
                pool.pvs.push(pv);
                continue;
            }
            let pv = PhysicalVolume::new(member.as_str(), pv_extents(size_k, pool.pe_size_k));
            pool.pe_count += pv.pe_count;
            pool.pe_free += pv.pe_free;
            pool.pvs_add.push(pv);
        }

        let c = self.vg_mut(cid)?;
        c.dev.size_k = pool.size_k();
        if let Some(vg) = c.vg_mut() {
            vg.pool = pool;
        }
        let edge = UsedBy::new(UsedByKind::Lvm, vg_device.as_str());
        for member in devices {
            self.graph.add_used_by(member, edge.clone());
        }
        Ok(())
    }

    /// Drop physical volumes. Extents of planned volumes move to the
    /// remaining ones; extents of existing volumes pin their PV.
    pub fn reduce_volume_group(&mut self, name: &str, devices: &[String]) -> Result<()> {
        let cid = self.vg_id(name)?;
        let mut c = self.writable_vg(cid)?.clone();
        if devices.is_empty() {
            return Err(LvmError::ListEmpty.into());
        }
        let vg_device = c.device().to_string();
        let (pool, volumes) =
            split(&mut c).ok_or_else(|| StorageError::VgNotFound(name.to_string()))?;
        if let Some(missing) = devices.iter().find(|d| !pool.contains(d)) {
            return Err(LvmError::PvRemoveNotFound(missing.clone()).into());
        }
        if pool.members().all(|pv| devices.contains(&pv.device)) {
            return Err(LvmError::VgHasNonePv.into());
        }
        for member in devices {
            pool.try_unuse_pe(member, volumes.as_mut_slice())?;
        }
        c.dev.size_k = c.vg().map_or(0, |vg| vg.pool.size_k());

        *self.vg_mut(cid)? = c;
        let edge = UsedBy::new(UsedByKind::Lvm, vg_device.as_str());
        for member in devices {
            self.graph.remove_used_by(member, &edge);
        }
        Ok(())
    }

    pub fn remove_volume_group(&mut self, name: &str) -> Result<()> {
        let cid = self.vg_id(name)?;
        let c = self.writable_vg(cid)?;
        let vg_device = c.device().to_string();
        let lvs: Vec<String> = c.live_volumes().map(|v| v.device().to_string()).collect();
        let in_use = lvs.iter().any(|lv| !self.graph.used_by(lv).is_empty());
        if in_use && !self.config.recursive_removal {
            return Err(LvmError::LvRemoveUsedBy.into());
        }
        for lv in lvs {
            self.remove_logical_volume(&lv)?;
        }

        self.graph
            .clear_used_by(&UsedBy::new(UsedByKind::Lvm, vg_device.as_str()));
        if self.vg_mut(cid)?.dev.created {
            self.graph.remove_container(cid);
        } else {
            self.vg_mut(cid)?.dev.deleted = true;
        }
        debug!("volume group {name} removed from plan");
        Ok(())
    }

    pub fn create_logical_volume(
        &mut self,
        vg: &str,
        name: &str,
        size_k: u64,
        stripes: u32,
        stripe_size_k: u64,
    ) -> Result<String> {
        let cid = self.vg_id(vg)?;
        let c = self.writable_vg(cid)?;
        if !valid_lvm_name(name) {
            return Err(LvmError::LvInvalidName(name.to_string()).into());
        }
        if c.live_volumes().any(|v| v.dev.name == name) {
            return Err(LvmError::LvDuplicateName(name.to_string()).into());
        }
        let stripes = stripes.max(1);
        if stripe_size_k > 0 && stripes == 1 {
            return Err(LvmError::LvNoStripeSize.into());
        }

        let mut pool = c.vg().map(|vg| vg.pool.clone()).unwrap_or_default();
        let le = extents_for(&pool, size_k, stripes);
        let mut extents = LvExtents {
            le,
            stripes,
            pe_map: PeMap::new(),
        };
        take_extents(&mut pool, le, &mut extents)?;

        let device = format!("{}/{name}", c.device());
        let vg_name = c.name().to_string();
        let size_k = le * pool.pe_size_k;
        if let Some(data) = self.vg_mut(cid)?.vg_mut() {
            data.pool = pool;
        }

        let vid = self.graph.new_volume_id();
        let mut dev = Device::new(name, device.as_str(), size_k);
        dev.created = true;
        let mut vol = Volume::new(
            vid,
            cid,
            dev,
            0,
            VolumeData::Lv(LvData {
                vg: vg_name,
                uuid: String::new(),
                extents,
                orig_le: le,
                stripe_size_k,
            }),
        );
        vol.mount_by = self.config.default_mount_by;
        vol.orig_mount_by = vol.mount_by;
        self.graph.add_volume(vol);
        debug!("planned logical volume {device} with {le} extents");
        Ok(device)
    }

    pub fn remove_logical_volume(&mut self, device: &str) -> Result<()> {
        let vid = self.lv_id(device)?;
        let vol = volume_of(&self.graph, vid)?;
        let cid = vol.container;
        self.writable_vg(cid)?;
        self.release_users(device, LvmError::LvRemoveUsedBy)?;

        let c = self.vg_mut(cid)?;
        if let Some((pool, volumes)) = split(c) {
            if let Some(lv) = volumes.iter_mut().find(|v| v.id == vid).and_then(Volume::lv_mut) {
                let le = lv.extents.le;
                release_extents(pool, le, &mut lv.extents.pe_map)?;
            }
        }
        if vol.created() {
            self.graph.remove_volume(vid);
        } else {
            self.graph.mark_deleted(vid);
        }
        Ok(())
    }

    pub fn resize_logical_volume(&mut self, device: &str, size_k: u64) -> Result<()> {
        let vid = self.lv_id(device)?;
        let vol = volume_of(&self.graph, vid)?;
        let cid = vol.container;
        let c = self.writable_vg(cid)?;
        vol.can_resize(size_k)?;
        let pool = c.vg().map(|vg| &vg.pool).ok_or_else(|| LvmError::LvUnknownName(device.to_string()))?;
        let mut extents = vol
            .lv()
            .map(|lv| lv.extents.clone())
            .ok_or_else(|| LvmError::LvUnknownName(device.to_string()))?;
        let new_le = extents_for(pool, size_k, extents.stripes);
        let mut pool = pool.clone();

        if new_le > extents.le {
            take_extents(&mut pool, new_le - extents.le, &mut extents)?;
        } else if new_le < extents.le {
            release_extents(&mut pool, extents.le - new_le, &mut extents.pe_map)?;
        }
        extents.le = new_le;
        let size_k = new_le * pool.pe_size_k;

        let c = self.vg_mut(cid)?;
        if let Some((target, volumes)) = split(c) {
            *target = pool;
            if let Some(lv) = volumes.iter_mut().find(|v| v.id == vid).and_then(Volume::lv_mut) {
                lv.extents = extents;
            }
        }
        self.graph.mark_resize(vid, size_k);
        Ok(())
    }

    /// Restripe a planned volume; existing ones keep their layout.
    pub fn change_lv_stripe_count(&mut self, vg: &str, name: &str, stripes: u32) -> Result<()> {
        let (cid, vid) = self.lv_by_name(vg, name)?;
        let vol = volume_of(&self.graph, vid)?;
        if !vol.created() {
            return Err(LvmError::LvAlreadyOnDisk.into());
        }
        let c = self.writable_vg(cid)?;
        let mut pool = c.vg().map(|vg| vg.pool.clone()).unwrap_or_default();
        let mut extents = vol.lv().map(|lv| lv.extents.clone()).unwrap_or_default();

        let le = extents.le;
        release_extents(&mut pool, le, &mut extents.pe_map)?;
        extents.stripes = stripes.max(1);
        extents.le = extents_for(&pool, vol.dev.size_k, extents.stripes);
        extents.pe_map.clear();
        take_extents(&mut pool, extents.le, &mut extents)?;
        let size_k = extents.le * pool.pe_size_k;

        let c = self.vg_mut(cid)?;
        if let Some((target, volumes)) = split(c) {
            *target = pool;
            if let Some(lv) = volumes.iter_mut().find(|v| v.id == vid).and_then(Volume::lv_mut) {
                if extents.stripes == 1 {
                    lv.stripe_size_k = 0;
                }
                lv.orig_le = extents.le;
                lv.extents = extents;
            }
        }
        self.graph.mark_resize(vid, size_k);
        Ok(())
    }

    pub fn change_lv_stripe_size(&mut self, vg: &str, name: &str, stripe_size_k: u64) -> Result<()> {
        let (_, vid) = self.lv_by_name(vg, name)?;
        let vol = volume_of(&self.graph, vid)?;
        if !vol.created() {
            return Err(LvmError::LvAlreadyOnDisk.into());
        }
        if vol.lv().is_none_or(|lv| lv.extents.stripes <= 1) {
            return Err(LvmError::LvNoStripeSize.into());
        }
        if let Some(lv) = self.volume_mut(vid)?.lv_mut() {
            lv.stripe_size_k = stripe_size_k;
        }
        Ok(())
    }
}

/// Cut pending creates and extends that overshoot their group by a little.
pub(crate) fn check_create_constraints(graph: &mut DeviceGraph) {
    for c in graph.containers_mut() {
        let name = c.name().to_string();
        if let Some((pool, volumes)) = split(c) {
            if pool.check_create_constraints(volumes.as_mut_slice()) {
                debug!("{name}: pending volumes cut to fit the group");
            }
        }
    }
}

fn group_name(graph: &DeviceGraph, cid: ContainerId) -> Result<(String, VgData)> {
    let c = graph
        .container(cid)
        .ok_or_else(|| Error::internal(format!("volume group {cid:?} vanished during commit")))?;
    let vg = c
        .vg()
        .cloned()
        .ok_or_else(|| Error::internal(format!("{} is not a volume group", c.device())))?;
    Ok((c.name().to_string(), vg))
}

/// Remove the group, or the physical volumes leaving it.
pub(crate) fn commit_decrease(graph: &mut DeviceGraph, ctx: &mut Ctx, cid: ContainerId) -> Result<()> {
    let (name, vg) = group_name(graph, cid)?;
    if graph.container(cid).is_some_and(|c| c.dev.deleted) {
        ctx.run(CommandLine::new("vgremove").arg(name.as_str()), LvmError::VgRemoveFailed)?;
        graph.remove_container(cid);
        return Ok(());
    }
    let devices: Vec<&str> = vg.pool.pvs_remove.iter().map(|pv| pv.device.as_str()).collect();
    if devices.is_empty() {
        return Ok(());
    }
    ctx.run(
        CommandLine::new("vgreduce").arg(name.as_str()).args(devices),
        LvmError::VgReduceFailed,
    )?;
    if let Some(data) = graph.container_mut(cid).and_then(Container::vg_mut) {
        data.pool.pvs_remove.clear();
    }
    Ok(())
}

/// Create the group, or add the physical volumes joining it.
pub(crate) fn commit_increase(graph: &mut DeviceGraph, ctx: &mut Ctx, cid: ContainerId) -> Result<()> {
    let (name, vg) = group_name(graph, cid)?;
    let created = graph.container(cid).is_some_and(|c| c.dev.created);
    let devices: Vec<&str> = vg.pool.pvs_add.iter().map(|pv| pv.device.as_str()).collect();
    for device in devices.iter().copied() {
        ctx.run(
            CommandLine::new("pvcreate").args(["-ff", "-y", device]),
            LvmError::CreatePvFailed,
        )?;
    }
    if created {
        let pe_size = format!("{}k", vg.pool.pe_size_k);
        ctx.run(
            CommandLine::new("vgcreate")
                .args(["-s", pe_size.as_str(), name.as_str()])
                .args(devices),
            LvmError::VgCreateFailed,
        )?;
    } else if !devices.is_empty() {
        ctx.run(
            CommandLine::new("vgextend").arg(name.as_str()).args(devices),
            LvmError::VgExtendFailed,
        )?;
    }

    if let Some(c) = graph.container_mut(cid) {
        c.dev.created = false;
        if let Some(data) = c.vg_mut() {
            let added = std::mem::take(&mut data.pool.pvs_add);
            data.pool.pvs.extend(added);
        }
    }
    Ok(())
}

fn lv_path(vol: &Volume) -> Result<String> {
    vol.lv()
        .map(|lv| format!("{}/{}", lv.vg, vol.dev.name))
        .ok_or_else(|| Error::internal(format!("{} is not a logical volume", vol.device())))
}

pub(crate) fn commit_remove(graph: &mut DeviceGraph, ctx: &mut Ctx, vid: VolumeId) -> Result<()> {
    let vol = volume_of(graph, vid)?;
    ctx.run(
        CommandLine::new("lvremove").args(["-f".to_string(), lv_path(&vol)?]),
        LvmError::LvRemoveFailed,
    )?;
    Ok(())
}

pub(crate) fn commit_create(graph: &mut DeviceGraph, ctx: &mut Ctx, vid: VolumeId) -> Result<()> {
    let vol = volume_of(graph, vid)?;
    let lv = vol
        .lv()
        .ok_or_else(|| Error::internal(format!("{} is not a logical volume", vol.device())))?;
    let mut command = CommandLine::new("lvcreate").args(["-l".to_string(), lv.extents.le.to_string()]);
    if lv.extents.stripes > 1 {
        command = command.args(["-i".to_string(), lv.extents.stripes.to_string()]);
        if lv.stripe_size_k > 0 {
            command = command.args(["-I".to_string(), lv.stripe_size_k.to_string()]);
        }
    }
    command = command.args(["-n", vol.dev.name.as_str(), lv.vg.as_str()]);
    ctx.run(command, LvmError::LvCreateFailed)?;
    Ok(())
}

pub(crate) fn commit_resize(graph: &mut DeviceGraph, ctx: &mut Ctx, vid: VolumeId) -> Result<()> {
    let vol = volume_of(graph, vid)?;
    let le = vol.lv().map_or(0, |lv| lv.extents.le);
    ctx.run(
        CommandLine::new("lvresize").args([
            "-f".to_string(),
            "-l".to_string(),
            le.to_string(),
            lv_path(&vol)?,
        ]),
        LvmError::LvResizeFailed,
    )?;
    if let Some(lv) = graph.volume_mut(vid).and_then(Volume::lv_mut) {
        lv.orig_le = lv.extents.le;
    }
    Ok(())
}
