// SPDX-License-Identifier: GPL-3.0-only

//! Disks and their partition tables.
//!
//! Regions are kept in KiB; parted is driven in 512-byte sectors.

use storage_contracts::CommandLine;
use storage_types::{DiskLabel, PartitionId, PartitionType, Region};
use tracing::{debug, warn};

use super::volume_of;
use crate::commit::{self, Ctx};
use crate::container::{Container, ContainerId};
use crate::device::Device;
use crate::error::{DiskError, Error, Result, StorageError};
use crate::graph::DeviceGraph;
use crate::storage::Storage;
use crate::volume::{PartitionData, Volume, VolumeData, VolumeId};

/// Space before the first partition, for alignment.
pub const FIRST_USABLE_K: u64 = 1024;
/// Backup GPT at the end of the disk.
const GPT_TAIL_K: u64 = 1024;
/// Room for the EBR in front of every logical partition.
const LOGICAL_GAP_K: u64 = 1024;
/// How much of a fresh partition is zeroed.
const ZERO_K: u64 = 200;

/// Device node of partition `num` on `disk`.
pub fn partition_device(disk: &str, num: u32) -> String {
    let base = disk.trim_start_matches("/dev/");
    let sep = if disk.starts_with("/dev/mapper/") {
        "_part"
    } else if base.ends_with(|c: char| c.is_ascii_digit())
        || ["cciss/", "ida/", "mmcblk", "nvme", "md"]
            .iter()
            .any(|prefix| base.starts_with(prefix))
    {
        "p"
    } else {
        ""
    };
    format!("{disk}{sep}{num}")
}

fn live_partitions(c: &Container) -> impl Iterator<Item = (&Volume, &PartitionData)> {
    c.live_volumes().filter_map(|v| v.partition().map(|p| (v, p)))
}

fn extended_region(c: &Container) -> Option<Region> {
    live_partitions(c)
        .find(|(_, p)| p.kind == PartitionType::Extended)
        .map(|(_, p)| p.region)
}

fn disk_label(c: &Container) -> DiskLabel {
    c.disk().map_or(DiskLabel::None, |d| d.label)
}

fn usable_region(c: &Container) -> Region {
    let tail = if disk_label(c) == DiskLabel::Gpt { GPT_TAIL_K } else { 0 };
    let end = c.dev.size_k.saturating_sub(tail);
    Region::new(FIRST_USABLE_K.min(end), end.saturating_sub(FIRST_USABLE_K))
}

/// Unused stretches of `outer` around `used`, each shortened by `lead_k`.
fn gaps(outer: Region, mut used: Vec<Region>, lead_k: u64) -> Vec<Region> {
    used.sort_by_key(|r| r.start);
    let mut free = Vec::new();
    let mut cursor = outer.start;
    for r in used.iter().map(|r| r.intersect(&outer)).filter(|r| !r.is_empty()) {
        if r.start > cursor {
            free.push(Region::new(cursor, r.start - cursor));
        }
        cursor = cursor.max(r.end());
    }
    if outer.end() > cursor {
        free.push(Region::new(cursor, outer.end() - cursor));
    }
    free.into_iter()
        .filter(|r| r.len > lead_k)
        .map(|r| Region::new(r.start + lead_k, r.len - lead_k))
        .collect()
}

fn free_gaps(c: &Container, kind: PartitionType) -> Vec<Region> {
    match kind {
        PartitionType::Logical => {
            let Some(extended) = extended_region(c) else {
                return Vec::new();
            };
            let used = live_partitions(c)
                .filter(|(_, p)| p.kind == PartitionType::Logical)
                .map(|(_, p)| p.region)
                .collect();
            gaps(extended, used, LOGICAL_GAP_K)
        }
        PartitionType::Any => {
            let mut all = free_gaps(c, PartitionType::Primary);
            all.extend(free_gaps(c, PartitionType::Logical));
            all
        }
        _ => {
            let used = live_partitions(c)
                .filter(|(_, p)| p.kind != PartitionType::Logical)
                .map(|(_, p)| p.region)
                .collect();
            gaps(usable_region(c), used, 0)
        }
    }
}

fn next_free_number(c: &Container, kind: PartitionType) -> Option<u32> {
    let label = disk_label(c);
    if kind == PartitionType::Logical {
        if !label.extended_possible() {
            return None;
        }
        let last = live_partitions(c)
            .filter(|(_, p)| p.kind == PartitionType::Logical)
            .map(|(v, _)| v.num)
            .max()
            .unwrap_or(label.max_primary());
        let num = last + 1;
        return (num <= label.max_logical()).then_some(num);
    }
    (1..=label.max_primary()).find(|n| !live_partitions(c).any(|(v, _)| v.num == *n))
}

fn parted(disk: &str) -> CommandLine {
    CommandLine::new("parted").args(["-s", disk])
}

fn sector_end(region: Region) -> String {
    (region.end() * 2).saturating_sub(1).to_string()
}

/// Give `vol` number `num` and the matching device node.
fn renumber(vol: &mut Volume, disk: &str, num: u32) {
    let device = partition_device(disk, num);
    debug!("{} becomes {device}", vol.device());
    vol.num = num;
    vol.dev.name = device.trim_start_matches("/dev/").to_string();
    vol.dev.device = device;
    vol.dev.alt_names.clear();
}

impl Storage {
    fn disk_id(&self, disk: &str) -> Result<ContainerId> {
        self.graph
            .containers()
            .filter(|c| c.disk().is_some() && !c.dev.deleted)
            .find(|c| c.dev.matches(disk))
            .map(|c| c.id)
            .ok_or_else(|| StorageError::DiskNotFound(disk.to_string()).into())
    }

    fn disk(&self, cid: ContainerId) -> Result<&Container> {
        self.graph
            .container(cid)
            .ok_or_else(|| Error::internal(format!("disk {cid:?} is not in the graph")))
    }

    fn writable_disk(&self, cid: ContainerId) -> Result<&Container> {
        self.writable(DiskError::ChangeReadonly)?;
        let c = self.disk(cid)?;
        if c.readonly {
            return Err(DiskError::ChangeReadonly.into());
        }
        Ok(c)
    }

    fn partition_id(&self, device: &str) -> Result<VolumeId> {
        self.graph
            .find_volume(device)
            .filter(|v| v.partition().is_some())
            .map(|v| v.id)
            .ok_or_else(|| DiskError::PartitionNotFound.into())
    }

    /// Plan a partition of `len_k` KiB at `start_k`. Returns its device.
    pub fn create_partition(
        &mut self,
        disk: &str,
        kind: PartitionType,
        start_k: u64,
        len_k: u64,
    ) -> Result<String> {
        let cid = self.disk_id(disk)?;
        let c = self.writable_disk(cid)?;
        let label = disk_label(c);
        if label == DiskLabel::None {
            return Err(DiskError::InvalidLabel.into());
        }
        if len_k == 0 {
            return Err(DiskError::ZeroSize.into());
        }
        let region = Region::new(start_k, len_k);
        if region.end() > c.dev.size_k {
            return Err(DiskError::PartitionExceedsDisk.into());
        }

        let extended = extended_region(c);
        let kind = match kind {
            PartitionType::Any if extended.is_some_and(|e| e.contains(&region)) => {
                PartitionType::Logical
            }
            PartitionType::Any => PartitionType::Primary,
            other => other,
        };
        match kind {
            PartitionType::Extended => {
                if !label.extended_possible() {
                    return Err(DiskError::ExtendedImpossible.into());
                }
                if extended.is_some() {
                    return Err(DiskError::ExtendedOnlyOnce.into());
                }
            }
            PartitionType::Logical => {
                let extended = extended.ok_or(DiskError::LogicalNoExtended)?;
                if !extended.contains(&region) {
                    return Err(DiskError::LogicalOutsideExtended.into());
                }
            }
            _ => {}
        }
        let logical = kind == PartitionType::Logical;
        let overlaps = live_partitions(c).any(|(_, p)| {
            (p.kind == PartitionType::Logical) == logical && p.region.intersects(&region)
        });
        if overlaps {
            return Err(DiskError::PartitionOverlapsExisting.into());
        }
        let num = next_free_number(c, kind).ok_or(DiskError::NoFreeNumber)?;
        let device = partition_device(c.device(), num);

        let id = if kind == PartitionType::Extended {
            PartitionId::EXTENDED
        } else {
            PartitionId::LINUX
        };
        let vid = self.graph.new_volume_id();
        let mut dev = Device::new(device.trim_start_matches("/dev/"), device.as_str(), len_k);
        dev.created = true;
        let mut vol = Volume::new(
            vid,
            cid,
            dev,
            num,
            VolumeData::Partition(PartitionData {
                region,
                kind,
                id,
                orig_id: id,
                boot: false,
            }),
        );
        vol.mount_by = self.config.default_mount_by;
        vol.orig_mount_by = vol.mount_by;
        self.graph.add_volume(vol);
        debug!("planned {kind} partition {device} at {region}");
        Ok(device)
    }

    /// First free region that holds `size_k`, primary before logical.
    pub fn create_partition_any(&mut self, disk: &str, size_k: u64) -> Result<String> {
        let cid = self.disk_id(disk)?;
        let c = self.writable_disk(cid)?;
        let found = [PartitionType::Primary, PartitionType::Logical]
            .into_iter()
            .filter(|kind| next_free_number(c, *kind).is_some())
            .find_map(|kind| {
                free_gaps(c, kind)
                    .into_iter()
                    .find(|r| r.len >= size_k)
                    .map(|r| (kind, r))
            });
        let (kind, region) = found.ok_or(DiskError::NoSpace)?;
        self.create_partition(disk, kind, region.start, size_k)
    }

    /// Fill the largest free region usable for `kind`.
    pub fn create_partition_max(&mut self, disk: &str, kind: PartitionType) -> Result<String> {
        let cid = self.disk_id(disk)?;
        let c = self.writable_disk(cid)?;
        let kinds: &[PartitionType] = match kind {
            PartitionType::Any => &[PartitionType::Primary, PartitionType::Logical],
            _ => std::slice::from_ref(&kind),
        };
        let found = kinds
            .iter()
            .filter(|k| next_free_number(c, **k).is_some())
            .flat_map(|k| free_gaps(c, *k).into_iter().map(move |r| (*k, r)))
            .max_by_key(|(_, r)| r.len);
        let (kind, region) = found.ok_or(DiskError::NoSpace)?;
        self.create_partition(disk, kind, region.start, region.len)
    }

    /// Number and device a new partition of `kind` would get.
    pub fn next_free_partition(&self, disk: &str, kind: PartitionType) -> Result<(u32, String)> {
        let c = self.disk(self.disk_id(disk)?)?;
        let kind = if kind == PartitionType::Any {
            PartitionType::Primary
        } else {
            kind
        };
        let num = next_free_number(c, kind).ok_or(DiskError::NoFreeNumber)?;
        Ok((num, partition_device(c.device(), num)))
    }

    /// Regions a partition of `kind` could be created in.
    pub fn free_regions(&self, disk: &str, kind: PartitionType) -> Result<Vec<Region>> {
        let c = self.disk(self.disk_id(disk)?)?;
        Ok(free_gaps(c, kind))
    }

    /// Drop a partition. Removing an extended partition takes its logical
    /// partitions along.
    pub fn remove_partition(&mut self, device: &str) -> Result<()> {
        self.writable(DiskError::ChangeReadonly)?;
        let vid = self.partition_id(device)?;
        let vol = volume_of(&self.graph, vid)?;
        let cid = vol.container;
        let c = self.writable_disk(cid)?;

        if vol.is_extended() {
            let mut logicals: Vec<(u32, String)> = live_partitions(c)
                .filter(|(_, p)| p.kind == PartitionType::Logical)
                .map(|(v, _)| (v.num, v.device().to_string()))
                .collect();
            logicals.sort_by(|a, b| b.0.cmp(&a.0));
            let in_use = logicals.iter().any(|(_, d)| !self.graph.used_by(d).is_empty());
            if in_use && !self.config.recursive_removal {
                return Err(DiskError::RemoveUsedBy.into());
            }
            for (_, logical) in logicals {
                self.remove_partition(&logical)?;
            }
        }
        self.release_users(vol.device(), DiskError::RemoveUsedBy)?;

        if vol.created() {
            self.graph.remove_volume(vid);
        } else {
            self.graph.mark_deleted(vid);
        }
        self.close_number_gap(cid, &vol);
        debug!("partition {} removed from plan", vol.device());
        Ok(())
    }

    /// Shift numbers the way the kernel will after `removed` is gone:
    /// later logical partitions move down by one, created primaries take
    /// the lowest free number.
    fn close_number_gap(&mut self, cid: ContainerId, removed: &Volume) {
        let Some(c) = self.graph.container_mut(cid) else {
            return;
        };
        let disk = c.device().to_string();
        if removed.is_logical() {
            for v in c.volumes.iter_mut().filter(|v| v.is_logical() && !v.deleted()) {
                if v.num > removed.num {
                    let num = v.num - 1;
                    renumber(v, &disk, num);
                }
            }
        } else {
            let mut taken: Vec<u32> = c
                .volumes
                .iter()
                .filter(|v| !v.deleted() && !v.created() && !v.is_logical())
                .map(|v| v.num)
                .collect();
            let mut created: Vec<usize> = (0..c.volumes.len())
                .filter(|i| {
                    let v = &c.volumes[*i];
                    v.created() && !v.deleted() && !v.is_logical()
                })
                .collect();
            created.sort_by_key(|i| c.volumes[*i].num);
            for index in created {
                let current = c.volumes[index].num;
                let lowest = (1..current).find(|n| !taken.contains(n)).unwrap_or(current);
                if lowest != current {
                    renumber(&mut c.volumes[index], &disk, lowest);
                }
                taken.push(lowest);
            }
        }
        c.volumes.sort_by_key(|v| v.num);
    }

    pub fn resize_partition(&mut self, device: &str, size_k: u64) -> Result<()> {
        let vid = self.partition_id(device)?;
        let vol = volume_of(&self.graph, vid)?;
        let c = self.writable_disk(vol.container)?;
        if size_k == 0 {
            return Err(DiskError::ZeroSize.into());
        }
        vol.can_resize(size_k)?;
        let part = vol
            .partition()
            .cloned()
            .ok_or(DiskError::PartitionNotFound)?;
        let region = Region::new(part.region.start, size_k);

        if region.end() > usable_region(c).end().max(part.region.end()) {
            return Err(DiskError::ResizeNoSpace.into());
        }
        if size_k > part.region.len {
            let logical = vol.is_logical();
            let collides = live_partitions(c).any(|(v, p)| {
                v.id != vid
                    && (p.kind == PartitionType::Logical) == logical
                    && p.region.intersects(&region)
            });
            let outside = logical && !extended_region(c).is_some_and(|e| e.contains(&region));
            if collides || outside {
                return Err(DiskError::ResizeNoSpace.into());
            }
        } else if vol.is_extended() {
            let cut_off = live_partitions(c)
                .filter(|(_, p)| p.kind == PartitionType::Logical)
                .any(|(_, p)| !region.contains(&p.region));
            if cut_off {
                return Err(DiskError::ResizeNoSpace.into());
            }
        }

        if let Some(p) = self.volume_mut(vid)?.partition_mut() {
            p.region = region;
        }
        self.graph.mark_resize(vid, size_k);
        Ok(())
    }

    pub fn change_partition_id(&mut self, device: &str, id: PartitionId) -> Result<()> {
        let vid = self.partition_id(device)?;
        let vol = volume_of(&self.graph, vid)?;
        self.writable_disk(vol.container)?;
        if vol.is_extended() || id == PartitionId::EXTENDED {
            return Err(DiskError::InvalidType.into());
        }
        if let Some(p) = self.volume_mut(vid)?.partition_mut() {
            p.id = id;
        }
        Ok(())
    }

    /// Write a fresh `label` on commit, dropping every partition.
    pub fn destroy_partition_table(&mut self, disk: &str, label: DiskLabel) -> Result<()> {
        self.writable(DiskError::ChangeReadonly)?;
        if label == DiskLabel::None {
            return Err(DiskError::InvalidLabel.into());
        }
        let cid = self.disk_id(disk)?;
        let c = self.disk(cid)?;
        if c.dev.is_used() {
            return Err(StorageError::DiskUsedBy(c.device().to_string()).into());
        }
        let partitions: Vec<String> =
            live_partitions(c).map(|(v, _)| v.device().to_string()).collect();
        let in_use = partitions.iter().any(|d| !self.graph.used_by(d).is_empty());
        if in_use && !self.config.recursive_removal {
            return Err(DiskError::RemoveUsedBy.into());
        }
        for device in &partitions {
            self.release_users(device, DiskError::RemoveUsedBy)?;
        }

        let Some(c) = self.graph.container_mut(cid) else {
            return Err(StorageError::DiskNotFound(disk.to_string()).into());
        };
        c.volumes.retain(|v| !v.created());
        for v in &mut c.volumes {
            v.dev.deleted = true;
        }
        c.readonly = false;
        if let Some(d) = c.disk_mut() {
            d.label = label;
            d.del_ptable = true;
        }
        debug!("{disk}: new {label} label planned");
        Ok(())
    }
}

/// Write the new disk label; the old partitions go with it.
pub(crate) fn commit_label(graph: &mut DeviceGraph, ctx: &mut Ctx, cid: ContainerId) -> Result<()> {
    let Some(c) = graph.container(cid) else {
        return Ok(());
    };
    let device = c.device().to_string();
    let label = disk_label(c);
    let deleted: Vec<VolumeId> = c.volumes.iter().filter(|v| v.deleted()).map(|v| v.id).collect();

    for vid in &deleted {
        commit::release_mount(graph, ctx, *vid)?;
    }
    ctx.run(
        parted(&device).args(["mklabel", label.as_str()]),
        DiskError::SetLabelFailed,
    )?;
    for vid in deleted {
        graph.remove_volume(vid);
    }
    if let Some(d) = graph.container_mut(cid).and_then(Container::disk_mut) {
        d.del_ptable = false;
    }
    Ok(())
}

pub(crate) fn commit_remove(
    graph: &mut DeviceGraph,
    ctx: &mut Ctx,
    cid: ContainerId,
    vid: VolumeId,
) -> Result<()> {
    let vol = volume_of(graph, vid)?;
    let disk = graph.disk_device(cid)?;
    ctx.run(
        parted(&disk).args(["rm".to_string(), vol.orig_num.to_string()]),
        DiskError::RemoveFailed,
    )?;
    if vol.is_logical() {
        if let Some(c) = graph.container_mut(cid) {
            let later = c.volumes.iter_mut().filter(|v| {
                v.is_logical() && !v.created() && v.id != vid && v.orig_num > vol.orig_num
            });
            for v in later {
                v.orig_num -= 1;
            }
        }
    }
    Ok(())
}

pub(crate) fn commit_create(
    graph: &mut DeviceGraph,
    ctx: &mut Ctx,
    cid: ContainerId,
    vid: VolumeId,
) -> Result<()> {
    let vol = volume_of(graph, vid)?;
    let part = vol
        .partition()
        .cloned()
        .ok_or_else(|| Error::internal(format!("{} is not a partition", vol.device())))?;
    let disk = graph.disk_device(cid)?;
    let label = graph.container(cid).map_or(DiskLabel::None, disk_label);

    let mut mkpart = parted(&disk).args(["-a", "none", "unit", "s", "mkpart", part.kind.as_str()]);
    if part.kind != PartitionType::Extended {
        mkpart = mkpart.arg(part.id.mkpart_fs_hint());
    }
    mkpart = mkpart.args([(part.region.start * 2).to_string(), sector_end(part.region)]);
    ctx.run(mkpart, DiskError::CreateFailed)?;

    if part.kind != PartitionType::Extended {
        set_type(ctx, &disk, label, vol.num, PartitionId::LINUX, part.id)?;
    }
    if part.boot {
        ctx.run(
            parted(&disk).args(["set".to_string(), vol.num.to_string(), "boot".into(), "on".into()]),
            DiskError::SetTypeFailed,
        )?;
    }
    if ctx.config.zero_new_partitions && part.kind != PartitionType::Extended {
        let dd = CommandLine::new("dd").args([
            "if=/dev/zero".to_string(),
            format!("of={}", vol.device()),
            "bs=1k".to_string(),
            format!("count={ZERO_K}"),
        ]);
        if let Err(error) = ctx.run(dd, DiskError::CreateFailed) {
            warn!("zeroing {} failed: {error}", vol.device());
        }
    }
    if let Some(p) = graph.volume_mut(vid).and_then(Volume::partition_mut) {
        p.orig_id = p.id;
    }
    Ok(())
}

pub(crate) fn commit_resize(
    graph: &mut DeviceGraph,
    ctx: &mut Ctx,
    cid: ContainerId,
    vid: VolumeId,
) -> Result<()> {
    let vol = volume_of(graph, vid)?;
    let region = vol
        .partition()
        .map(|p| p.region)
        .ok_or_else(|| Error::internal(format!("{} is not a partition", vol.device())))?;
    let disk = graph.disk_device(cid)?;
    ctx.run(
        parted(&disk).args([
            "unit".to_string(),
            "s".to_string(),
            "resizepart".to_string(),
            vol.orig_num.to_string(),
            sector_end(region),
        ]),
        DiskError::ResizeFailed,
    )?;
    Ok(())
}

pub(crate) fn commit_set_type(
    graph: &mut DeviceGraph,
    ctx: &mut Ctx,
    cid: ContainerId,
    vid: VolumeId,
) -> Result<()> {
    let vol = volume_of(graph, vid)?;
    let Some(part) = vol.partition() else {
        return Ok(());
    };
    let disk = graph.disk_device(cid)?;
    let label = graph.container(cid).map_or(DiskLabel::None, disk_label);
    set_type(ctx, &disk, label, vol.orig_num, part.orig_id, part.id)?;
    if let Some(p) = graph.volume_mut(vid).and_then(Volume::partition_mut) {
        p.orig_id = p.id;
    }
    Ok(())
}

/// Switch partition `num` from `from` to `to`, through parted flags where
/// one exists and the msdos system id otherwise.
fn set_type(
    ctx: &mut Ctx,
    disk: &str,
    label: DiskLabel,
    num: u32,
    from: PartitionId,
    to: PartitionId,
) -> Result<()> {
    if from == to {
        return Ok(());
    }
    let num = num.to_string();
    if let Some(flag) = from.parted_flag() {
        ctx.run(
            parted(disk).args(["set", num.as_str(), flag, "off"]),
            DiskError::SetTypeFailed,
        )?;
    }
    if let Some(flag) = to.parted_flag() {
        ctx.run(
            parted(disk).args(["set", num.as_str(), flag, "on"]),
            DiskError::SetTypeFailed,
        )?;
    } else if label == DiskLabel::Msdos {
        ctx.run(
            parted(disk).args(["type".to_string(), num, to.to_string()]),
            DiskError::SetTypeFailed,
        )?;
    }
    Ok(())
}

impl DeviceGraph {
    fn disk_device(&self, cid: ContainerId) -> Result<String> {
        self.container(cid)
            .map(|c| c.device().to_string())
            .ok_or_else(|| Error::internal(format!("disk {cid:?} vanished during commit")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::container::{ContainerData, DiskData};
    use storage_sys::{MemoryFstab, MemoryMdadm, RecordingRunner};
    use storage_types::{GIB, UsedBy, UsedByKind};

    fn storage(label: DiskLabel) -> (Storage, RecordingRunner) {
        let mut graph = DeviceGraph::new();
        graph.add_container(
            Device::new("sda", "/dev/sda", 10 * GIB),
            ContainerData::Disk(DiskData {
                label,
                model: None,
                del_ptable: false,
            }),
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
    fn partition_names() {
        assert_eq!(partition_device("/dev/sda", 1), "/dev/sda1");
        assert_eq!(partition_device("/dev/nvme0n1", 2), "/dev/nvme0n1p2");
        assert_eq!(partition_device("/dev/mmcblk0", 1), "/dev/mmcblk0p1");
        assert_eq!(partition_device("/dev/cciss/c0d0", 3), "/dev/cciss/c0d0p3");
        assert_eq!(partition_device("/dev/mapper/mpatha", 1), "/dev/mapper/mpatha_part1");
    }

    #[test]
    fn region_rules() {
        let (mut storage, _) = storage(DiskLabel::Msdos);
        let err = |r: Result<String>| r.map_err(|e| e.code());
        assert_eq!(err(storage.create_partition("/dev/sda", PartitionType::Primary, 1024, 0)), Err(-1018));
        assert_eq!(
            err(storage.create_partition("/dev/sda", PartitionType::Primary, 1024, 20 * GIB)),
            Err(-1001)
        );
        assert_eq!(
            storage.create_partition("/dev/sda", PartitionType::Primary, 1024, GIB),
            Ok("/dev/sda1".to_string())
        );
        assert_eq!(
            err(storage.create_partition("/dev/sda", PartitionType::Primary, 2048, GIB)),
            Err(-1000)
        );
        assert_eq!(
            err(storage.create_partition("/dev/sda", PartitionType::Logical, 2 * GIB, GIB)),
            Err(-1009)
        );
        storage
            .create_partition("/dev/sda", PartitionType::Extended, 2 * GIB, 4 * GIB)
            .expect("extended");
        assert_eq!(
            err(storage.create_partition("/dev/sda", PartitionType::Extended, 7 * GIB, GIB)),
            Err(-1002)
        );
        assert_eq!(
            err(storage.create_partition("/dev/sda", PartitionType::Logical, 5 * GIB, 2 * GIB)),
            Err(-1010)
        );
        assert_eq!(
            storage.create_partition("/dev/sda", PartitionType::Any, 2 * GIB + 1024, GIB),
            Ok("/dev/sda5".to_string())
        );
    }

    #[test]
    fn gpt_has_no_extended() {
        let (mut storage, _) = storage(DiskLabel::Gpt);
        assert_eq!(
            storage
                .create_partition("/dev/sda", PartitionType::Extended, 1024, GIB)
                .map_err(|e| e.code()),
            Err(-1003)
        );
    }

    #[test]
    fn logical_partitions_are_renumbered() {
        let (mut storage, _) = storage(DiskLabel::Msdos);
        storage
            .create_partition("/dev/sda", PartitionType::Extended, 1024, 10 * GIB - 1024)
            .expect("extended");
        for _ in 0..3 {
            storage.create_partition_any("/dev/sda", GIB).expect("logical");
        }
        assert!(storage.find_volume("/dev/sda7").is_some());
        storage.remove_partition("/dev/sda5").expect("remove");
        assert!(storage.find_volume("/dev/sda7").is_none());
        assert!(storage.find_volume("/dev/sda6").is_some());
        assert_eq!(
            storage.next_free_partition("/dev/sda", PartitionType::Logical),
            Ok((7, "/dev/sda7".to_string()))
        );

        assert!(storage.remove_partition("/dev/sda2").is_err());
        storage.remove_partition("/dev/sda1").expect("extended");
        assert_eq!(storage.volumes().count(), 0);
    }

    #[test]
    fn max_partition_takes_largest_region() {
        let (mut storage, _) = storage(DiskLabel::Gpt);
        storage
            .create_partition("/dev/sda", PartitionType::Primary, 2 * GIB, GIB)
            .expect("middle");
        let device = storage
            .create_partition_max("/dev/sda", PartitionType::Primary)
            .expect("max");
        let vol = storage.find_volume(&device).expect("volume");
        assert_eq!(vol.partition().map(|p| p.region.start), Some(3 * GIB));
        assert_eq!(vol.dev.size_k, 7 * GIB - GPT_TAIL_K);
    }

    #[test]
    fn used_partition_is_not_removed() {
        let (mut storage, _) = storage(DiskLabel::Gpt);
        let device = storage
            .create_partition("/dev/sda", PartitionType::Primary, 1024, GIB)
            .expect("create");
        storage
            .graph
            .add_used_by(&device, UsedBy::new(UsedByKind::Md, "/dev/md0"));
        assert_eq!(storage.remove_partition(&device).map_err(|e| e.code()), Err(-1027));
    }

    #[test]
    fn commit_creates_with_type_flags() {
        let (mut storage, runner) = storage(DiskLabel::Gpt);
        let device = storage
            .create_partition("/dev/sda", PartitionType::Primary, 1024, GIB)
            .expect("create");
        storage.change_partition_id(&device, PartitionId::LVM).expect("type");
        storage.commit().expect("commit");
        assert_eq!(
            runner.rendered(),
            vec![
                format!("parted -s /dev/sda -a none unit s mkpart primary ext2 2048 {}", (GIB + 1024) * 2 - 1),
                "parted -s /dev/sda set 1 lvm on".to_string(),
            ]
        );
        let vol = storage.find_volume(&device).expect("volume");
        assert!(!vol.created());
        assert!(!vol.needs_type_change());
    }

    #[test]
    fn new_label_drops_partitions_in_one_step() {
        let (mut storage, runner) = storage(DiskLabel::Msdos);
        storage
            .create_partition("/dev/sda", PartitionType::Primary, 1024, GIB)
            .expect("create");
        storage.commit().expect("commit");
        runner.clear();

        storage.destroy_partition_table("/dev/sda", DiskLabel::Gpt).expect("label");
        let actions = storage.get_commit_actions();
        assert_eq!(actions.len(), 1);
        assert!(actions[0].destructive);
        storage.commit().expect("commit");
        assert_eq!(runner.rendered(), vec!["parted -s /dev/sda mklabel gpt"]);
        assert_eq!(storage.volumes().count(), 0);
    }
}
