// SPDX-License-Identifier: GPL-3.0-only

//! Detection: run the fact parsers against the live system and assemble
//! their records into a device graph.
//!
//! `Facts` is plain serde data, so a captured system (or a hand-written
//! plan file) can be turned into a graph without touching the host.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use storage_contracts::{CommandRunner, FstabEntry};
use storage_sys::MountRecord;
use storage_sys::disk::dasdview::{DasdFormat, DasdInfo, probe_dasd};
use storage_sys::disk::parted::{PartedDisk, probe_disk};
use storage_sys::disk::{block_numbers, list_disks};
use storage_sys::logical::btrfs_tools::{BtrfsRecord, probe_btrfs, probe_subvolumes};
use storage_sys::logical::dm_tools::{DmRecord, probe_dm};
use storage_sys::logical::loop_tools::{LoopRecord, probe_loops};
use storage_sys::logical::lvm_tools::{LvmReport, probe_lvm};
use storage_sys::logical::mdadm_tools::{MdRecord, probe_md};
use storage_sys::mounts::{read_mounts, read_swaps};
use storage_types::{
    ContainerKind, DiskLabel, EncryptType, FsType, MountBy, Region, UsedBy, UsedByKind,
};
use tracing::{debug, info, warn};

use crate::allocator::{ExtentPool, LvExtents, PhysicalVolume};
use crate::config::EngineConfig;
use crate::container::{ContainerData, DiskData, VgData};
use crate::device::Device;
use crate::error::Result;
use crate::graph::DeviceGraph;
use crate::volume::{
    BtrfsData, DmData, LoopData, LvData, MdData, PartitionData, Subvolume, Volume, VolumeData,
};

const SYS_BLOCK: &str = "/sys/block";
const SYS_CLASS_BLOCK: &str = "/sys/class/block";
const PROC_MDSTAT: &str = "/proc/mdstat";
const PROC_MOUNTS: &str = "/proc/mounts";
const PROC_SWAPS: &str = "/proc/swaps";

/// Everything detection learned about the system, before graph assembly.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Facts {
    pub disks: Vec<PartedDisk>,
    /// Disks the kernel reports read-only.
    pub readonly_disks: Vec<String>,
    /// Geometry of DASD disks, keyed by device.
    pub dasd: BTreeMap<String, DasdInfo>,
    pub lvm: LvmReport,
    pub md: Vec<MdRecord>,
    pub loops: Vec<LoopRecord>,
    /// Backing file size per loop device.
    pub loop_sizes: BTreeMap<String, u64>,
    pub dm: Vec<DmRecord>,
    pub btrfs: Vec<BtrfsRecord>,
    /// Subvolume paths per btrfs uuid.
    pub subvolumes: BTreeMap<String, Vec<String>>,
    /// `major:minor` → device node.
    pub block_numbers: BTreeMap<String, String>,
    pub mounts: Vec<MountRecord>,
    pub swaps: Vec<String>,
    pub fstab: Vec<FstabEntry>,
}

/// Run every fact parser. Subsystems whose tools are missing come back empty.
pub fn collect(runner: &mut dyn CommandRunner, fstab: Vec<FstabEntry>) -> Result<Facts> {
    let mut facts = Facts {
        fstab,
        ..Facts::default()
    };

    for disk in list_disks(Path::new(SYS_BLOCK))? {
        if disk.readonly {
            facts.readonly_disks.push(disk.device.clone());
        }
        if disk.name.starts_with("dasd") {
            if let Some(geometry) = probe_dasd(runner, &disk.device)? {
                facts.dasd.insert(disk.device.clone(), geometry);
            }
        }
        facts.disks.push(probe_disk(runner, &disk.device, disk.size_k)?);
    }

    facts.lvm = probe_lvm(runner)?;
    facts.md = probe_md(runner, Path::new(PROC_MDSTAT))?;
    facts.loops = probe_loops(runner)?;
    for lo in &facts.loops {
        match std::fs::metadata(&lo.file) {
            Ok(meta) => {
                facts.loop_sizes.insert(lo.device.clone(), meta.len() / 1024);
            }
            Err(error) => debug!("cannot stat {}: {error}", lo.file),
        }
    }
    facts.dm = probe_dm(runner)?;
    facts.btrfs = probe_btrfs(runner)?;
    facts.block_numbers = block_numbers(Path::new(SYS_CLASS_BLOCK))?;
    facts.mounts = read_mounts(Path::new(PROC_MOUNTS))?;
    facts.swaps = read_swaps(Path::new(PROC_SWAPS))?;

    for fs in &facts.btrfs {
        let mount_point = facts
            .mounts
            .iter()
            .find(|m| fs.devices.iter().any(|d| d.device == m.device))
            .map(|m| m.mount_point.clone());
        let Some(mount_point) = mount_point else {
            continue;
        };
        match probe_subvolumes(runner, &mount_point) {
            Ok(paths) => {
                facts.subvolumes.insert(fs.uuid.clone(), paths);
            }
            Err(error) => warn!("cannot list subvolumes below {mount_point}: {error}"),
        }
    }

    info!(
        "detected {} disk(s), {} volume group(s), {} array(s), {} btrfs filesystem(s)",
        facts.disks.len(),
        facts.lvm.vgs.len(),
        facts.md.len(),
        facts.btrfs.len()
    );
    Ok(facts)
}

/// Device-mapper name of an LV: dashes inside either name are doubled.
fn mapper_name(vg: &str, lv: &str) -> String {
    format!("{}-{}", vg.replace('-', "--"), lv.replace('-', "--"))
}

fn node_name(device: &str) -> &str {
    device.trim_start_matches("/dev/")
}

fn trailing_number(device: &str) -> u32 {
    let prefix = device.trim_end_matches(|c: char| c.is_ascii_digit()).len();
    device[prefix..].parse().unwrap_or(0)
}

fn add_disks(graph: &mut DeviceGraph, facts: &Facts, config: &EngineConfig) {
    for disk in &facts.disks {
        let mut dev = Device::new(node_name(&disk.device), disk.device.as_str(), disk.size_k);
        let dasd = facts.dasd.get(&disk.device);
        if let Some(geometry) = dasd {
            dev.size_k = geometry.size_k().max(disk.size_k);
        }
        let cid = graph.add_container(
            dev,
            ContainerData::Disk(DiskData {
                label: disk.label,
                model: disk.model.clone(),
                del_ptable: false,
            }),
        );
        // only CDL formatted DASDs hold a partition table we may change
        let readonly = facts.readonly_disks.contains(&disk.device)
            || dasd.is_some_and(|g| g.format != DasdFormat::Cdl);
        if let Some(c) = graph.container_mut(cid) {
            c.readonly = readonly;
        }

        for part in &disk.partitions {
            let device = crate::kinds::disk::partition_device(&disk.device, part.number);
            let vid = graph.new_volume_id();
            let mut vol = Volume::new(
                vid,
                cid,
                Device::new(node_name(&device), device.as_str(), part.size_k),
                part.number,
                VolumeData::Partition(PartitionData {
                    region: Region::new(part.start_k, part.size_k),
                    kind: part.partition_type,
                    id: part.id,
                    orig_id: part.id,
                    boot: part.boot,
                }),
            );
            vol.detected_fs = part.fs;
            vol.fs = part.fs;
            vol.mount_by = config.default_mount_by;
            vol.orig_mount_by = vol.mount_by;
            graph.add_volume(vol);
        }
        if disk.label == DiskLabel::None {
            debug!("{} carries no partition table", disk.device);
        }
    }
}

fn add_volume_groups(graph: &mut DeviceGraph, facts: &Facts, config: &EngineConfig) {
    for vg in &facts.lvm.vgs {
        let mut pool = ExtentPool::new(vg.pe_size_k);
        pool.pe_count = vg.pe_count;
        pool.pe_free = vg.pe_free;
        pool.pvs = facts
            .lvm
            .pvs
            .iter()
            .filter(|pv| pv.vg_name.as_deref() == Some(vg.name.as_str()))
            .map(|pv| PhysicalVolume {
                device: pv.device.clone(),
                pe_count: pv.pe_count,
                pe_free: pv.pe_count.saturating_sub(pv.pe_alloc),
            })
            .collect();
        let members: Vec<String> = pool.pvs.iter().map(|pv| pv.device.clone()).collect();

        let device = format!("/dev/{}", vg.name);
        let cid = graph.add_container(
            Device::new(vg.name.as_str(), device.as_str(), pool.size_k()),
            ContainerData::Lvm(VgData {
                uuid: vg.uuid.clone(),
                pool: pool.clone(),
            }),
        );
        if let Some(c) = graph.container_mut(cid) {
            c.readonly = vg.readonly;
        }

        for lv in facts.lvm.lvs.iter().filter(|lv| lv.vg_name == vg.name) {
            let le = pool.size_to_le(lv.size_k);
            let vid = graph.new_volume_id();
            let mut dev = Device::new(
                lv.name.as_str(),
                format!("{device}/{}", lv.name),
                lv.size_k,
            );
            dev.alt_names
                .push(format!("/dev/mapper/{}", mapper_name(&vg.name, &lv.name)));
            let mut vol = Volume::new(
                vid,
                cid,
                dev,
                0,
                VolumeData::Lv(LvData {
                    vg: vg.name.clone(),
                    uuid: lv.uuid.clone(),
                    extents: LvExtents {
                        le,
                        stripes: lv.stripes.max(1),
                        pe_map: lv.pe_map.clone(),
                    },
                    orig_le: le,
                    stripe_size_k: lv.stripe_size_k,
                }),
            );
            vol.mount_by = config.default_mount_by;
            vol.orig_mount_by = vol.mount_by;
            graph.add_volume(vol);
        }

        let edge = UsedBy::new(UsedByKind::Lvm, device.as_str());
        for member in &members {
            if !graph.add_used_by(member, edge.clone()) {
                warn!("physical volume {member} of {} is not in the graph", vg.name);
            }
        }
    }
}

fn add_arrays(graph: &mut DeviceGraph, facts: &Facts) {
    if facts.md.is_empty() {
        return;
    }
    let cid = graph.ensure_pool(ContainerKind::Md);
    for md in &facts.md {
        let vid = graph.new_volume_id();
        let vol = Volume::new(
            vid,
            cid,
            Device::new(node_name(&md.device), md.device.as_str(), md.size_k),
            md.number,
            VolumeData::Md(MdData {
                level: md.level,
                members: md.members.clone(),
                spares: md.spares.clone(),
                chunk_k: md.chunk_k,
                parity: md.parity,
                md_uuid: md.uuid.clone().unwrap_or_default(),
                destroy_sb: false,
            }),
        );
        graph.add_volume(vol);
        if md.degraded {
            warn!("{} is degraded", md.device);
        }
        let edge = UsedBy::new(UsedByKind::Md, md.device.as_str());
        for member in md.members.iter().chain(&md.spares) {
            graph.add_used_by(member, edge.clone());
        }
    }
}

fn add_loops(graph: &mut DeviceGraph, facts: &Facts) {
    if facts.loops.is_empty() {
        return;
    }
    let cid = graph.ensure_pool(ContainerKind::Loop);
    for lo in &facts.loops {
        let num = trailing_number(&lo.device);
        let size_k = facts.loop_sizes.get(&lo.device).copied().unwrap_or(0);
        let vid = graph.new_volume_id();
        let mut vol = Volume::new(
            vid,
            cid,
            Device::new(node_name(&lo.device), lo.device.as_str(), size_k),
            num,
            VolumeData::Loop(LoopData {
                file: lo.file.clone(),
                reuse: true,
                delete_file: false,
            }),
        );
        vol.numeric = true;
        graph.add_volume(vol);
    }
}

fn add_dm_tables(graph: &mut DeviceGraph, facts: &Facts) {
    let lvm_names: BTreeSet<String> = facts
        .lvm
        .lvs
        .iter()
        .map(|lv| mapper_name(&lv.vg_name, &lv.name))
        .collect();
    let tables: Vec<&DmRecord> = facts
        .dm
        .iter()
        .filter(|t| !lvm_names.contains(&t.name))
        .collect();
    if tables.is_empty() {
        return;
    }

    let cid = graph.ensure_pool(ContainerKind::Dm);
    for table in tables {
        let device = format!("/dev/mapper/{}", table.name);
        let devices: Vec<String> = table
            .devices
            .iter()
            .map(|d| facts.block_numbers.get(d).cloned().unwrap_or_else(|| d.clone()))
            .collect();
        let vid = graph.new_volume_id();
        graph.add_volume(Volume::new(
            vid,
            cid,
            Device::new(table.name.as_str(), device.as_str(), table.size_k),
            0,
            VolumeData::Dm(DmData {
                target: table.target.clone(),
                devices: devices.clone(),
            }),
        ));

        let edge = UsedBy::new(UsedByKind::Dm, device.as_str());
        for underlying in &devices {
            graph.add_used_by(underlying, edge.clone());
            if table.target == "crypt" {
                if let Some(id) = graph.find_volume_id(underlying) {
                    if let Some(vol) = graph.volume_mut(id) {
                        vol.encryption = EncryptType::Luks;
                        vol.orig_encryption = EncryptType::Luks;
                    }
                }
            }
        }
    }
}

fn add_btrfs(graph: &mut DeviceGraph, facts: &Facts) {
    if facts.btrfs.is_empty() {
        return;
    }
    let cid = graph.ensure_pool(ContainerKind::Btrfs);
    for fs in &facts.btrfs {
        let Some(first) = fs.devices.first() else {
            warn!("btrfs {} lists no devices", fs.uuid);
            continue;
        };
        let members: Vec<String> = fs.devices.iter().map(|d| d.device.clone()).collect();
        let subvolumes = facts
            .subvolumes
            .get(&fs.uuid)
            .map(|paths| {
                paths
                    .iter()
                    .map(|path| Subvolume {
                        path: path.clone(),
                        created: false,
                        deleted: false,
                    })
                    .collect()
            })
            .unwrap_or_default();

        let vid = graph.new_volume_id();
        let mut vol = Volume::new(
            vid,
            cid,
            Device::new(fs.uuid.as_str(), first.device.as_str(), fs.size_k()),
            0,
            VolumeData::Btrfs(BtrfsData {
                uuid: fs.uuid.clone(),
                devices: members.clone(),
                devices_add: Vec::new(),
                devices_remove: Vec::new(),
                subvolumes,
            }),
        );
        vol.fs = FsType::Btrfs;
        vol.detected_fs = FsType::Btrfs;
        vol.uuid = fs.uuid.clone();
        if let Some(label) = &fs.label {
            vol.label = label.clone();
            vol.orig_label = label.clone();
        }
        graph.add_volume(vol);

        let edge = UsedBy::new(UsedByKind::Btrfs, fs.uuid.as_str());
        for member in &members {
            graph.add_used_by(member, edge.clone());
            // members stop being independent filesystems
            if let Some(id) = graph.find_volume_id(member) {
                if let Some(m) = graph.volume_mut(id) {
                    if m.btrfs().is_none() {
                        m.detected_fs = FsType::Btrfs;
                        m.fs = FsType::Btrfs;
                    }
                }
            }
        }
    }
}

fn belongs_to(vol: &Volume, device: &str) -> bool {
    match vol.btrfs() {
        Some(b) => b.devices.iter().any(|d| d == device),
        None => vol.dev.matches(device),
    }
}

/// The volume an fstab device spec names, in any of its spellings.
fn fstab_names(vol: &Volume, spec: &str) -> Option<MountBy> {
    if let Some(uuid) = spec.strip_prefix("UUID=") {
        return (!vol.uuid.is_empty() && vol.uuid == uuid).then_some(MountBy::Uuid);
    }
    if let Some(label) = spec.strip_prefix("LABEL=") {
        return (!vol.label.is_empty() && vol.label == label).then_some(MountBy::Label);
    }
    if spec.starts_with("/dev/disk/by-id/") && vol.dev.matches(spec) {
        return Some(MountBy::Id);
    }
    if spec.starts_with("/dev/disk/by-path/") && vol.dev.matches(spec) {
        return Some(MountBy::Path);
    }
    belongs_to(vol, spec).then_some(MountBy::Device)
}

fn apply_mount_state(vol: &mut Volume, facts: &Facts) {
    if let Some(mount) = facts.mounts.iter().find(|m| belongs_to(vol, &m.device)) {
        vol.mount_point = mount.mount_point.clone();
        vol.is_mounted = true;
        if !vol.detected_fs.is_formatted() {
            if let Ok(fs) = mount.fs.parse::<FsType>() {
                vol.detected_fs = fs;
                vol.fs = fs;
            }
        }
    } else if facts.swaps.iter().any(|s| belongs_to(vol, s)) {
        vol.mount_point = "swap".to_string();
        vol.is_mounted = true;
        vol.detected_fs = FsType::Swap;
        vol.fs = FsType::Swap;
    }

    let entry = facts
        .fstab
        .iter()
        .find_map(|e| fstab_names(vol, &e.device).map(|by| (e, by)));
    if let Some((entry, by)) = entry {
        if !vol.is_mounted {
            vol.mount_point = entry.mount.clone();
        }
        vol.fstab_opt = entry.options_string();
        vol.mount_by = by;
        if !vol.detected_fs.is_formatted() {
            if let Ok(fs) = entry.fs.parse::<FsType>() {
                vol.detected_fs = fs;
                vol.fs = fs;
            }
        }
    }

    vol.orig_mount_point = vol.mount_point.clone();
    vol.orig_fstab_opt = vol.fstab_opt.clone();
    vol.orig_mount_by = vol.mount_by;
}

/// Assemble a graph from detected facts: disks first, then the kinds that
/// sit on them, so every used-by edge finds its target.
pub fn build_graph(facts: &Facts, config: &EngineConfig) -> DeviceGraph {
    let mut graph = DeviceGraph::new();
    add_disks(&mut graph, facts, config);
    add_arrays(&mut graph, facts);
    add_volume_groups(&mut graph, facts, config);
    add_loops(&mut graph, facts);
    add_dm_tables(&mut graph, facts);
    add_btrfs(&mut graph, facts);

    for container in graph.containers_mut() {
        for vol in &mut container.volumes {
            apply_mount_state(vol, facts);
        }
    }
    if config.readonly {
        for container in graph.containers_mut() {
            container.readonly = true;
        }
    }
    graph
}
