// SPDX-License-Identifier: GPL-3.0-only

//! Staged commit: planning, ordering and dispatch.
//!
//! Every stage is planned from the live graph, so containers removed in an
//! earlier stage simply stop showing up. The preview (`preview`) and the
//! engine (`run`) share the planner.

use std::cmp::Reverse;
use std::path::Path;

use storage_contracts::{CommandLine, CommandOutput, CommandRunner, MountTable, RaidConfig};
use storage_types::{CommitInfo, CommitStage, ContainerKind};
use tracing::{debug, info, warn};

use crate::comparator;
use crate::config::EngineConfig;
use crate::container::{Container, ContainerId};
use crate::error::{Error, FstabError, InternalError, Result, VolumeError};
use crate::graph::DeviceGraph;
use crate::kinds::{btrfs, disk, dm, loop_dev, lvm, md};
use crate::volume::{Volume, VolumeId};

/// Collaborators a commit talks to.
pub(crate) struct Ctx<'a> {
    pub runner: &'a mut dyn CommandRunner,
    pub mount_table: &'a mut dyn MountTable,
    pub raid_config: &'a mut dyn RaidConfig,
    pub config: &'a EngineConfig,
}

impl Ctx<'_> {
    /// Run `command`; a non-zero exit becomes `error` with stderr attached.
    pub fn run(&mut self, command: CommandLine, error: impl Into<Error>) -> Result<CommandOutput> {
        info!("executing {}", command.render());
        let output = self.runner.run(&command)?;
        if output.ok() {
            Ok(output)
        } else {
            Err(Error::exec(error, &command, &output))
        }
    }

    /// Like `run`, under the configured time and output ceilings.
    pub fn run_bounded(
        &mut self,
        command: CommandLine,
        error: impl Into<Error>,
    ) -> Result<CommandOutput> {
        let command = self.config.bounded_command.apply(command);
        self.run(command, error)
    }

    /// Whether filesystem side effects (directories, files) should happen.
    pub fn executes(&self) -> bool {
        self.runner.executes()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Container(ContainerId),
    Volume(ContainerId, VolumeId),
}

/// One step the engine will take.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedAction {
    pub stage: CommitStage,
    pub kind: ContainerKind,
    pub target: Target,
    pub device: String,
    pub text: String,
    pub destructive: bool,
    pub description: String,
}

impl PlannedAction {
    pub fn info(&self) -> CommitInfo {
        CommitInfo {
            stage: self.stage,
            kind: self.kind,
            device: self.device.clone(),
            container: matches!(self.target, Target::Container(_)),
            destructive: self.destructive,
            text: self.text.clone(),
        }
    }

    /// Preview text with the volume description appended.
    pub fn full_text(&self) -> String {
        if self.description.is_empty() {
            self.text.clone()
        } else {
            format!("{}. {}", self.text, self.description)
        }
    }
}

fn container_action(stage: CommitStage, c: &Container) -> Option<(String, bool)> {
    let name = c.name();
    match stage {
        CommitStage::Decrease => {
            if let Some(d) = c.disk().filter(|d| d.del_ptable) {
                return Some((
                    format!("Set disk label of {} to {}", c.device(), d.label),
                    true,
                ));
            }
            let vg = c.vg()?;
            if c.dev.deleted {
                Some((format!("Remove volume group {name}"), true))
            } else if !vg.pool.pvs_remove.is_empty() {
                let devices: Vec<&str> =
                    vg.pool.pvs_remove.iter().map(|pv| pv.device.as_str()).collect();
                Some((
                    format!("Remove {} from volume group {name}", devices.join(" ")),
                    true,
                ))
            } else {
                None
            }
        }
        CommitStage::Increase => {
            let vg = c.vg()?;
            let devices: Vec<&str> = vg.pool.pvs_add.iter().map(|pv| pv.device.as_str()).collect();
            if c.dev.created {
                Some((
                    format!(
                        "Create volume group {name} ({}) from {}",
                        storage_types::kib_to_pretty(vg.pool.size_k(), false),
                        devices.join(" ")
                    ),
                    false,
                ))
            } else if !devices.is_empty() {
                Some((
                    format!("Extend volume group {name} by {}", devices.join(" ")),
                    false,
                ))
            } else {
                None
            }
        }
        _ => None,
    }
}

fn volume_action(stage: CommitStage, c: &Container, v: &Volume) -> Option<(String, bool)> {
    match stage {
        CommitStage::Decrease => {
            // a fresh label drops every detected partition at once
            if c.disk().is_some_and(|d| d.del_ptable) {
                return None;
            }
            if v.deleted() {
                return (!v.created()).then(|| (v.remove_text(), true));
            }
            let btrfs_remove = v.btrfs().is_some_and(|b| !b.devices_remove.is_empty());
            (v.needs_shrink() || btrfs_remove).then(|| (v.resize_text(true), true))
        }
        CommitStage::Increase => {
            if v.deleted() {
                return None;
            }
            if v.created() {
                return Some((v.create_text(), false));
            }
            let mut texts = Vec::new();
            let btrfs_add = v.btrfs().is_some_and(|b| !b.devices_add.is_empty());
            if v.needs_extend() || btrfs_add {
                texts.push(v.resize_text(false));
            }
            if v.needs_type_change() {
                texts.push(v.set_type_text());
            }
            (!texts.is_empty()).then(|| (texts.join(". "), false))
        }
        CommitStage::Format => {
            if v.deleted() {
                None
            } else if v.format {
                Some((v.format_text(), true))
            } else if v.needs_label() {
                Some((v.label_text(), false))
            } else {
                None
            }
        }
        CommitStage::Mount => {
            if v.needs_remount() {
                Some((v.mount_text(), false))
            } else if v.needs_fstab_update() {
                Some((v.fstab_text(), false))
            } else {
                None
            }
        }
        CommitStage::Subvolume => {
            let pending = !v.deleted() && v.btrfs().is_some_and(|b| b.pending_subvolumes());
            pending.then(|| (v.subvolume_texts().join(". "), false))
        }
    }
}

fn mount_depth(v: &Volume) -> usize {
    if v.is_mounted {
        v.orig_mount_point.split('/').filter(|p| !p.is_empty()).count() + 1
    } else {
        0
    }
}

fn stripes(v: &Volume) -> u32 {
    v.lv().map_or(1, |lv| lv.extents.stripes)
}

fn sort_volumes(stage: CommitStage, volumes: &mut [&Volume]) {
    match stage {
        CommitStage::Decrease => volumes.sort_by(|a, b| {
            b.is_mounted
                .cmp(&a.is_mounted)
                .then_with(|| mount_depth(b).cmp(&mount_depth(a)))
                .then_with(|| a.deleted().cmp(&b.deleted()))
                .then_with(|| b.num.cmp(&a.num))
                .then_with(|| b.device().cmp(a.device()))
        }),
        CommitStage::Mount => volumes.sort_by(|a, b| {
            a.is_swap()
                .cmp(&b.is_swap())
                .then_with(|| a.orig_mount_point.is_empty().cmp(&b.orig_mount_point.is_empty()))
                .then_with(|| a.mount_point.cmp(&b.mount_point))
        }),
        _ => volumes.sort_by(|a, b| {
            a.container
                .cmp(&b.container)
                .then_with(|| stripes(b).cmp(&stripes(a)))
                .then_with(|| a.num.cmp(&b.num))
                .then_with(|| a.device().cmp(b.device()))
        }),
    }
}

/// Ordered actions of one stage. `loops` selects the second pass over loop
/// containers.
pub fn plan_stage(graph: &DeviceGraph, stage: CommitStage, loops: bool) -> Vec<PlannedAction> {
    let in_pass = |c: &&Container| (c.kind() == ContainerKind::Loop) == loops;

    let mut containers: Vec<PlannedAction> = graph
        .containers()
        .filter(in_pass)
        .filter_map(|c| {
            let (text, destructive) = container_action(stage, c)?;
            Some(PlannedAction {
                stage,
                kind: c.kind(),
                target: Target::Container(c.id),
                device: c.device().to_string(),
                text,
                destructive,
                description: String::new(),
            })
        })
        .collect();
    if stage == CommitStage::Decrease {
        containers.reverse();
    }

    let mut volumes: Vec<&Volume> = graph
        .containers()
        .filter(in_pass)
        .flat_map(|c| c.volumes.iter())
        .collect();
    sort_volumes(stage, &mut volumes);
    let volumes = volumes.into_iter().filter_map(|v| {
        let c = graph.container(v.container)?;
        let (text, destructive) = volume_action(stage, c, v)?;
        Some(PlannedAction {
            stage,
            kind: c.kind(),
            target: Target::Volume(c.id, v.id),
            device: v.device().to_string(),
            text,
            destructive,
            description: v.description.clone(),
        })
    });

    let mut actions: Vec<PlannedAction>;
    if stage == CommitStage::Decrease {
        actions = volumes.collect();
        actions.extend(containers);
        actions.sort_by_key(|a| Reverse(a.kind));
    } else {
        actions = containers;
        actions.extend(volumes);
        actions.sort_by_key(|a| a.kind);
    }
    actions
}

/// What a commit of `graph` would do, in execution order.
pub fn preview(graph: &DeviceGraph) -> Vec<PlannedAction> {
    let mut graph = graph.clone();
    let mut actions = Vec::new();
    for loops in [false, true] {
        for stage in CommitStage::ALL {
            if stage == CommitStage::Increase {
                lvm::check_create_constraints(&mut graph);
            }
            let planned = plan_stage(&graph, stage, loops);
            if stage == CommitStage::Format {
                unmount_formatted(&mut graph, &planned);
            }
            actions.extend(planned);
        }
    }
    actions
}

/// Formatting unmounts a mounted volume, which the mount stage then mounts
/// again.
fn unmount_formatted(graph: &mut DeviceGraph, planned: &[PlannedAction]) {
    for action in planned {
        let Target::Volume(_, vid) = action.target else {
            continue;
        };
        if let Some(v) = graph.volume_mut(vid)
            && v.format
            && v.is_mounted
            && !v.orig_mount_point.is_empty()
        {
            v.is_mounted = false;
        }
    }
}

/// Apply every pending change. The first failure ends the commit; changes
/// already applied stay applied and their flags stay cleared.
pub(crate) fn run(graph: &mut DeviceGraph, ctx: &mut Ctx) -> Result<()> {
    for loops in [false, true] {
        for stage in CommitStage::ALL {
            if stage == CommitStage::Increase {
                lvm::check_create_constraints(graph);
            }
            let actions = plan_stage(graph, stage, loops);
            if actions.is_empty() {
                continue;
            }
            info!("commit stage {stage}: {} action(s)", actions.len());
            for action in actions {
                info!("{}", action.text);
                execute(graph, ctx, &action).inspect_err(|e| {
                    warn!("{} failed: {e}", action.text);
                })?;
            }
        }
    }
    for container in graph.containers() {
        comparator::check_consistency(container);
    }
    Ok(())
}

fn execute(graph: &mut DeviceGraph, ctx: &mut Ctx, action: &PlannedAction) -> Result<()> {
    match action.target {
        Target::Container(cid) => {
            if graph.container(cid).is_none() {
                debug!("container of {} is gone, skipping", action.device);
                return Ok(());
            }
            match (action.stage, action.kind) {
                (CommitStage::Decrease, ContainerKind::Disk) => disk::commit_label(graph, ctx, cid),
                (CommitStage::Decrease, ContainerKind::Lvm) => lvm::commit_decrease(graph, ctx, cid),
                (CommitStage::Increase, ContainerKind::Lvm) => lvm::commit_increase(graph, ctx, cid),
                _ => Ok(()),
            }
        }
        Target::Volume(cid, vid) => {
            let Some(kind) = graph.container(cid).map(Container::kind) else {
                debug!("container of {} is gone, skipping", action.device);
                return Ok(());
            };
            if graph.volume(vid).is_none() {
                debug!("{} is gone, skipping", action.device);
                return Ok(());
            }
            match action.stage {
                CommitStage::Decrease => volume_decrease(graph, ctx, kind, cid, vid),
                CommitStage::Increase => volume_increase(graph, ctx, kind, cid, vid),
                CommitStage::Format => volume_format(graph, ctx, vid),
                CommitStage::Mount => volume_mount(graph, ctx, vid),
                CommitStage::Subvolume => btrfs::commit_subvolumes(graph, ctx, vid),
            }
        }
    }
}

fn snapshot(graph: &DeviceGraph, vid: VolumeId) -> Result<Volume> {
    graph
        .volume(vid)
        .cloned()
        .ok_or_else(|| Error::internal(format!("volume {vid:?} vanished during commit")))
}

fn volume_decrease(
    graph: &mut DeviceGraph,
    ctx: &mut Ctx,
    kind: ContainerKind,
    cid: ContainerId,
    vid: VolumeId,
) -> Result<()> {
    let vol = snapshot(graph, vid)?;
    if vol.deleted() {
        release_mount(graph, ctx, vid)?;
        match kind {
            ContainerKind::Disk => disk::commit_remove(graph, ctx, cid, vid)?,
            ContainerKind::Lvm => lvm::commit_remove(graph, ctx, vid)?,
            ContainerKind::Md => md::commit_remove(graph, ctx, vid)?,
            ContainerKind::Loop => loop_dev::commit_remove(graph, ctx, vid)?,
            ContainerKind::Dm => dm::commit_remove(graph, ctx, vid)?,
            ContainerKind::Btrfs => btrfs::commit_remove(graph, ctx, vid)?,
        }
        graph.remove_volume(vid);
        return Ok(());
    }
    if vol.needs_shrink() {
        resize(graph, ctx, kind, cid, vid)?;
    }
    if vol.btrfs().is_some_and(|b| !b.devices_remove.is_empty()) {
        btrfs::commit_shrink(graph, ctx, vid)?;
    }
    Ok(())
}

fn volume_increase(
    graph: &mut DeviceGraph,
    ctx: &mut Ctx,
    kind: ContainerKind,
    cid: ContainerId,
    vid: VolumeId,
) -> Result<()> {
    let vol = snapshot(graph, vid)?;
    if vol.created() {
        match kind {
            ContainerKind::Disk => disk::commit_create(graph, ctx, cid, vid)?,
            ContainerKind::Lvm => lvm::commit_create(graph, ctx, vid)?,
            ContainerKind::Md => md::commit_create(graph, ctx, vid)?,
            ContainerKind::Loop => loop_dev::commit_create(graph, ctx, vid)?,
            ContainerKind::Dm | ContainerKind::Btrfs => {
                return Err(InternalError::InvalidCall(format!(
                    "{} cannot be created here",
                    vol.device()
                ))
                .into());
            }
        }
        if let Some(v) = graph.volume_mut(vid) {
            v.dev.created = false;
            v.orig_size_k = v.dev.size_k;
            v.orig_num = v.num;
            if let Some(lv) = v.lv_mut() {
                lv.orig_le = lv.extents.le;
            }
        }
        return Ok(());
    }
    if vol.needs_extend() {
        resize(graph, ctx, kind, cid, vid)?;
    }
    if vol.needs_type_change() {
        disk::commit_set_type(graph, ctx, cid, vid)?;
    }
    if vol.btrfs().is_some_and(|b| !b.devices_add.is_empty()) {
        btrfs::commit_extend(graph, ctx, vid)?;
    }
    Ok(())
}

/// Resize the block device and the filesystem on it, filesystem first
/// when shrinking.
fn resize(
    graph: &mut DeviceGraph,
    ctx: &mut Ctx,
    kind: ContainerKind,
    cid: ContainerId,
    vid: VolumeId,
) -> Result<()> {
    let vol = snapshot(graph, vid)?;
    let shrink = vol.needs_shrink();
    if shrink {
        resize_fs(ctx, &vol)?;
    }
    match kind {
        ContainerKind::Disk => disk::commit_resize(graph, ctx, cid, vid)?,
        ContainerKind::Lvm => lvm::commit_resize(graph, ctx, vid)?,
        _ => return Err(VolumeError::ResizeUnsupportedByContainer.into()),
    }
    if !shrink {
        resize_fs(ctx, &vol)?;
    }
    if let Some(v) = graph.volume_mut(vid) {
        v.orig_size_k = v.dev.size_k;
    }
    Ok(())
}

fn resize_fs(ctx: &mut Ctx, vol: &Volume) -> Result<()> {
    if vol.resize_needs_mount() {
        with_mount(ctx, vol, VolumeError::MountFailed, |ctx, mount_point| {
            if let Some(command) = vol.resize_fs_command(Some(mount_point))? {
                ctx.run(command, VolumeError::ResizeFailed)?;
            }
            Ok(())
        })
    } else {
        if let Some(command) = vol.resize_fs_command(None)? {
            ctx.run(command, VolumeError::ResizeFailed)?;
        }
        Ok(())
    }
}

/// Run `f` with `vol` mounted, mounting it below the temp dir when it is
/// not mounted already.
pub(crate) fn with_mount<T>(
    ctx: &mut Ctx,
    vol: &Volume,
    mount_error: impl Into<Error>,
    f: impl FnOnce(&mut Ctx, &str) -> Result<T>,
) -> Result<T> {
    if vol.is_mounted && !vol.orig_mount_point.is_empty() {
        let mount_point = ctx.config.prefixed(&vol.orig_mount_point);
        return f(ctx, &mount_point);
    }

    let dir = ctx.config.tmp_dir.join(format!("tmp-mp-{}", vol.dev.name.replace('/', "_")));
    let dir_text = dir.display().to_string();
    if ctx.executes() {
        std::fs::create_dir_all(&dir).map_err(|e| {
            Error::internal(format!("cannot create {}: {e}", dir.display()))
        })?;
    }
    let mut mount = CommandLine::new("mount");
    if vol.fs.is_formatted() {
        mount = mount.args(["-t", vol.fs.as_str()]);
    }
    ctx.run(mount.args([vol.device(), dir_text.as_str()]), mount_error)?;

    let result = f(ctx, &dir_text);
    let umount = ctx.run(CommandLine::new("umount").arg(dir_text.as_str()), VolumeError::UmountFailed);
    if ctx.executes() {
        remove_dir(&dir);
    }
    let value = result?;
    umount?;
    Ok(value)
}

fn remove_dir(dir: &Path) {
    if let Err(error) = std::fs::remove_dir(dir) {
        debug!("leaving {}: {error}", dir.display());
    }
}

/// Unmount a volume about to be deleted and drop its fstab entry.
pub(crate) fn release_mount(graph: &mut DeviceGraph, ctx: &mut Ctx, vid: VolumeId) -> Result<()> {
    let vol = snapshot(graph, vid)?;
    if vol.is_mounted && !vol.orig_mount_point.is_empty() {
        let target = ctx.config.prefixed(&vol.orig_mount_point);
        ctx.run(vol.umount_command(&target), VolumeError::UmountFailed)?;
        if let Some(v) = graph.volume_mut(vid) {
            v.is_mounted = false;
        }
    }
    if !vol.orig_mount_point.is_empty() && !vol.ignore_fstab {
        let mount = if vol.is_swap() { "swap" } else { vol.orig_mount_point.as_str() };
        if ctx.mount_table.remove(mount) {
            ctx.mount_table
                .flush()
                .map_err(|e| FstabError::FlushFailed(e.to_string()))?;
        } else {
            debug!("no fstab entry for {mount}");
        }
    }
    Ok(())
}

fn volume_format(graph: &mut DeviceGraph, ctx: &mut Ctx, vid: VolumeId) -> Result<()> {
    let vol = snapshot(graph, vid)?;
    if vol.format {
        if vol.is_extended() {
            return Err(VolumeError::FormatExtendedUnsupported.into());
        }
        if vol.is_mounted && !vol.orig_mount_point.is_empty() {
            let target = ctx.config.prefixed(&vol.orig_mount_point);
            ctx.run(vol.umount_command(&target), VolumeError::UmountFailed)?;
            if let Some(v) = graph.volume_mut(vid) {
                v.is_mounted = false;
            }
        }
        ctx.run(vol.mkfs_command()?, VolumeError::FormatFailed)?;
        if let Some(command) = vol.tune_command() {
            ctx.run(command, VolumeError::Tune2fsFailed)?;
        }
        let blkid = CommandLine::new("blkid").args(["-s", "UUID", "-o", "value", vol.device()]);
        let uuid = ctx
            .runner
            .run(&blkid)
            .ok()
            .filter(CommandOutput::ok)
            .and_then(|o| o.stdout.into_iter().find(|l| !l.trim().is_empty()));
        if let Some(v) = graph.volume_mut(vid) {
            v.format = false;
            v.detected_fs = v.fs;
            v.orig_label.clear();
            if let Some(uuid) = uuid {
                v.uuid = uuid.trim().to_string();
            }
        }
    }

    let vol = snapshot(graph, vid)?;
    if vol.needs_label() {
        ctx.run(vol.label_command()?, VolumeError::MklabelFailed)?;
        if let Some(v) = graph.volume_mut(vid) {
            v.orig_label = v.label.clone();
        }
    }
    Ok(())
}

fn volume_mount(graph: &mut DeviceGraph, ctx: &mut Ctx, vid: VolumeId) -> Result<()> {
    let vol = snapshot(graph, vid)?;
    let update_fstab = vol.needs_fstab_update();
    if vol.needs_remount() {
        if vol.is_extended() {
            return Err(VolumeError::MountExtendedUnsupported.into());
        }
        if vol.is_mounted && !vol.orig_mount_point.is_empty() {
            let target = ctx.config.prefixed(&vol.orig_mount_point);
            ctx.run(vol.umount_command(&target), VolumeError::UmountFailed)?;
            if let Some(v) = graph.volume_mut(vid) {
                v.is_mounted = false;
            }
        }
        if !vol.mount_point.is_empty() && !vol.has_option("noauto") {
            let target = ctx.config.prefixed(&vol.mount_point);
            if !vol.is_swap() && ctx.executes() {
                std::fs::create_dir_all(&target)
                    .map_err(|e| Error::internal(format!("cannot create {target}: {e}")))?;
            }
            ctx.run(vol.mount_command(&target), VolumeError::MountFailed)?;
            if let Some(v) = graph.volume_mut(vid) {
                v.is_mounted = true;
            }
        }
        if let Some(v) = graph.volume_mut(vid) {
            v.orig_mount_point = v.mount_point.clone();
        }
    }

    if update_fstab {
        fstab_update(ctx, &vol)?;
        if let Some(v) = graph.volume_mut(vid) {
            v.fstab_update_done();
        }
    }
    if let Some(v) = graph.volume_mut(vid) {
        v.orig_mount_point = v.mount_point.clone();
    }
    Ok(())
}

fn fstab_update(ctx: &mut Ctx, vol: &Volume) -> Result<()> {
    let old = vol.orig_mount_point.as_str();
    let old_key = if old == "swap" || (vol.is_swap() && !old.is_empty()) { "swap" } else { old };
    if vol.mount_point.is_empty() {
        if !ctx.mount_table.remove(old_key) {
            warn!("no fstab entry for {old_key} to remove");
        }
    } else {
        let previous = (!old_key.is_empty()).then_some(old_key);
        ctx.mount_table.upsert(previous, vol.fstab_entry());
    }
    info!("{}", vol.fstab_text());
    ctx.mount_table
        .flush()
        .map_err(|e| FstabError::FlushFailed(e.to_string()).into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::{ContainerData, DiskData};
    use crate::device::Device;
    use crate::storage::Storage;
    use crate::volume::{DmData, VolumeData};
    use storage_contracts::{FstabEntry, ToolError};
    use storage_sys::{MemoryFstab, MemoryMdadm, RecordingRunner};
    use storage_types::{DiskLabel, FsType};

    const PE: u64 = 4096;

    /// Accepts edits but cannot write them out.
    struct UnwritableFstab;

    impl MountTable for UnwritableFstab {
        fn entries(&self) -> Vec<FstabEntry> {
            Vec::new()
        }

        fn upsert(&mut self, _old_mount: Option<&str>, _entry: FstabEntry) {}

        fn remove(&mut self, _mount: &str) -> bool {
            true
        }

        fn flush(&mut self) -> std::result::Result<(), ToolError> {
            Err(ToolError::io("read-only file system"))
        }
    }

    fn open(graph: DeviceGraph, mount_table: Box<dyn MountTable>) -> (Storage, RecordingRunner) {
        let runner = RecordingRunner::new();
        let storage = Storage::new(
            graph,
            EngineConfig::default(),
            Box::new(runner.clone()),
            mount_table,
            Box::new(MemoryMdadm::new()),
        );
        (storage, runner)
    }

    fn dm_volume(graph: &mut DeviceGraph, name: &str) -> VolumeId {
        let pool = graph.ensure_pool(ContainerKind::Dm);
        let id = graph.new_volume_id();
        graph.add_volume(Volume::new(
            id,
            pool,
            Device::new(name, format!("/dev/mapper/{name}"), 1024),
            0,
            VolumeData::Dm(DmData {
                target: "linear".to_string(),
                devices: Vec::new(),
            }),
        ));
        id
    }

    #[test]
    fn mount_stage_puts_swap_last() {
        let mut graph = DeviceGraph::new();
        for (name, mp) in [("swap0", "swap"), ("home", "/home"), ("root", "/")] {
            let id = dm_volume(&mut graph, name);
            if let Some(v) = graph.volume_mut(id) {
                v.mount_point = mp.to_string();
                v.fs = if mp == "swap" { FsType::Swap } else { FsType::Ext4 };
            }
        }
        let order: Vec<String> = plan_stage(&graph, CommitStage::Mount, false)
            .into_iter()
            .map(|a| a.device)
            .collect();
        assert_eq!(
            order,
            vec!["/dev/mapper/root", "/dev/mapper/home", "/dev/mapper/swap0"]
        );
    }

    #[test]
    fn mount_stage_moves_existing_mounts_before_new_ones() {
        let mut graph = DeviceGraph::new();
        for (name, orig, mp) in [
            ("swap0", "", "swap"),
            ("fresh", "", "/a"),
            ("moved", "/old", "/z"),
        ] {
            let id = dm_volume(&mut graph, name);
            if let Some(v) = graph.volume_mut(id) {
                v.orig_mount_point = orig.to_string();
                v.is_mounted = !orig.is_empty();
                v.mount_point = mp.to_string();
                v.fs = if mp == "swap" { FsType::Swap } else { FsType::Ext4 };
            }
        }
        let order: Vec<String> = plan_stage(&graph, CommitStage::Mount, false)
            .into_iter()
            .map(|a| a.device)
            .collect();
        assert_eq!(
            order,
            vec!["/dev/mapper/moved", "/dev/mapper/fresh", "/dev/mapper/swap0"]
        );
    }

    #[test]
    fn increase_stage_creates_wider_stripes_first() {
        let mut graph = DeviceGraph::new();
        for name in ["sdb", "sdc"] {
            graph.add_container(
                Device::new(name, format!("/dev/{name}"), 100 * PE + 500),
                ContainerData::Disk(DiskData {
                    label: DiskLabel::Gpt,
                    model: None,
                    del_ptable: false,
                }),
            );
        }
        let (mut storage, _) = open(graph, Box::new(MemoryFstab::new()));
        storage
            .create_volume_group("vg", PE, &["/dev/sdb".to_string(), "/dev/sdc".to_string()])
            .expect("vg");
        storage
            .create_logical_volume("vg", "a", 10 * PE, 1, 0)
            .expect("linear");
        storage
            .create_logical_volume("vg", "b", 10 * PE, 2, 64)
            .expect("striped");

        let order: Vec<String> = plan_stage(storage.graph(), CommitStage::Increase, false)
            .into_iter()
            .filter(|a| matches!(a.target, Target::Volume(..)))
            .map(|a| a.device)
            .collect();
        assert_eq!(order, vec!["/dev/vg/b", "/dev/vg/a"]);
    }

    #[test]
    fn reformatting_a_mounted_volume_previews_the_remount() {
        let mut graph = DeviceGraph::new();
        let id = dm_volume(&mut graph, "data");
        if let Some(v) = graph.volume_mut(id) {
            v.fs = FsType::Ext4;
            v.detected_fs = FsType::Ext4;
            v.orig_mount_point = "/srv".to_string();
            v.mount_point = "/srv".to_string();
            v.is_mounted = true;
        }
        let (mut storage, runner) = open(graph, Box::new(MemoryFstab::new()));
        storage
            .change_format("/dev/mapper/data", true, FsType::Ext4)
            .expect("format");

        let stages: Vec<CommitStage> = storage
            .get_commit_actions()
            .iter()
            .filter(|a| a.device == "/dev/mapper/data")
            .map(|a| a.stage)
            .collect();
        assert_eq!(stages, vec![CommitStage::Format, CommitStage::Mount]);

        storage.commit().expect("commit");
        let rendered = runner.rendered();
        assert!(rendered.iter().any(|c| c == "umount /srv"), "{rendered:?}");
        assert!(
            rendered.iter().any(|c| c == "mount -t ext4 /dev/mapper/data /srv"),
            "{rendered:?}"
        );
        assert!(storage.find_volume("/dev/mapper/data").is_some_and(|v| v.is_mounted));
        assert!(storage.get_commit_actions().is_empty());
    }

    #[test]
    fn failed_fstab_write_keeps_the_new_mount_target() {
        let mut graph = DeviceGraph::new();
        let id = dm_volume(&mut graph, "data");
        if let Some(v) = graph.volume_mut(id) {
            v.fs = FsType::Ext4;
            v.detected_fs = FsType::Ext4;
            v.orig_mount_point = "/old".to_string();
            v.mount_point = "/new".to_string();
            v.is_mounted = true;
        }
        let (mut storage, runner) = open(graph, Box::new(UnwritableFstab));

        let result = storage.commit();
        assert_eq!(result.map_err(|e| e.code()), Err(-5005));
        assert!(
            runner
                .rendered()
                .iter()
                .any(|c| c == "mount -t ext4 /dev/mapper/data /new")
        );
        let vol = storage.find_volume("/dev/mapper/data").expect("data");
        assert!(vol.is_mounted);
        assert_eq!(vol.orig_mount_point, "/new");
        assert!(!vol.needs_remount());
    }

    #[test]
    fn deeper_mounts_are_released_first() {
        let mut graph = DeviceGraph::new();
        for (name, mp) in [("a", "/srv"), ("b", "/srv/data/x"), ("c", "/srv/data")] {
            let id = dm_volume(&mut graph, name);
            if let Some(v) = graph.volume_mut(id) {
                v.orig_mount_point = mp.to_string();
                v.mount_point = mp.to_string();
                v.is_mounted = true;
                v.dev.deleted = true;
            }
        }
        let order: Vec<String> = plan_stage(&graph, CommitStage::Decrease, false)
            .into_iter()
            .map(|a| a.device)
            .collect();
        assert_eq!(order, vec!["/dev/mapper/b", "/dev/mapper/c", "/dev/mapper/a"]);
    }

    #[test]
    fn description_is_appended() {
        let action = PlannedAction {
            stage: CommitStage::Format,
            kind: ContainerKind::Disk,
            target: Target::Container(ContainerId(1)),
            device: "/dev/sda1".to_string(),
            text: "Format partition /dev/sda1".to_string(),
            destructive: true,
            description: "scratch space".to_string(),
        };
        assert_eq!(action.full_text(), "Format partition /dev/sda1. scratch space");
        assert!(action.info().container);
    }
}
