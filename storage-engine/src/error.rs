// SPDX-License-Identifier: GPL-3.0-only

//! Status codes of the planner.
//!
//! Every subsystem has its own enum and its own code range. `Error::code`
//! gives the signed status a caller sees; `status` folds a whole result into
//! `0` or that code.

use storage_contracts::{CommandLine, CommandOutput, ToolError};
use storage_sys::SysError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DiskError {
    #[error("region overlaps an existing partition")]
    PartitionOverlapsExisting,
    #[error("region exceeds the disk")]
    PartitionExceedsDisk,
    #[error("an extended partition already exists")]
    ExtendedOnlyOnce,
    #[error("the disk label does not allow an extended partition")]
    ExtendedImpossible,
    #[error("no free partition number")]
    NoFreeNumber,
    #[error("invalid partition type")]
    InvalidType,
    #[error("creating the partition failed")]
    CreateFailed,
    #[error("partition not found")]
    PartitionNotFound,
    #[error("logical partition without extended partition")]
    LogicalNoExtended,
    #[error("logical partition outside the extended partition")]
    LogicalOutsideExtended,
    #[error("setting the partition type failed")]
    SetTypeFailed,
    #[error("writing the disk label failed")]
    SetLabelFailed,
    #[error("removing the partition failed")]
    RemoveFailed,
    #[error("invalid disk label")]
    InvalidLabel,
    #[error("partition of zero size")]
    ZeroSize,
    #[error("disk is read-only")]
    ChangeReadonly,
    #[error("resizing the partition failed")]
    ResizeFailed,
    #[error("no space to grow the partition")]
    ResizeNoSpace,
    #[error("no free region of the requested kind")]
    NoSpace,
    #[error("partition is in use")]
    RemoveUsedBy,
}

impl DiskError {
    pub fn code(&self) -> i32 {
        match self {
            Self::PartitionOverlapsExisting => -1000,
            Self::PartitionExceedsDisk => -1001,
            Self::ExtendedOnlyOnce => -1002,
            Self::ExtendedImpossible => -1003,
            Self::NoFreeNumber => -1004,
            Self::InvalidType => -1006,
            Self::CreateFailed => -1007,
            Self::PartitionNotFound => -1008,
            Self::LogicalNoExtended => -1009,
            Self::LogicalOutsideExtended => -1010,
            Self::SetTypeFailed => -1012,
            Self::SetLabelFailed => -1013,
            Self::RemoveFailed => -1014,
            Self::InvalidLabel => -1017,
            Self::ZeroSize => -1018,
            Self::ChangeReadonly => -1019,
            Self::ResizeFailed => -1021,
            Self::ResizeNoSpace => -1022,
            Self::NoSpace => -1026,
            Self::RemoveUsedBy => -1027,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("disk {0} not found")]
    DiskNotFound(String),
    #[error("volume {0} not found")]
    VolumeNotFound(String),
    #[error("storage is read-only")]
    ChangeReadonly,
    #[error("disk {0} is in use")]
    DiskUsedBy(String),
    #[error("volume group {0} already exists")]
    VgExists(String),
    #[error("volume group {0} not found")]
    VgNotFound(String),
    #[error("container {0} not found")]
    ContainerNotFound(String),
    #[error("invalid volume group name '{0}'")]
    VgInvalidName(String),
    #[error("volume {0} is in use")]
    RemoveUsedVolume(String),
    #[error("raid {0} not found")]
    MdNotFound(String),
    #[error("loop device {0} not found")]
    LoopNotFound(String),
    #[error("backup state '{0}' not found")]
    BackupStateNotFound(String),
    #[error("{path} is locked by process {pid}")]
    Locked { path: String, pid: i32 },
    #[error("btrfs filesystem {0} not found")]
    BtrfsNotFound(String),
    #[error("device-mapper table {0} not found")]
    DmNotFound(String),
}

impl StorageError {
    pub fn code(&self) -> i32 {
        match self {
            Self::DiskNotFound(_) => -2000,
            Self::VolumeNotFound(_) => -2001,
            Self::ChangeReadonly => -2004,
            Self::DiskUsedBy(_) => -2005,
            Self::VgExists(_) => -2006,
            Self::VgNotFound(_) => -2007,
            Self::ContainerNotFound(_) => -2009,
            Self::VgInvalidName(_) => -2010,
            Self::RemoveUsedVolume(_) => -2011,
            Self::MdNotFound(_) => -2015,
            Self::LoopNotFound(_) => -2017,
            Self::BackupStateNotFound(_) => -2024,
            Self::Locked { .. } => -2025,
            Self::BtrfsNotFound(_) => -2026,
            Self::DmNotFound(_) => -2027,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VolumeError {
    #[error("unmount failed")]
    UmountFailed,
    #[error("mount failed")]
    MountFailed,
    #[error("no mkfs known for this filesystem")]
    FormatUnknownFs,
    #[error("mkfs failed")]
    FormatFailed,
    #[error("tune2fs failed")]
    Tune2fsFailed,
    #[error("cannot write a label on this filesystem")]
    MklabelFsUnable,
    #[error("writing the label failed")]
    MklabelFailed,
    #[error("losetup failed")]
    LosetupFailed,
    #[error("an extended partition cannot be formatted")]
    FormatExtendedUnsupported,
    #[error("an extended partition cannot be mounted")]
    MountExtendedUnsupported,
    #[error("invalid mount point '{0}'")]
    MountPointInvalid(String),
    #[error("mount-by not supported by the filesystem")]
    MountByUnsupportedByFs,
    #[error("filesystem does not support labels")]
    LabelNotSupported,
    #[error("label too long")]
    LabelTooLong,
    #[error("filesystem cannot be resized this way")]
    ResizeUnsupportedByFs,
    #[error("container cannot resize this volume")]
    ResizeUnsupportedByContainer,
    #[error("filesystem resize failed")]
    ResizeFailed,
    #[error("volume is in use")]
    AlreadyInUse,
    #[error("losetup -d failed")]
    LoUnsetupFailed,
}

impl VolumeError {
    pub fn code(&self) -> i32 {
        match self {
            Self::UmountFailed => -3002,
            Self::MountFailed => -3003,
            Self::FormatUnknownFs => -3005,
            Self::FormatFailed => -3008,
            Self::Tune2fsFailed => -3009,
            Self::MklabelFsUnable => -3010,
            Self::MklabelFailed => -3011,
            Self::LosetupFailed => -3013,
            Self::FormatExtendedUnsupported => -3017,
            Self::MountExtendedUnsupported => -3018,
            Self::MountPointInvalid(_) => -3019,
            Self::MountByUnsupportedByFs => -3021,
            Self::LabelNotSupported => -3022,
            Self::LabelTooLong => -3023,
            Self::ResizeUnsupportedByFs => -3025,
            Self::ResizeUnsupportedByContainer => -3026,
            Self::ResizeFailed => -3027,
            Self::AlreadyInUse => -3028,
            Self::LoUnsetupFailed => -3029,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LvmError {
    #[error("pvcreate failed")]
    CreatePvFailed,
    #[error("{0} is already a physical volume of this group")]
    PvAlreadyContained(String),
    #[error("unknown physical volume device {0}")]
    PvDeviceUnknown(String),
    #[error("device {0} is in use")]
    PvDeviceUsed(String),
    #[error("volume group has no physical volume")]
    VgHasNonePv,
    #[error("invalid logical volume name '{0}'")]
    LvInvalidName(String),
    #[error("logical volume {0} already exists")]
    LvDuplicateName(String),
    #[error("not enough free extents")]
    LvNoSpace,
    #[error("unknown logical volume {0}")]
    LvUnknownName(String),
    #[error("vgcreate failed")]
    VgCreateFailed,
    #[error("vgextend failed")]
    VgExtendFailed,
    #[error("vgreduce failed")]
    VgReduceFailed,
    #[error("vgremove failed")]
    VgRemoveFailed,
    #[error("lvcreate failed")]
    LvCreateFailed,
    #[error("lvremove failed")]
    LvRemoveFailed,
    #[error("lvresize failed")]
    LvResizeFailed,
    #[error("{0} is not a physical volume of this group")]
    PvRemoveNotFound(String),
    #[error("volume group is read-only")]
    ChangeReadonly,
    #[error("logical volume is in use")]
    LvRemoveUsedBy,
    #[error("logical volume already exists on disk")]
    LvAlreadyOnDisk,
    #[error("stripe size given without stripes")]
    LvNoStripeSize,
    #[error("no devices given")]
    ListEmpty,
}

impl LvmError {
    pub fn code(&self) -> i32 {
        match self {
            Self::CreatePvFailed => -4000,
            Self::PvAlreadyContained(_) => -4001,
            Self::PvDeviceUnknown(_) => -4002,
            Self::PvDeviceUsed(_) => -4003,
            Self::VgHasNonePv => -4004,
            Self::LvInvalidName(_) => -4005,
            Self::LvDuplicateName(_) => -4006,
            Self::LvNoSpace => -4007,
            Self::LvUnknownName(_) => -4008,
            Self::VgCreateFailed => -4010,
            Self::VgExtendFailed => -4011,
            Self::VgReduceFailed => -4012,
            Self::VgRemoveFailed => -4013,
            Self::LvCreateFailed => -4014,
            Self::LvRemoveFailed => -4015,
            Self::LvResizeFailed => -4016,
            Self::PvRemoveNotFound(_) => -4018,
            Self::ChangeReadonly => -4022,
            Self::LvRemoveUsedBy => -4025,
            Self::LvAlreadyOnDisk => -4026,
            Self::LvNoStripeSize => -4027,
            Self::ListEmpty => -4028,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FstabError {
    #[error("no fstab entry for {0}")]
    EntryNotFound(String),
    #[error("no fstab entry to remove for {0}")]
    RemoveEntryNotFound(String),
    #[error("no fstab entry to update for {0}")]
    UpdateEntryNotFound(String),
    #[error("fstab entry for {0} already exists")]
    AddEntryFound(String),
    #[error("writing fstab failed: {0}")]
    FlushFailed(String),
}

impl FstabError {
    pub fn code(&self) -> i32 {
        match self {
            Self::EntryNotFound(_) => -5000,
            Self::RemoveEntryNotFound(_) => -5002,
            Self::UpdateEntryNotFound(_) => -5003,
            Self::AddEntryFound(_) => -5004,
            Self::FlushFailed(_) => -5005,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MdError {
    #[error("raid is read-only")]
    ChangeReadonly,
    #[error("raid number {0} already in use")]
    DuplicateNumber(u32),
    #[error("too few devices for the raid level")]
    TooFewDevices,
    #[error("unknown raid member {0}")]
    DeviceUnknown(String),
    #[error("raid member {0} is in use")]
    DeviceUsed(String),
    #[error("stopping the raid failed")]
    RemoveFailed,
    #[error("mdadm --create failed")]
    CreateFailed,
    #[error("unknown raid number {0}")]
    UnknownNumber(u32),
    #[error("raid is in use")]
    RemoveUsedBy,
    #[error("raid number {0} too large")]
    NumberTooLarge(u32),
    #[error("an existing raid cannot be resized")]
    NoResizeOnDisk,
    #[error("{0} is already a member")]
    AddDuplicate(String),
    #[error("{0} is not a member")]
    RemoveNonexistent(String),
    #[error("an existing raid cannot be changed")]
    NoChangeOnDisk,
    #[error("cannot create a raid of unknown level")]
    NoCreateUnknown,
}

impl MdError {
    pub fn code(&self) -> i32 {
        match self {
            Self::ChangeReadonly => -6000,
            Self::DuplicateNumber(_) => -6001,
            Self::TooFewDevices => -6002,
            Self::DeviceUnknown(_) => -6003,
            Self::DeviceUsed(_) => -6004,
            Self::RemoveFailed => -6006,
            Self::CreateFailed => -6008,
            Self::UnknownNumber(_) => -6009,
            Self::RemoveUsedBy => -6010,
            Self::NumberTooLarge(_) => -6011,
            Self::NoResizeOnDisk => -6014,
            Self::AddDuplicate(_) => -6015,
            Self::RemoveNonexistent(_) => -6016,
            Self::NoChangeOnDisk => -6017,
            Self::NoCreateUnknown => -6018,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LoopError {
    #[error("loop devices are read-only")]
    ChangeReadonly,
    #[error("file {0} already has a loop device")]
    DuplicateFile(String),
    #[error("no loop device for {0}")]
    UnknownFile(String),
    #[error("loop device is in use")]
    RemoveUsedBy,
    #[error("creating the backing file failed")]
    FileCreateFailed,
    #[error("removing the backing file failed")]
    RemoveFileFailed,
    #[error("an existing loop device cannot be modified")]
    ModifyExisting,
}

impl LoopError {
    pub fn code(&self) -> i32 {
        match self {
            Self::ChangeReadonly => -7000,
            Self::DuplicateFile(_) => -7001,
            Self::UnknownFile(_) => -7002,
            Self::RemoveUsedBy => -7003,
            Self::FileCreateFailed => -7004,
            Self::RemoveFileFailed => -7006,
            Self::ModifyExisting => -7010,
        }
    }
}

/// Extent allocator failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PeError {
    #[error("extent size {0} KiB is not a power of two")]
    PeSizeInvalid(u64),
    #[error("physical volume {0} not found")]
    PvNotFound(String),
    #[error("physical volume {0} holds extents of existing volumes")]
    RemovePvInUse(String),
    #[error("volumes on {0} do not fit on the remaining physical volumes")]
    RemovePvSizeNeeded(String),
    #[error("not enough free extents for the requested stripes")]
    NoSpaceStriped,
    #[error("not enough free extents")]
    NoSpaceSingle,
    #[error("extent map references unknown device {0}")]
    PeDevNotFound(String),
}

impl PeError {
    pub fn code(&self) -> i32 {
        match self {
            Self::PeSizeInvalid(_) => -9000,
            Self::PvNotFound(_) => -9001,
            Self::RemovePvInUse(_) => -9002,
            Self::RemovePvSizeNeeded(_) => -9003,
            Self::NoSpaceStriped => -9004,
            Self::NoSpaceSingle => -9005,
            Self::PeDevNotFound(_) => -9006,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DmError {
    #[error("device-mapper tables are read-only")]
    ChangeReadonly,
    #[error("unknown device-mapper table {0}")]
    UnknownTable(String),
    #[error("device-mapper table is in use")]
    RemoveUsedBy,
    #[error("dmsetup remove failed")]
    RemoveFailed,
}

impl DmError {
    pub fn code(&self) -> i32 {
        match self {
            Self::ChangeReadonly => -10000,
            Self::UnknownTable(_) => -10001,
            Self::RemoveUsedBy => -10002,
            Self::RemoveFailed => -10005,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BtrfsError {
    #[error("temporary mount failed")]
    CannotTmpMount,
    #[error("temporary unmount failed")]
    CannotTmpUmount,
    #[error("deleting the subvolume failed")]
    DeleteSubvolFailed,
    #[error("creating the subvolume failed")]
    CreateSubvolFailed,
    #[error("subvolume {0} already exists")]
    SubvolExists(String),
    #[error("subvolume {0} does not exist")]
    SubvolNonExists(String),
    #[error("no devices given")]
    ListEmpty,
    #[error("unknown device {0}")]
    DeviceUnknown(String),
    #[error("device {0} is in use")]
    DeviceUsed(String),
    #[error("btrfs device add failed")]
    ExtendFailed,
    #[error("btrfs device delete failed")]
    ShrinkFailed,
    #[error("{0} is not a member")]
    NotMember(String),
    #[error("a filesystem cannot lose all of its devices")]
    LastDevice,
    #[error("btrfs filesystems are read-only")]
    ChangeReadonly,
    #[error("wiping a member failed")]
    RemoveFailed,
}

impl BtrfsError {
    pub fn code(&self) -> i32 {
        match self {
            Self::CannotTmpMount => -11000,
            Self::CannotTmpUmount => -11001,
            Self::DeleteSubvolFailed => -11002,
            Self::CreateSubvolFailed => -11003,
            Self::SubvolExists(_) => -11004,
            Self::SubvolNonExists(_) => -11005,
            Self::ListEmpty => -11006,
            Self::DeviceUnknown(_) => -11007,
            Self::DeviceUsed(_) => -11008,
            Self::ExtendFailed => -11009,
            Self::ShrinkFailed => -11010,
            Self::NotMember(_) => -11011,
            Self::LastDevice => -11012,
            Self::ChangeReadonly => -11013,
            Self::RemoveFailed => -11014,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InternalError {
    #[error("internal error: {0}")]
    Internal(String),
    #[error("invalid call: {0}")]
    InvalidCall(String),
    #[error("collaborator failed: {0}")]
    Tool(String),
    #[error("configuration error: {0}")]
    Config(String),
}

impl InternalError {
    pub fn code(&self) -> i32 {
        match self {
            Self::Internal(_) => -99000,
            Self::InvalidCall(_) => -99001,
            Self::Tool(_) => -99002,
            Self::Config(_) => -99003,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error(transparent)]
    Disk(#[from] DiskError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Volume(#[from] VolumeError),
    #[error(transparent)]
    Lvm(#[from] LvmError),
    #[error(transparent)]
    Fstab(#[from] FstabError),
    #[error(transparent)]
    Md(#[from] MdError),
    #[error(transparent)]
    Loop(#[from] LoopError),
    #[error(transparent)]
    Pe(#[from] PeError),
    #[error(transparent)]
    Dm(#[from] DmError),
    #[error(transparent)]
    Btrfs(#[from] BtrfsError),
    #[error(transparent)]
    Internal(#[from] InternalError),

    /// A tool exited non-zero; `error` carries the subsystem code.
    #[error("{error}: `{command}` failed: {stderr}")]
    Exec {
        error: Box<Error>,
        command: String,
        stderr: String,
    },
}

impl Error {
    pub fn code(&self) -> i32 {
        match self {
            Self::Disk(e) => e.code(),
            Self::Storage(e) => e.code(),
            Self::Volume(e) => e.code(),
            Self::Lvm(e) => e.code(),
            Self::Fstab(e) => e.code(),
            Self::Md(e) => e.code(),
            Self::Loop(e) => e.code(),
            Self::Pe(e) => e.code(),
            Self::Dm(e) => e.code(),
            Self::Btrfs(e) => e.code(),
            Self::Internal(e) => e.code(),
            Self::Exec { error, .. } => error.code(),
        }
    }

    pub fn exec(error: impl Into<Error>, command: &CommandLine, output: &CommandOutput) -> Self {
        let stderr = if output.killed {
            "killed after exceeding its budget".to_string()
        } else {
            output.stderr_text()
        };
        Self::Exec {
            error: Box::new(error.into()),
            command: command.render(),
            stderr,
        }
    }

    /// Stderr of the failed tool, when there was one.
    pub fn ext_error(&self) -> Option<&str> {
        match self {
            Self::Exec { stderr, .. } => Some(stderr),
            _ => None,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        InternalError::Internal(message.into()).into()
    }
}

impl From<ToolError> for Error {
    fn from(error: ToolError) -> Self {
        InternalError::Tool(error.to_string()).into()
    }
}

impl From<SysError> for Error {
    fn from(error: SysError) -> Self {
        match error {
            SysError::Locked { path, pid } => StorageError::Locked { path, pid }.into(),
            other => InternalError::Tool(other.to_string()).into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// `0` on success, the negative status otherwise.
pub fn status<T>(result: &Result<T>) -> i32 {
    match result {
        Ok(_) => 0,
        Err(error) => error.code(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_namespaced() {
        assert_eq!(Error::from(DiskError::ZeroSize).code(), -1018);
        assert_eq!(Error::from(PeError::NoSpaceStriped).code(), -9004);
        assert_eq!(Error::from(StorageError::RemoveUsedVolume("/dev/sda1".into())).code(), -2011);
        assert_eq!(Error::from(BtrfsError::SubvolExists("@".into())).code(), -11004);
    }

    #[test]
    fn exec_keeps_subsystem_code_and_stderr() {
        let command = CommandLine::new("vgcreate").args(["system", "/dev/sda2"]);
        let output = CommandOutput::failure(5, vec!["Device /dev/sda2 excluded".to_string()]);
        let error = Error::exec(LvmError::VgCreateFailed, &command, &output);
        assert_eq!(error.code(), -4010);
        assert_eq!(error.ext_error(), Some("Device /dev/sda2 excluded"));
        assert!(error.to_string().contains("vgcreate system /dev/sda2"));
    }

    #[test]
    fn status_of_results() {
        let ok: Result<()> = Ok(());
        let failed: Result<()> = Err(MdError::TooFewDevices.into());
        assert_eq!(status(&ok), 0);
        assert_eq!(status(&failed), -6002);
    }

    #[test]
    fn lock_conflict_maps_to_storage_code() {
        let error = Error::from(SysError::Locked {
            path: "/run/storage.lock".to_string(),
            pid: 42,
        });
        assert_eq!(error.code(), -2025);
    }
}
