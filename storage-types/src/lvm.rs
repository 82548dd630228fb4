// SPDX-License-Identifier: GPL-3.0-only

//! LVM (Logical Volume Manager) types
//!
//! Reporting types for volume groups, logical volumes and physical volumes.
//! All sizes are KiB; extent counts are in units of the group's extent size.

use serde::{Deserialize, Serialize};

/// Volume group information
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeGroupInfo {
    /// Volume group name
    pub name: String,

    /// Volume group UUID
    pub uuid: String,

    /// Extent size in KiB
    pub pe_size_k: u64,

    /// Total number of extents
    pub pe_count: u64,

    /// Number of free extents
    pub pe_free: u64,

    /// Physical volumes, current ones first
    pub pvs: Vec<PhysicalVolumeInfo>,

    /// Devices that will be added on commit
    pub pvs_add: Vec<String>,

    /// Devices that will be removed on commit
    pub pvs_remove: Vec<String>,

    /// Logical volumes
    pub lvs: Vec<LogicalVolumeInfo>,
}

impl VolumeGroupInfo {
    /// Total size in KiB
    pub fn size_k(&self) -> u64 {
        self.pe_count * self.pe_size_k
    }

    /// Free space in KiB
    pub fn free_k(&self) -> u64 {
        self.pe_free * self.pe_size_k
    }

    /// Get usage percentage (0-100)
    pub fn usage_percent(&self) -> u32 {
        if self.pe_count == 0 {
            0
        } else {
            (((self.pe_count - self.pe_free) as f64 / self.pe_count as f64) * 100.0) as u32
        }
    }
}

/// Logical volume information
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogicalVolumeInfo {
    /// Logical volume name
    pub name: String,

    /// Parent volume group name
    pub vg_name: String,

    /// Logical volume UUID
    pub uuid: String,

    /// Size in KiB
    pub size_k: u64,

    /// Number of logical extents
    pub le: u64,

    /// Stripe count (1 for linear)
    pub stripes: u32,

    /// Stripe size in KiB (0 for default)
    pub stripe_size_k: u64,

    /// Device path (e.g., "/dev/vg0/lv0")
    pub device_path: String,
}

impl LogicalVolumeInfo {
    /// Get a display name for this logical volume
    pub fn display_name(&self) -> String {
        if !self.vg_name.is_empty() && !self.name.is_empty() {
            format!("{}/{}", self.vg_name, self.name)
        } else if let Some(stripped) = self.device_path.strip_prefix("/dev/") {
            stripped.to_string()
        } else {
            self.device_path.clone()
        }
    }
}

/// Physical volume information
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhysicalVolumeInfo {
    /// Device path (e.g., "/dev/sda1")
    pub device: String,

    /// Volume group name (None if not assigned)
    pub vg_name: Option<String>,

    /// Total extents
    pub pe_count: u64,

    /// Free extents
    pub pe_free: u64,
}

impl PhysicalVolumeInfo {
    /// Check if this PV is assigned to a VG
    pub fn is_assigned(&self) -> bool {
        self.vg_name.is_some()
    }

    /// Used extents
    pub fn used(&self) -> u64 {
        self.pe_count.saturating_sub(self.pe_free)
    }
}
