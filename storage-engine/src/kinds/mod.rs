// SPDX-License-Identifier: GPL-3.0-only

//! Per-kind container operations.
//!
//! Each module adds caller-facing operations to [`Storage`](crate::Storage)
//! and the commit handlers the staged engine dispatches to.

pub mod btrfs;
pub mod disk;
pub mod dm;
pub mod loop_dev;
pub mod lvm;
pub mod md;

use crate::error::{Error, Result};
use crate::graph::DeviceGraph;
use crate::volume::{Volume, VolumeId};

pub(crate) fn volume_of(graph: &DeviceGraph, vid: VolumeId) -> Result<Volume> {
    graph
        .volume(vid)
        .cloned()
        .ok_or_else(|| Error::internal(format!("volume {vid:?} is not in the graph")))
}

/// Sum of member sizes and the smallest member, for devices known to the graph.
pub(crate) fn member_sizes(graph: &DeviceGraph, devices: &[String]) -> (u64, u64) {
    let sizes: Vec<u64> = devices
        .iter()
        .filter_map(|d| graph.device(d))
        .map(|d| d.size_k)
        .collect();
    (sizes.iter().sum(), sizes.iter().copied().min().unwrap_or(0))
}
