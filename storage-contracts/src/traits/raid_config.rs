// SPDX-License-Identifier: GPL-3.0-only

use crate::ToolError;

/// mdadm.conf writer keyed by array number.
pub trait RaidConfig {
    /// Replace the entry for `/dev/md<number>` with `line`, appending it when
    /// the array is not listed yet.
    fn update_entry(&mut self, number: u32, line: &str);

    fn remove_entry(&mut self, number: u32) -> bool;

    fn flush(&mut self) -> Result<(), ToolError>;
}
