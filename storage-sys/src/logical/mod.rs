// SPDX-License-Identifier: GPL-3.0-only

//! Parsers for the logical-volume tool families.

pub mod btrfs_tools;
pub mod dm_tools;
pub mod loop_tools;
pub mod lvm_tools;
pub mod mdadm_tools;

pub(crate) fn parse_tabbed_line(line: &str) -> Vec<String> {
    line.split('\t')
        .map(|part| part.trim().to_string())
        .collect()
}

/// Parse a size column such as `4096.00`, `512k` or `1024kiB` into whole
/// KiB, rounding to nearest.
pub(crate) fn parse_size_k(value: &str) -> Option<u64> {
    let number: String = value
        .trim()
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    if number.is_empty() {
        return None;
    }
    if let Ok(whole) = number.parse::<u64>() {
        return Some(whole);
    }
    number.parse::<f64>().ok().map(|v| v.round() as u64)
}
