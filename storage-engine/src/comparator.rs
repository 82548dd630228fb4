// SPDX-License-Identifier: GPL-3.0-only

//! Graph equality and difference reports.
//!
//! Equality ignores runtime-only state (the silent flag and the ids the
//! graph hands out). Difference lines pair entities by device path and
//! created flag, so an insertion does not shift every later entity.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

use crate::container::{Container, ContainerId};
use crate::graph::DeviceGraph;
use crate::volume::{Volume, VolumeId};

/// Fields that identify an entity inside one graph only.
const BOOKKEEPING: &[&str] = &["id", "container", "volumes"];

fn volume_content(v: &Volume) -> Volume {
    let mut v = v.clone();
    v.id = VolumeId(0);
    v.container = ContainerId(0);
    v.dev.silent = false;
    v
}

fn equal_volume(a: &Volume, b: &Volume) -> bool {
    volume_content(a) == volume_content(b)
}

fn equal_container(a: &Container, b: &Container) -> bool {
    let mut left = a.dev.clone();
    let mut right = b.dev.clone();
    left.silent = false;
    right.silent = false;
    left == right
        && a.readonly == b.readonly
        && a.data == b.data
        && a.volumes.len() == b.volumes.len()
        && a.volumes.iter().zip(&b.volumes).all(|(x, y)| equal_volume(x, y))
}

/// Same containers with the same volumes, in the same order.
pub fn equal_content(a: &DeviceGraph, b: &DeviceGraph) -> bool {
    let mut left = a.containers();
    let mut right = b.containers();
    loop {
        match (left.next(), right.next()) {
            (None, None) => return true,
            (Some(x), Some(y)) if equal_container(x, y) => {}
            _ => return false,
        }
    }
}

fn flatten(prefix: &str, value: &Value, out: &mut BTreeMap<String, Value>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                if prefix.is_empty() && BOOKKEEPING.contains(&key.as_str()) {
                    continue;
                }
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{prefix}.{key}")
                };
                flatten(&path, child, out);
            }
        }
        other => {
            out.insert(prefix.to_string(), other.clone());
        }
    }
}

fn fields(entity: &impl Serialize) -> BTreeMap<String, Value> {
    let mut out = BTreeMap::new();
    match serde_json::to_value(entity) {
        Ok(value) => flatten("", &value, &mut out),
        Err(error) => tracing::warn!("cannot serialize entity for diffing: {error}"),
    }
    out
}

fn text(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(items)) => items
            .iter()
            .map(|i| text(Some(i)))
            .collect::<Vec<_>>()
            .join(","),
        Some(other) => other.to_string(),
    }
}

/// ` field:old-->new` for every changed field; booleans as `-->field`
/// when switched on and `field-->` when switched off.
fn field_difference(a: &impl Serialize, b: &impl Serialize) -> String {
    let left = fields(a);
    let right = fields(b);
    let mut keys: Vec<&String> = left.keys().chain(right.keys()).collect();
    keys.sort();
    keys.dedup();

    let mut out = String::new();
    for key in keys {
        let (l, r) = (left.get(key), right.get(key));
        if l == r {
            continue;
        }
        match (l, r) {
            (Some(Value::Bool(_)) | None, Some(Value::Bool(true))) => {
                out.push_str(&format!(" -->{key}"));
            }
            (Some(Value::Bool(true)), Some(Value::Bool(false)) | None) => {
                out.push_str(&format!(" {key}-->"));
            }
            _ => out.push_str(&format!(" {key}:{}-->{}", text(l), text(r))),
        }
    }
    out
}

/// Pair entities by key; unmatched ones come back as `None` on their side.
fn pair<'a, T>(
    left: &'a [T],
    right: &'a [T],
    key: impl Fn(&T) -> (String, bool),
) -> Vec<(Option<&'a T>, Option<&'a T>)> {
    let mut taken = vec![false; right.len()];
    let mut pairs = Vec::new();
    for l in left {
        let wanted = key(l);
        let found = right
            .iter()
            .enumerate()
            .position(|(i, r)| !taken[i] && key(r) == wanted);
        match found {
            Some(i) => {
                taken[i] = true;
                pairs.push((Some(l), Some(&right[i])));
            }
            None => pairs.push((Some(l), None)),
        }
    }
    for (i, r) in right.iter().enumerate() {
        if !taken[i] {
            pairs.push((None, Some(r)));
        }
    }
    pairs
}

fn entity_lines<T: Serialize>(
    pairs: Vec<(Option<&T>, Option<&T>)>,
    device: impl Fn(&T) -> String,
    out: &mut Vec<String>,
) {
    for entry in pairs {
        match entry {
            (Some(l), Some(r)) => {
                let diff = field_difference(l, r);
                if !diff.is_empty() {
                    out.push(format!("{}:{diff}", device(l)));
                }
            }
            (Some(l), None) => out.push(format!("{}-->", device(l))),
            (None, Some(r)) => out.push(format!("<--{}", device(r))),
            (None, None) => {}
        }
    }
}

/// One line per differing entity, containers before their volumes.
pub fn log_difference(a: &DeviceGraph, b: &DeviceGraph) -> Vec<String> {
    let left: Vec<Container> = a.containers().cloned().collect();
    let right: Vec<Container> = b.containers().cloned().collect();
    let container_key = |c: &Container| (c.device().to_string(), c.dev.created);
    let volume_key = |v: &Volume| (v.device().to_string(), v.dev.created);

    let mut out = Vec::new();
    for (l, r) in pair(left.as_slice(), right.as_slice(), container_key) {
        entity_lines(vec![(l, r)], |c: &Container| c.device().to_string(), &mut out);
        let empty: Vec<Volume> = Vec::new();
        let lv = l.map_or(&empty, |c| &c.volumes);
        let rv = r.map_or(&empty, |c| &c.volumes);
        if l.is_some() && r.is_some() {
            entity_lines(
                pair(lv.as_slice(), rv.as_slice(), volume_key),
                |v: &Volume| v.device().to_string(),
                &mut out,
            );
        }
    }
    out
}

/// Per-PV extent usage against the volumes' extent maps. Only volume
/// groups carry extents; everything else is trivially consistent.
pub fn check_consistency(container: &Container) -> bool {
    container
        .vg()
        .is_none_or(|vg| vg.pool.check_consistency(&container.volumes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::{ContainerData, DiskData};
    use crate::device::Device;
    use crate::volume::{DmData, VolumeData};
    use storage_types::{ContainerKind, DiskLabel, GIB};

    fn graph() -> DeviceGraph {
        let mut graph = DeviceGraph::new();
        graph.add_container(
            Device::new("sda", "/dev/sda", 10 * GIB),
            ContainerData::Disk(DiskData {
                label: DiskLabel::Gpt,
                model: Some("QEMU HARDDISK".to_string()),
                del_ptable: false,
            }),
        );
        let cid = graph.ensure_pool(ContainerKind::Dm);
        for name in ["root", "swap"] {
            let vid = graph.new_volume_id();
            graph.add_volume(Volume::new(
                vid,
                cid,
                Device::new(name, format!("/dev/mapper/{name}"), GIB),
                0,
                VolumeData::Dm(DmData {
                    target: "linear".to_string(),
                    devices: vec!["/dev/sda".to_string()],
                }),
            ));
        }
        graph
    }

    #[test]
    fn a_graph_equals_itself() {
        let g = graph();
        assert!(equal_content(&g, &g));
        assert!(log_difference(&g, &g).is_empty());
    }

    #[test]
    fn silent_flag_is_not_content() {
        let g = graph();
        let mut other = g.clone();
        if let Some(id) = other.find_volume_id("/dev/mapper/root") {
            if let Some(v) = other.volume_mut(id) {
                v.dev.silent = true;
            }
        }
        assert!(equal_content(&g, &other));
    }

    #[test]
    fn changed_fields_are_reported() {
        let g = graph();
        let mut other = g.clone();
        let id = other.find_volume_id("/dev/mapper/root").expect("root");
        if let Some(v) = other.volume_mut(id) {
            v.dev.size_k = 2 * GIB;
            v.format = true;
        }
        assert!(!equal_content(&g, &other));
        assert_eq!(
            log_difference(&g, &other),
            vec![format!(
                "/dev/mapper/root: dev.size_k:{}-->{} -->format",
                GIB,
                2 * GIB
            )]
        );
    }

    #[test]
    fn insertions_do_not_shift_later_entities() {
        let g = graph();
        let mut other = g.clone();
        let first = other.find_volume_id("/dev/mapper/root").expect("root");
        other.remove_volume(first);
        let cid = other.pool(ContainerKind::Dm).map(|c| c.id).expect("pool");
        let vid = other.new_volume_id();
        let mut dev = Device::new("data", "/dev/mapper/data", GIB);
        dev.created = true;
        other.add_volume(Volume::new(
            vid,
            cid,
            dev,
            0,
            VolumeData::Dm(DmData {
                target: "linear".to_string(),
                devices: Vec::new(),
            }),
        ));
        assert_eq!(
            log_difference(&g, &other),
            vec!["/dev/mapper/root-->", "<--/dev/mapper/data"]
        );
    }
}
