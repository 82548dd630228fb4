// SPDX-License-Identifier: GPL-3.0-only

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use storage_contracts::{CommandLine, CommandRunner};

use super::{parse_size_k, parse_tabbed_line};
use crate::{Result, SysError, run_capture};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VgRecord {
    pub name: String,
    pub uuid: String,
    pub pe_size_k: u64,
    pub pe_count: u64,
    pub pe_free: u64,
    pub readonly: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PvRecord {
    pub device: String,
    pub vg_name: Option<String>,
    pub uuid: String,
    pub pe_count: u64,
    pub pe_alloc: u64,
}

/// A logical volume with its segments folded together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LvRecord {
    pub name: String,
    pub vg_name: String,
    pub uuid: String,
    pub size_k: u64,
    pub stripes: u32,
    pub stripe_size_k: u64,
    /// Extents held on each physical volume.
    pub pe_map: BTreeMap<String, u64>,
    pub active: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LvmReport {
    pub vgs: Vec<VgRecord>,
    pub pvs: Vec<PvRecord>,
    pub lvs: Vec<LvRecord>,
}

fn report_command(program: &str, columns: &str) -> CommandLine {
    CommandLine::new(program).args([
        "--noheadings",
        "--unbuffered",
        "--units",
        "k",
        "--nosuffix",
        "--separator",
        "\t",
        "-o",
        columns,
    ])
}

pub fn vgs_command() -> CommandLine {
    report_command(
        "vgs",
        "vg_name,vg_uuid,vg_extent_size,vg_extent_count,vg_free_count,vg_attr",
    )
}

pub fn pvs_command() -> CommandLine {
    report_command(
        "pvs",
        "pv_name,vg_name,pv_uuid,pv_pe_count,pv_pe_alloc_count",
    )
}

pub fn lvs_command() -> CommandLine {
    report_command(
        "lvs",
        "lv_name,vg_name,lv_uuid,lv_size,stripes,stripe_size,seg_pe_ranges,lv_attr",
    )
    .arg("--segments")
}

fn columns(tool: &'static str, line: &str, want: usize) -> Result<Option<Vec<String>>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let cols = parse_tabbed_line(line);
    if cols.len() < want {
        return Err(SysError::parse(
            tool,
            format!("expected {want} columns, got {}: {line}", cols.len()),
        ));
    }
    Ok(Some(cols))
}

fn number(tool: &'static str, field: &str, value: &str) -> Result<u64> {
    parse_size_k(value).ok_or_else(|| SysError::parse(tool, format!("bad {field} '{value}'")))
}

pub fn parse_vgs(lines: &[String]) -> Result<Vec<VgRecord>> {
    let mut vgs = Vec::new();
    for line in lines {
        let Some(cols) = columns("vgs", line, 6)? else {
            continue;
        };
        vgs.push(VgRecord {
            name: cols[0].clone(),
            uuid: cols[1].clone(),
            pe_size_k: number("vgs", "extent size", &cols[2])?,
            pe_count: number("vgs", "extent count", &cols[3])?,
            pe_free: number("vgs", "free count", &cols[4])?,
            readonly: cols[5].starts_with('r'),
        });
    }
    Ok(vgs)
}

pub fn parse_pvs(lines: &[String]) -> Result<Vec<PvRecord>> {
    let mut pvs = Vec::new();
    for line in lines {
        let Some(cols) = columns("pvs", line, 5)? else {
            continue;
        };
        pvs.push(PvRecord {
            device: cols[0].clone(),
            vg_name: (!cols[1].is_empty()).then(|| cols[1].clone()),
            uuid: cols[2].clone(),
            pe_count: number("pvs", "pe count", &cols[3])?,
            pe_alloc: number("pvs", "allocated count", &cols[4])?,
        });
    }
    Ok(pvs)
}

/// Extents per device from a `seg_pe_ranges` value such as
/// `/dev/sda2:0-255 /dev/sdb2:0-255`.
fn parse_pe_ranges(value: &str) -> Result<Vec<(String, u64)>> {
    value
        .split_whitespace()
        .map(|range| {
            let (device, span) = range
                .rsplit_once(':')
                .ok_or_else(|| SysError::parse("lvs", format!("bad pe range '{range}'")))?;
            let (first, last) = span
                .split_once('-')
                .ok_or_else(|| SysError::parse("lvs", format!("bad pe span '{span}'")))?;
            let first = number("lvs", "range start", first)?;
            let last = number("lvs", "range end", last)?;
            if last < first {
                return Err(SysError::parse("lvs", format!("inverted pe span '{span}'")));
            }
            Ok((device.to_string(), last - first + 1))
        })
        .collect()
}

pub fn parse_lvs_segments(lines: &[String]) -> Result<Vec<LvRecord>> {
    let mut lvs: Vec<LvRecord> = Vec::new();
    for line in lines {
        let Some(cols) = columns("lvs", line, 8)? else {
            continue;
        };
        let stripes = number("lvs", "stripes", &cols[4])? as u32;
        let stripe_size_k = number("lvs", "stripe size", &cols[5])?;
        let ranges = parse_pe_ranges(&cols[6])?;

        let index = match lvs
            .iter()
            .position(|lv| lv.vg_name == cols[1] && lv.name == cols[0])
        {
            Some(index) => index,
            None => {
                lvs.push(LvRecord {
                    name: cols[0].clone(),
                    vg_name: cols[1].clone(),
                    uuid: cols[2].clone(),
                    size_k: number("lvs", "size", &cols[3])?,
                    stripes,
                    stripe_size_k,
                    pe_map: BTreeMap::new(),
                    active: cols[7].chars().nth(4) == Some('a'),
                });
                lvs.len() - 1
            }
        };

        let lv = &mut lvs[index];
        lv.stripes = lv.stripes.max(stripes);
        if lv.stripe_size_k == 0 {
            lv.stripe_size_k = stripe_size_k;
        }
        for (device, extents) in ranges {
            *lv.pe_map.entry(device).or_default() += extents;
        }
    }
    Ok(lvs)
}

/// Probe LVM through the reporting tools.
pub fn probe_lvm(runner: &mut dyn CommandRunner) -> Result<LvmReport> {
    if !cfg!(feature = "lvm-tools") {
        return Ok(LvmReport::default());
    }
    if runner.executes() && ["vgs", "lvs", "pvs"].iter().any(|t| which::which(t).is_err()) {
        tracing::debug!("LVM tools not installed, skipping");
        return Ok(LvmReport::default());
    }

    Ok(LvmReport {
        vgs: parse_vgs(&run_capture(runner, &vgs_command())?)?,
        pvs: parse_pvs(&run_capture(runner, &pvs_command())?)?,
        lvs: parse_lvs_segments(&run_capture(runner, &lvs_command())?)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RecordingRunner;
    use storage_contracts::CommandOutput;

    fn lines(text: &str) -> Vec<String> {
        text.lines().map(ToString::to_string).collect()
    }

    #[test]
    fn parses_volume_groups() {
        let vgs = parse_vgs(&lines("  system\tabc-123\t4096.00\t2559\t511\twz--n-\n")).expect("vgs");
        assert_eq!(vgs.len(), 1);
        assert_eq!(vgs[0].name, "system");
        assert_eq!(vgs[0].pe_size_k, 4096);
        assert_eq!(vgs[0].pe_count, 2559);
        assert_eq!(vgs[0].pe_free, 511);
        assert!(!vgs[0].readonly);
    }

    #[test]
    fn parses_unassigned_physical_volumes() {
        let pvs = parse_pvs(&lines(
            "  /dev/sda2\tsystem\tpv-1\t2559\t2048\n  /dev/sdc1\t\tpv-2\t0\t0\n",
        ))
        .expect("pvs");
        assert_eq!(pvs[0].vg_name.as_deref(), Some("system"));
        assert_eq!(pvs[1].vg_name, None);
    }

    #[test]
    fn folds_segments_into_pe_map() {
        let lvs = parse_lvs_segments(&lines(
            "  root\tsystem\tlv-1\t4194304.00\t1\t0\t/dev/sda2:0-767\t-wi-ao----\n\
             \x20 root\tsystem\tlv-1\t4194304.00\t1\t0\t/dev/sdb1:0-255\t-wi-ao----\n\
             \x20 data\tsystem\tlv-2\t2097152.00\t2\t64.00\t/dev/sda2:768-831 /dev/sdb1:256-319\t-wi-a-----\n",
        ))
        .expect("lvs");
        assert_eq!(lvs.len(), 2);
        assert_eq!(lvs[0].pe_map.get("/dev/sda2"), Some(&768));
        assert_eq!(lvs[0].pe_map.get("/dev/sdb1"), Some(&256));
        assert_eq!(lvs[1].stripes, 2);
        assert_eq!(lvs[1].stripe_size_k, 64);
        assert_eq!(lvs[1].pe_map.values().sum::<u64>(), 128);
        assert!(lvs[1].active);
    }

    #[test]
    fn short_rows_are_parse_errors() {
        let err = parse_vgs(&lines("system\t4096\n")).expect_err("too few columns");
        assert!(matches!(err, SysError::Parse { tool: "vgs", .. }));
    }

    #[test]
    fn probe_uses_recorded_output() {
        let runner = RecordingRunner::new();
        runner.respond(
            "vgs",
            CommandOutput::success(lines("vg0\tu\t4096\t100\t10\twz--n-")),
        );
        runner.respond("pvs", CommandOutput::success(lines("/dev/sda2\tvg0\tp\t100\t90")));
        runner.respond(
            "lvs",
            CommandOutput::success(lines("lv\tvg0\tl\t368640\t1\t0\t/dev/sda2:0-89\t-wi-a-----")),
        );
        let report = probe_lvm(&mut runner.clone()).expect("probe");
        assert_eq!(report.vgs.len(), 1);
        assert_eq!(report.lvs[0].pe_map.get("/dev/sda2"), Some(&90));
        assert_eq!(runner.commands().len(), 3);
    }
}
