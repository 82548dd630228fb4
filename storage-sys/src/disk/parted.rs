// SPDX-License-Identifier: GPL-3.0-only

use serde::{Deserialize, Serialize};
use storage_contracts::{CommandLine, CommandRunner};
use storage_types::{DiskLabel, FsType, PartitionId, PartitionType};

use crate::logical::parse_size_k;
use crate::{Result, SysError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartedPartition {
    pub number: u32,
    pub start_k: u64,
    pub size_k: u64,
    #[serde(default)]
    pub partition_type: PartitionType,
    #[serde(default)]
    pub fs: FsType,
    #[serde(default)]
    pub id: PartitionId,
    #[serde(default)]
    pub boot: bool,
    #[serde(default)]
    pub flags: Vec<String>,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartedDisk {
    pub device: String,
    #[serde(default)]
    pub model: Option<String>,
    pub size_k: u64,
    pub label: DiskLabel,
    #[serde(default)]
    pub partitions: Vec<PartedPartition>,
}

pub fn print_command(device: &str) -> CommandLine {
    CommandLine::new("parted").args(["-s", device, "unit", "KiB", "print"])
}

/// Byte offsets of the table columns, taken from the header line.
#[derive(Debug, Default)]
struct Columns {
    start: usize,
    end: usize,
    size: usize,
    kind: Option<usize>,
    fs: Option<usize>,
    name: Option<usize>,
    flags: Option<usize>,
}

impl Columns {
    fn from_header(header: &str) -> Result<Self> {
        let find = |label: &str| header.find(label);
        let required = |label: &str| {
            find(label)
                .ok_or_else(|| SysError::parse("parted", format!("no '{label}' column in header")))
        };
        Ok(Self {
            start: required("Start")?,
            end: required("End")?,
            size: required("Size")?,
            kind: find("Type"),
            fs: find("File system"),
            name: find("Name"),
            flags: find("Flags"),
        })
    }

    fn offsets(&self) -> Vec<usize> {
        let mut offsets = vec![self.start, self.end, self.size];
        offsets.extend([self.kind, self.fs, self.name, self.flags].into_iter().flatten());
        offsets.sort_unstable();
        offsets
    }

    /// Text of the column starting at `at`, up to the next column.
    fn cell<'a>(&self, line: &'a str, at: Option<usize>) -> &'a str {
        let Some(at) = at else {
            return "";
        };
        let next = self
            .offsets()
            .into_iter()
            .find(|offset| *offset > at)
            .unwrap_or(line.len());
        line.get(at.min(line.len())..next.min(line.len()))
            .unwrap_or("")
            .trim()
    }
}

fn derive_id(label: DiskLabel, kind: PartitionType, fs: &str, flags: &[String]) -> PartitionId {
    let has = |flag: &str| flags.iter().any(|f| f == flag);
    if kind == PartitionType::Extended {
        PartitionId::EXTENDED
    } else if has("lvm") {
        PartitionId::LVM
    } else if has("raid") {
        PartitionId::RAID
    } else if has("esp") {
        PartitionId::EFI
    } else if has("bios_grub") {
        PartitionId::GPT_BIOS
    } else if fs.starts_with("linux-swap") || has("swap") {
        PartitionId::SWAP
    } else if label == DiskLabel::Msdos && fs.starts_with("fat") {
        PartitionId::DOS
    } else {
        PartitionId::LINUX
    }
}

/// Parse `parted -s DEV unit KiB print`.
pub fn parse_print(device: &str, lines: &[String]) -> Result<PartedDisk> {
    let mut disk = PartedDisk {
        device: device.to_string(),
        model: None,
        size_k: 0,
        label: DiskLabel::None,
        partitions: Vec::new(),
    };
    let mut columns: Option<Columns> = None;

    for line in lines {
        if let Some(model) = line.strip_prefix("Model:") {
            disk.model = Some(model.trim().to_string());
        } else if line.starts_with("Disk /") {
            let size = line.rsplit(':').next().unwrap_or_default();
            disk.size_k = parse_size_k(size)
                .ok_or_else(|| SysError::parse("parted", format!("bad disk size '{line}'")))?;
        } else if let Some(label) = line.strip_prefix("Partition Table:") {
            disk.label = label
                .parse()
                .map_err(|e: String| SysError::parse("parted", e))?;
        } else if line.starts_with("Number") {
            columns = Some(Columns::from_header(line)?);
        } else if let Some(cols) = &columns {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let number: u32 = trimmed
                .split_whitespace()
                .next()
                .and_then(|n| n.parse().ok())
                .ok_or_else(|| SysError::parse("parted", format!("bad partition row '{line}'")))?;

            let start_k = parse_size_k(cols.cell(line, Some(cols.start)))
                .ok_or_else(|| SysError::parse("parted", format!("bad start in '{line}'")))?;
            let size_k = parse_size_k(cols.cell(line, Some(cols.size)))
                .ok_or_else(|| SysError::parse("parted", format!("bad size in '{line}'")))?;
            let partition_type = match cols.cell(line, cols.kind) {
                "extended" => PartitionType::Extended,
                "logical" => PartitionType::Logical,
                _ => PartitionType::Primary,
            };
            let fs_text = cols.cell(line, cols.fs);
            let flags: Vec<String> = cols
                .cell(line, cols.flags)
                .split(',')
                .map(str::trim)
                .filter(|f| !f.is_empty())
                .map(ToString::to_string)
                .collect();
            let name = Some(cols.cell(line, cols.name))
                .filter(|n| !n.is_empty())
                .map(ToString::to_string);

            disk.partitions.push(PartedPartition {
                number,
                start_k,
                size_k,
                partition_type,
                fs: fs_text.parse().unwrap_or(FsType::Unknown),
                id: derive_id(disk.label, partition_type, fs_text, &flags),
                boot: flags.iter().any(|f| f == "boot"),
                flags,
                name,
            });
        }
    }

    if disk.size_k == 0 {
        return Err(SysError::parse("parted", format!("no disk size for {device}")));
    }
    Ok(disk)
}

/// Read the partition table of `device`. A disk without a recognised label
/// comes back with `DiskLabel::None` and no partitions.
pub fn probe_disk(runner: &mut dyn CommandRunner, device: &str, size_k: u64) -> Result<PartedDisk> {
    let command = print_command(device);
    let output = runner.run(&command)?;
    if output.ok() {
        return parse_print(device, &output.stdout);
    }
    let stderr = output.stderr_text();
    if stderr.contains("unrecognised disk label") || stderr.contains("unrecognized disk label") {
        tracing::debug!("{device} has no partition table");
        return Ok(PartedDisk {
            device: device.to_string(),
            model: None,
            size_k,
            label: DiskLabel::None,
            partitions: Vec::new(),
        });
    }
    Err(SysError::Exec {
        command: command.render(),
        code: output.exit_code,
        stderr,
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

    const MSDOS: &str = "Model: ATA WDC WD5000AAKX (scsi)
Disk /dev/sda: 488386584kiB
Sector size (logical/physical): 512B/512B
Partition Table: msdos
Disk Flags:

Number  Start      End           Size          Type      File system     Flags
 1      1024kiB    525312kiB     524288kiB     primary   ext4            boot
 2      525312kiB  488385536kiB  487860224kiB  extended                  lba
 5      526336kiB  4720640kiB    4194304kiB    logical   linux-swap(v1)  swap
 6      4721664kiB 488385536kiB  483663872kiB  logical                   lvm
";

    const GPT: &str = "Model: NVMe Device (nvme)
Disk /dev/nvme0n1: 500107608kiB
Sector size (logical/physical): 512B/512B
Partition Table: gpt
Disk Flags:

Number  Start      End           Size          File system  Name                  Flags
 1      1024kiB    525312kiB     524288kiB     fat32        EFI system partition  boot, esp
 2      525312kiB  500106240kiB  499580928kiB  btrfs        root
";

    #[test]
    fn parses_msdos_table() {
        let disk = parse_print("/dev/sda", &lines(MSDOS)).expect("parse");
        assert_eq!(disk.label, DiskLabel::Msdos);
        assert_eq!(disk.size_k, 488386584);
        assert_eq!(disk.partitions.len(), 4);

        let boot = &disk.partitions[0];
        assert_eq!((boot.start_k, boot.size_k), (1024, 524288));
        assert_eq!(boot.fs, FsType::Ext4);
        assert!(boot.boot);
        assert_eq!(boot.id, PartitionId::LINUX);

        assert_eq!(disk.partitions[1].partition_type, PartitionType::Extended);
        assert_eq!(disk.partitions[1].id, PartitionId::EXTENDED);
        assert_eq!(disk.partitions[2].fs, FsType::Swap);
        assert_eq!(disk.partitions[2].id, PartitionId::SWAP);
        assert_eq!(disk.partitions[3].partition_type, PartitionType::Logical);
        assert_eq!(disk.partitions[3].id, PartitionId::LVM);
    }

    #[test]
    fn parses_gpt_names_and_flags() {
        let disk = parse_print("/dev/nvme0n1", &lines(GPT)).expect("parse");
        assert_eq!(disk.label, DiskLabel::Gpt);
        let esp = &disk.partitions[0];
        assert_eq!(esp.name.as_deref(), Some("EFI system partition"));
        assert_eq!(esp.flags, vec!["boot".to_string(), "esp".to_string()]);
        assert_eq!(esp.id, PartitionId::EFI);
        assert_eq!(disk.partitions[1].fs, FsType::Btrfs);
        assert_eq!(disk.partitions[1].partition_type, PartitionType::Primary);
    }

    #[test]
    fn unlabelled_disk_is_empty() {
        let runner = RecordingRunner::new();
        runner.respond(
            "parted",
            CommandOutput::failure(1, vec!["Error: /dev/sdb: unrecognised disk label".to_string()]),
        );
        let disk = probe_disk(&mut runner.clone(), "/dev/sdb", 1000).expect("probe");
        assert_eq!(disk.label, DiskLabel::None);
        assert_eq!(disk.size_k, 1000);
    }

    #[test]
    fn garbage_row_is_parse_error() {
        let mut text = MSDOS.to_string();
        text.push_str(" x      foo\n");
        assert!(matches!(
            parse_print("/dev/sda", &lines(&text)),
            Err(SysError::Parse { tool: "parted", .. })
        ));
    }
}
