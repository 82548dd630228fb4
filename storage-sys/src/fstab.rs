// SPDX-License-Identifier: GPL-3.0-only

use std::path::PathBuf;

use storage_contracts::{FstabEntry, MountTable, ToolError};

use crate::{AsciiFile, Result};

/// `/etc/fstab` with comments and foreign lines preserved.
#[derive(Debug, Clone)]
pub struct EtcFstab {
    file: AsciiFile,
    dirty: bool,
}

impl EtcFstab {
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        Ok(Self {
            file: AsciiFile::load(path)?,
            dirty: false,
        })
    }

    fn position(&self, mount: &str) -> Option<usize> {
        self.file
            .lines()
            .iter()
            .position(|line| parse_line(line).is_some_and(|entry| entry.mount == mount))
    }
}

/// Parse one fstab line. Comments, blanks and short lines yield `None`.
pub fn parse_line(line: &str) -> Option<FstabEntry> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return None;
    }
    let fields: Vec<&str> = trimmed.split_whitespace().collect();
    if fields.len() < 4 {
        return None;
    }
    Some(FstabEntry {
        device: crate::mounts::unescape_mount_field(fields[0]),
        mount: crate::mounts::unescape_mount_field(fields[1]),
        fs: fields[2].to_string(),
        options: fields[3].split(',').map(ToString::to_string).collect(),
        freq: fields.get(4).and_then(|v| v.parse().ok()).unwrap_or(0),
        passno: fields.get(5).and_then(|v| v.parse().ok()).unwrap_or(0),
    })
}

/// Render an entry with the classic padded columns.
pub fn format_line(entry: &FstabEntry) -> String {
    format!(
        "{:<20} {:<20} {:<10} {:<21} {} {}",
        escape_field(&entry.device),
        escape_field(&entry.mount),
        entry.fs,
        entry.options_string(),
        entry.freq,
        entry.passno
    )
}

fn escape_field(value: &str) -> String {
    value.replace(' ', "\\040").replace('\t', "\\011")
}

impl MountTable for EtcFstab {
    fn entries(&self) -> Vec<FstabEntry> {
        self.file.lines().iter().filter_map(|l| parse_line(l)).collect()
    }

    fn upsert(&mut self, old_mount: Option<&str>, entry: FstabEntry) {
        let key = old_mount.unwrap_or(&entry.mount).to_string();
        let line = format_line(&entry);
        match self.position(&key) {
            Some(index) => self.file.lines_mut()[index] = line,
            None => self.file.push(line),
        }
        self.dirty = true;
    }

    fn remove(&mut self, mount: &str) -> bool {
        match self.position(mount) {
            Some(index) => {
                self.file.lines_mut().remove(index);
                self.dirty = true;
                true
            }
            None => false,
        }
    }

    fn flush(&mut self) -> std::result::Result<(), ToolError> {
        if !self.dirty {
            return Ok(());
        }
        self.file.save()?;
        self.dirty = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(content: &str) -> EtcFstab {
        let mut file = AsciiFile::default();
        for line in content.lines() {
            file.push(line);
        }
        EtcFstab { file, dirty: false }
    }

    #[test]
    fn skips_comments_and_parses_entries() {
        let fstab = table(
            "# static file system information\n\
             UUID=1234 / ext4 defaults 0 1\n\
             /dev/sda5 swap swap defaults 0 0\n\
             \n\
             /dev/sdb1 /mnt/my\\040data xfs noauto,user 0 0\n",
        );
        let entries = fstab.entries();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].device, "UUID=1234");
        assert_eq!(entries[0].passno, 1);
        assert_eq!(entries[2].mount, "/mnt/my data");
        assert!(entries[2].has_option("noauto"));
    }

    #[test]
    fn upsert_replaces_in_place_and_keeps_comments() {
        let mut fstab = table("# header\n/dev/sda1 /boot ext2 defaults 1 2\n/dev/sda2 / ext4 defaults 1 1\n");
        fstab.upsert(Some("/boot"), FstabEntry::new("/dev/sda1", "/boot/efi", "vfat"));
        let lines = fstab.file.lines();
        assert_eq!(lines[0], "# header");
        assert!(lines[1].starts_with("/dev/sda1            /boot/efi            vfat"));
        assert_eq!(lines.len(), 3);

        fstab.upsert(None, FstabEntry::new("/dev/sdb1", "/srv", "xfs"));
        assert_eq!(fstab.entries().len(), 3);
        assert!(fstab.dirty);
    }

    #[test]
    fn remove_reports_missing_entries() {
        let mut fstab = table("/dev/sda2 / ext4 defaults 1 1\n");
        assert!(!fstab.remove("/home"));
        assert!(fstab.remove("/"));
        assert!(fstab.entries().is_empty());
    }

    #[test]
    fn format_pads_columns() {
        let line = format_line(&FstabEntry::new("/dev/sda1", "/", "ext4"));
        assert_eq!(
            line,
            "/dev/sda1            /                    ext4       defaults              0 0"
        );
    }
}
