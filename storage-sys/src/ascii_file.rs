// SPDX-License-Identifier: GPL-3.0-only

use std::collections::BTreeSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};

use crate::Result;

/// Paths already backed up by this process.
static BACKED_UP: OnceLock<Mutex<BTreeSet<PathBuf>>> = OnceLock::new();

/// A line-oriented text file edited in memory and rewritten atomically.
#[derive(Debug, Clone, Default)]
pub struct AsciiFile {
    path: PathBuf,
    lines: Vec<String>,
}

impl AsciiFile {
    /// Load `path`. A missing file reads as empty.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let lines = match fs::read_to_string(&path) {
            Ok(content) => content.lines().map(ToString::to_string).collect(),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(error) => return Err(error.into()),
        };
        Ok(Self { path, lines })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn lines_mut(&mut self) -> &mut Vec<String> {
        &mut self.lines
    }

    pub fn push(&mut self, line: impl Into<String>) {
        self.lines.push(line.into());
    }

    /// Write to a sibling temp file and rename it over the original.
    ///
    /// The first save of a path in this process keeps the previous content
    /// as `<name>.<timestamp>.bak`.
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        backup_once(&self.path)?;

        let file_name = self
            .path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| "ascii".to_string());
        let temp = self
            .path
            .with_file_name(format!(".{file_name}.{}.tmp", std::process::id()));

        {
            let mut file = fs::File::create(&temp)?;
            for line in &self.lines {
                writeln!(file, "{line}")?;
            }
            file.sync_all()?;
        }
        fs::rename(&temp, &self.path)?;
        tracing::debug!("rewrote {} ({} lines)", self.path.display(), self.lines.len());
        Ok(())
    }
}

fn backup_once(path: &Path) -> Result<()> {
    let seen = BACKED_UP.get_or_init(|| Mutex::new(BTreeSet::new()));
    let mut seen = match seen.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    if !seen.insert(path.to_path_buf()) || !path.exists() {
        return Ok(());
    }

    let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S");
    let backup = PathBuf::from(format!("{}.{stamp}.bak", path.display()));
    fs::copy(path, &backup)?;
    tracing::info!("saved {} as {}", path.display(), backup.display());
    Ok(())
}
