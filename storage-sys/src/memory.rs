// SPDX-License-Identifier: GPL-3.0-only

//! In-memory twins of the config file writers, for dry runs and tests.
//!
//! Like `RecordingRunner`, clones share state so a caller can keep one
//! handle while the engine owns another.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use storage_contracts::{FstabEntry, MountTable, RaidConfig, ToolError};

#[derive(Debug, Default)]
struct FstabState {
    entries: Vec<FstabEntry>,
    flushes: usize,
}

/// Mount table that never touches disk.
#[derive(Debug, Default, Clone)]
pub struct MemoryFstab {
    inner: Rc<RefCell<FstabState>>,
}

impl MemoryFstab {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entries(entries: Vec<FstabEntry>) -> Self {
        let table = Self::default();
        table.inner.borrow_mut().entries = entries;
        table
    }

    /// How often `flush` was called.
    pub fn flushes(&self) -> usize {
        self.inner.borrow().flushes
    }
}

impl MountTable for MemoryFstab {
    fn entries(&self) -> Vec<FstabEntry> {
        self.inner.borrow().entries.clone()
    }

    fn upsert(&mut self, old_mount: Option<&str>, entry: FstabEntry) {
        let mut state = self.inner.borrow_mut();
        let key = old_mount.unwrap_or(&entry.mount).to_string();
        match state.entries.iter().position(|e| e.mount == key) {
            Some(index) => state.entries[index] = entry,
            None => state.entries.push(entry),
        }
    }

    fn remove(&mut self, mount: &str) -> bool {
        let mut state = self.inner.borrow_mut();
        let before = state.entries.len();
        state.entries.retain(|e| e.mount != mount);
        state.entries.len() != before
    }

    fn flush(&mut self) -> Result<(), ToolError> {
        self.inner.borrow_mut().flushes += 1;
        Ok(())
    }
}

/// mdadm.conf stand-in keyed by array number.
#[derive(Debug, Default, Clone)]
pub struct MemoryMdadm {
    inner: Rc<RefCell<BTreeMap<u32, String>>>,
}

impl MemoryMdadm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entry(&self, number: u32) -> Option<String> {
        self.inner.borrow().get(&number).cloned()
    }
}

impl RaidConfig for MemoryMdadm {
    fn update_entry(&mut self, number: u32, line: &str) {
        self.inner.borrow_mut().insert(number, line.to_string());
    }

    fn remove_entry(&mut self, number: u32) -> bool {
        self.inner.borrow_mut().remove(&number).is_some()
    }

    fn flush(&mut self) -> Result<(), ToolError> {
        Ok(())
    }
}
