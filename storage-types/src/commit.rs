// SPDX-License-Identifier: GPL-3.0-only

//! Commit stages and previews

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ContainerKind;

/// Ordered phases pending work is bucketed into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitStage {
    Decrease,
    Increase,
    Format,
    Mount,
    Subvolume,
}

impl CommitStage {
    pub const ALL: [CommitStage; 5] = [
        CommitStage::Decrease,
        CommitStage::Increase,
        CommitStage::Format,
        CommitStage::Mount,
        CommitStage::Subvolume,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Decrease => "decrease",
            Self::Increase => "increase",
            Self::Format => "format",
            Self::Mount => "mount",
            Self::Subvolume => "subvolume",
        }
    }
}

impl fmt::Display for CommitStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One previewed commit step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitInfo {
    pub stage: CommitStage,
    pub kind: ContainerKind,
    /// Device of the container or volume the step acts on
    pub device: String,
    pub container: bool,
    pub destructive: bool,
    pub text: String,
}

impl fmt::Display for CommitInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)?;
        if self.destructive {
            f.write_str(" [destructive]")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stages_are_ordered() {
        let mut stages = CommitStage::ALL;
        stages.reverse();
        stages.sort();
        assert_eq!(stages, CommitStage::ALL);
        assert!(CommitStage::Decrease < CommitStage::Increase);
    }
}
