// SPDX-License-Identifier: GPL-3.0-only

pub mod mount_table;
pub mod raid_config;
pub mod runner;

pub use mount_table::{FstabEntry, MountTable};
pub use raid_config::RaidConfig;
pub use runner::CommandRunner;
