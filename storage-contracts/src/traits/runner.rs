// SPDX-License-Identifier: GPL-3.0-only

use crate::{CommandLine, CommandOutput, ToolError};

/// Blocking command execution.
///
/// A non-zero exit is *not* an error at this level: it is reported through
/// `CommandOutput::exit_code` so the caller can attach its own status code.
/// Bounded commands that were killed come back with `killed` set. `Err` is
/// reserved for "could not run at all".
pub trait CommandRunner {
    fn run(&mut self, command: &CommandLine) -> Result<CommandOutput, ToolError>;

    /// Whether commands have real side effects. Dry-run runners return false.
    fn executes(&self) -> bool {
        true
    }
}

impl<T: CommandRunner + ?Sized> CommandRunner for Box<T> {
    fn run(&mut self, command: &CommandLine) -> Result<CommandOutput, ToolError> {
        (**self).run(command)
    }

    fn executes(&self) -> bool {
        (**self).executes()
    }
}
