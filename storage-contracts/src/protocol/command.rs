// SPDX-License-Identifier: GPL-3.0-only

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How a command's output streams are captured.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode")]
pub enum ExecMode {
    /// stdout and stderr captured separately, no time limit.
    #[default]
    Separate,
    /// stderr merged into stdout.
    Combined,
    /// Run in the background and poll; kill the process group once either
    /// ceiling is hit.
    Bounded { timeout: Duration, max_lines: usize },
}

/// A program and its arguments, never passed through a shell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandLine {
    pub program: String,
    pub args: Vec<String>,
    #[serde(default)]
    pub mode: ExecMode,
}

impl CommandLine {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            mode: ExecMode::Separate,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn combined(mut self) -> Self {
        self.mode = ExecMode::Combined;
        self
    }

    pub fn bounded(mut self, timeout: Duration, max_lines: usize) -> Self {
        self.mode = ExecMode::Bounded { timeout, max_lines };
        self
    }

    /// Rendering used in logs and error messages.
    pub fn render(&self) -> String {
        if self.args.is_empty() {
            self.program.clone()
        } else {
            let args: Vec<String> = self.args.iter().map(|arg| quote(arg)).collect();
            format!("{} {}", self.program, args.join(" "))
        }
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

/// Single-quote an argument when it contains shell metacharacters.
pub fn quote(arg: &str) -> String {
    let plain = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "/._-+=:,@%".contains(c));
    if plain {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', "'\\''"))
    }
}

/// Captured result of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutput {
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
    pub exit_code: i32,
    /// The bounded runner killed the process.
    #[serde(default)]
    pub killed: bool,
}

impl CommandOutput {
    pub fn success(stdout: Vec<String>) -> Self {
        Self {
            stdout,
            ..Self::default()
        }
    }

    pub fn failure(exit_code: i32, stderr: Vec<String>) -> Self {
        Self {
            stderr,
            exit_code,
            ..Self::default()
        }
    }

    pub fn ok(&self) -> bool {
        self.exit_code == 0 && !self.killed
    }

    pub fn stdout_text(&self) -> String {
        self.stdout.join("\n")
    }

    pub fn stderr_text(&self) -> String {
        self.stderr.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_command_line() {
        let cmd = CommandLine::new("vgcreate")
            .args(["-s", "4096k", "system"])
            .arg("/dev/sda2");
        assert_eq!(cmd.render(), "vgcreate -s 4096k system /dev/sda2");
    }

    #[test]
    fn quotes_shell_metacharacters() {
        assert_eq!(quote("/dev/sda1"), "/dev/sda1");
        assert_eq!(quote("my label"), "'my label'");
        assert_eq!(quote("it's"), "'it'\\''s'");
        assert_eq!(quote(""), "''");
    }

    #[test]
    fn output_status() {
        assert!(CommandOutput::success(vec!["ok".to_string()]).ok());
        assert!(!CommandOutput::failure(5, vec!["boom".to_string()]).ok());
    }
}
