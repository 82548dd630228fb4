// SPDX-License-Identifier: GPL-3.0-only

//! Command execution.
//!
//! `SystemCmd` runs real processes; `RecordingRunner` records what would be
//! run and answers from a script, which is what dry runs and tests use.

use std::cell::RefCell;
use std::io::{BufRead, BufReader, Read};
use std::os::unix::process::CommandExt;
use std::process::{Command, Stdio};
use std::rc::Rc;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use nix::sys::signal::{Signal, killpg};
use nix::unistd::Pid;
use storage_contracts::{CommandLine, CommandOutput, CommandRunner, ExecMode, ToolError};

use crate::{Result, SysError};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Runs commands on the host with a C locale.
#[derive(Debug, Default, Clone)]
pub struct SystemCmd {
    root_prefix: Option<String>,
}

impl SystemCmd {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run tools chrooted-style: `ROOT_PREFIX` is exported for wrappers
    /// that honour it.
    pub fn with_root_prefix(root_prefix: impl Into<String>) -> Self {
        Self {
            root_prefix: Some(root_prefix.into()),
        }
    }

    fn command(&self, line: &CommandLine) -> Command {
        let mut command = Command::new(&line.program);
        command.args(&line.args).env("LC_ALL", "C");
        if let Some(prefix) = &self.root_prefix {
            command.env("ROOT_PREFIX", prefix);
        }
        command
    }

    fn run_blocking(&self, line: &CommandLine, combine: bool) -> Result<CommandOutput> {
        let output = self.command(line).stdin(Stdio::null()).output()?;
        let mut stdout = split_lines(&output.stdout);
        let mut stderr = split_lines(&output.stderr);
        if combine {
            stdout.append(&mut stderr);
        }
        Ok(CommandOutput {
            stdout,
            stderr,
            exit_code: output.status.code().unwrap_or(-1),
            killed: false,
        })
    }

    fn run_bounded(
        &self,
        line: &CommandLine,
        timeout: Duration,
        max_lines: usize,
    ) -> Result<CommandOutput> {
        let mut child = self
            .command(line)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .spawn()?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SysError::OperationFailed("stdout not captured".to_string()))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| SysError::OperationFailed("stderr not captured".to_string()))?;

        let (tx, rx) = mpsc::channel::<String>();
        let reader = thread::spawn(move || {
            for line in BufReader::new(stdout).lines() {
                let Ok(line) = line else { break };
                if tx.send(line).is_err() {
                    break;
                }
            }
        });
        let err_reader = thread::spawn(move || {
            let mut buffer = Vec::new();
            let _ = stderr.read_to_end(&mut buffer);
            buffer
        });

        let deadline = Instant::now() + timeout;
        let mut lines = Vec::new();
        let mut killed = false;
        loop {
            match rx.recv_timeout(POLL_INTERVAL) {
                Ok(text) => {
                    lines.push(text);
                    if lines.len() > max_lines {
                        tracing::warn!(
                            "{} exceeded {} output lines, killing",
                            line.program,
                            max_lines
                        );
                        killed = true;
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
            if !killed && Instant::now() >= deadline {
                tracing::warn!("{} exceeded {:?}, killing", line.program, timeout);
                killed = true;
            }
            if killed {
                kill_group(child.id());
                break;
            }
        }

        let status = child.wait()?;
        let _ = reader.join();
        let stderr = err_reader.join().unwrap_or_default();

        Ok(CommandOutput {
            stdout: lines,
            stderr: split_lines(&stderr),
            exit_code: status.code().unwrap_or(-1),
            killed,
        })
    }
}

fn kill_group(pid: u32) {
    match killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
        Ok(()) => tracing::debug!("killed process group {}", pid),
        Err(nix::Error::ESRCH) => tracing::debug!("process group {} already gone", pid),
        Err(e) => tracing::error!("failed to kill process group {}: {}", pid, e),
    }
}

fn split_lines(bytes: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(bytes)
        .lines()
        .map(ToString::to_string)
        .collect()
}

impl CommandRunner for SystemCmd {
    fn run(&mut self, command: &CommandLine) -> std::result::Result<CommandOutput, ToolError> {
        tracing::info!("exec: {}", command.render());
        let output = match command.mode {
            ExecMode::Separate => self.run_blocking(command, false),
            ExecMode::Combined => self.run_blocking(command, true),
            ExecMode::Bounded { timeout, max_lines } => {
                self.run_bounded(command, timeout, max_lines)
            }
        }?;
        if !output.ok() {
            tracing::debug!(
                "{} exited {} killed:{}: {}",
                command.program,
                output.exit_code,
                output.killed,
                output.stderr_text()
            );
        }
        Ok(output)
    }
}

#[derive(Debug, Default)]
struct Recorded {
    commands: Vec<CommandLine>,
    rules: Vec<Rule>,
}

#[derive(Debug)]
struct Rule {
    prefix: String,
    output: CommandOutput,
    once: bool,
}

/// Records commands instead of running them.
///
/// Clones share one log, so a test can hand one clone to the engine and
/// inspect the other. Commands with no matching rule succeed with no output.
#[derive(Debug, Default, Clone)]
pub struct RecordingRunner {
    inner: Rc<RefCell<Recorded>>,
}

impl RecordingRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every command whose rendering starts with `prefix`.
    pub fn respond(&self, prefix: &str, output: CommandOutput) -> &Self {
        self.inner.borrow_mut().rules.push(Rule {
            prefix: prefix.to_string(),
            output,
            once: false,
        });
        self
    }

    /// Answer the next matching command only.
    pub fn respond_once(&self, prefix: &str, output: CommandOutput) -> &Self {
        self.inner.borrow_mut().rules.push(Rule {
            prefix: prefix.to_string(),
            output,
            once: true,
        });
        self
    }

    /// Make commands starting with `prefix` fail with `stderr`.
    pub fn fail(&self, prefix: &str, stderr: &str) -> &Self {
        self.respond(prefix, CommandOutput::failure(1, vec![stderr.to_string()]))
    }

    pub fn commands(&self) -> Vec<CommandLine> {
        self.inner.borrow().commands.clone()
    }

    pub fn rendered(&self) -> Vec<String> {
        self.inner
            .borrow()
            .commands
            .iter()
            .map(CommandLine::render)
            .collect()
    }

    pub fn clear(&self) {
        self.inner.borrow_mut().commands.clear();
    }
}

impl CommandRunner for RecordingRunner {
    fn run(&mut self, command: &CommandLine) -> std::result::Result<CommandOutput, ToolError> {
        let rendered = command.render();
        tracing::info!("dry-run: {}", rendered);
        let mut inner = self.inner.borrow_mut();
        inner.commands.push(command.clone());
        let matched = inner
            .rules
            .iter()
            .position(|rule| rendered.starts_with(&rule.prefix));
        let output = match matched {
            Some(index) if inner.rules[index].once => inner.rules.remove(index).output,
            Some(index) => inner.rules[index].output.clone(),
            None => CommandOutput::default(),
        };
        Ok(output)
    }

    fn executes(&self) -> bool {
        false
    }
}

/// Run `command` and return stdout, turning a non-zero exit into
/// `SysError::Exec`.
pub fn run_capture(runner: &mut dyn CommandRunner, command: &CommandLine) -> Result<Vec<String>> {
    let output = runner.run(command)?;
    if output.killed {
        return Err(SysError::Timeout {
            command: command.render(),
        });
    }
    if output.exit_code != 0 {
        return Err(SysError::Exec {
            command: command.render(),
            code: output.exit_code,
            stderr: output.stderr_text(),
        });
    }
    Ok(output.stdout)
}

/// Whether `program` can be found on `PATH`.
pub fn tool_available(program: &str) -> bool {
    which::which(program).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_runner_logs_and_answers() {
        let runner = RecordingRunner::new();
        runner.respond("vgs", CommandOutput::success(vec!["system".to_string()]));
        runner.fail("vgremove", "Volume group busy");

        let mut engine_side = runner.clone();
        let out = engine_side
            .run(&CommandLine::new("vgs").arg("--noheadings"))
            .expect("recorded run");
        assert_eq!(out.stdout, vec!["system".to_string()]);

        let out = engine_side
            .run(&CommandLine::new("vgremove").arg("system"))
            .expect("recorded run");
        assert!(!out.ok());

        assert_eq!(
            runner.rendered(),
            vec!["vgs --noheadings".to_string(), "vgremove system".to_string()]
        );
        assert!(!engine_side.executes());
    }

    #[test]
    fn respond_once_is_consumed() {
        let runner = RecordingRunner::new();
        runner.respond_once("losetup", CommandOutput::failure(2, vec![]));
        let mut r = runner.clone();
        assert!(!r.run(&CommandLine::new("losetup")).unwrap().ok());
        assert!(r.run(&CommandLine::new("losetup")).unwrap().ok());
    }

    #[test]
    fn run_capture_maps_exit_codes() {
        let runner = RecordingRunner::new();
        runner.fail("mdadm", "no such array");
        let mut r = runner.clone();
        let err = run_capture(&mut r, &CommandLine::new("mdadm").arg("--detail"))
            .expect_err("non-zero exit");
        match err {
            SysError::Exec { stderr, code, .. } => {
                assert_eq!(code, 1);
                assert_eq!(stderr, "no such array");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn system_cmd_captures_output() {
        if !tool_available("sh") {
            return;
        }
        let mut cmd = SystemCmd::new();
        let out = cmd
            .run(&CommandLine::new("sh").args(["-c", "echo one; echo two >&2; exit 3"]))
            .expect("sh runs");
        assert_eq!(out.stdout, vec!["one".to_string()]);
        assert_eq!(out.stderr, vec!["two".to_string()]);
        assert_eq!(out.exit_code, 3);

        let out = cmd
            .run(&CommandLine::new("sh").args(["-c", "echo one; echo two >&2"]).combined())
            .expect("sh runs");
        assert_eq!(out.stdout, vec!["one".to_string(), "two".to_string()]);
    }

    #[test]
    fn bounded_mode_kills_on_line_budget() {
        if !tool_available("yes") {
            return;
        }
        let mut cmd = SystemCmd::new();
        let out = cmd
            .run(&CommandLine::new("yes").bounded(Duration::from_secs(10), 50))
            .expect("yes runs");
        assert!(out.killed);
        assert!(out.stdout.len() > 50);
        assert!(!out.ok());
    }

    #[test]
    fn bounded_mode_kills_on_timeout() {
        if !tool_available("sleep") {
            return;
        }
        let mut cmd = SystemCmd::new();
        let started = Instant::now();
        let out = cmd
            .run(&CommandLine::new("sleep").arg("30").bounded(Duration::from_millis(300), 10))
            .expect("sleep runs");
        assert!(out.killed);
        assert!(started.elapsed() < Duration::from_secs(10));
    }
}
