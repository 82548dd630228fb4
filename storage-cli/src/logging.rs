// SPDX-License-Identifier: GPL-3.0-only

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::{Duration, SystemTime};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::{CliConfig, LoggingLevel};

static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

const DEFAULT_LOG_PREFIX: &str = "storage-planner.log";
const KEEP_DAYS: u64 = 7;

/// stderr always; a daily file as well when the config asks for it.
/// `RUST_LOG` overrides the configured level.
pub(crate) fn init(config: &CliConfig, level: LoggingLevel) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let mut filter = EnvFilter::new("warn");
        for krate in ["storage_planner", "storage_engine", "storage_sys"] {
            if let Ok(directive) = format!("{krate}={}", level.as_directive()).parse() {
                filter = filter.add_directive(directive);
            }
        }
        filter
    });

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_timer(tracing_subscriber::fmt::time::SystemTime);

    if !config.log_to_file {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .init();
        return;
    }

    match file_writer(config.log_dir.as_deref()) {
        Ok((writer, guard)) => {
            let file_layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_target(true)
                .with_ansi(false)
                .with_timer(tracing_subscriber::fmt::time::SystemTime);

            tracing_subscriber::registry()
                .with(env_filter)
                .with(stderr_layer)
                .with(file_layer)
                .init();

            let _ = LOG_GUARD.set(guard);
        }
        Err(e) => {
            eprintln!("storage-planner: failed to initialize file logging: {e:#}");
            tracing_subscriber::registry()
                .with(env_filter)
                .with(stderr_layer)
                .init();
        }
    }
}

fn file_writer(
    dir: Option<&Path>,
) -> anyhow::Result<(tracing_appender::non_blocking::NonBlocking, WorkerGuard)> {
    let dir = dir.map(Path::to_path_buf).unwrap_or_else(default_log_dir);
    let prefix = OsString::from(DEFAULT_LOG_PREFIX);

    if let Err(e) = fs::create_dir_all(&dir) {
        return Err(anyhow::anyhow!(
            "create log directory failed: {} ({})",
            dir.display(),
            e
        ));
    }

    cleanup_old_logs(&dir, &prefix, KEEP_DAYS);

    let appender = tracing_appender::rolling::daily(&dir, &prefix);
    Ok(tracing_appender::non_blocking(appender))
}

fn default_log_dir() -> PathBuf {
    if let Some(xdg_state) = std::env::var_os("XDG_STATE_HOME") {
        return PathBuf::from(xdg_state).join("storage-planner").join("logs");
    }

    if let Some(home) = std::env::var_os("HOME") {
        return PathBuf::from(home)
            .join(".local")
            .join("state")
            .join("storage-planner")
            .join("logs");
    }

    PathBuf::from("/tmp").join("storage-planner").join("logs")
}

fn cleanup_old_logs(dir: &Path, prefix: &OsString, keep_days: u64) {
    let cutoff = SystemTime::now().checked_sub(Duration::from_secs(keep_days * 24 * 60 * 60));
    let Some(cutoff) = cutoff else { return };

    let prefix = prefix.to_string_lossy();

    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };

    for entry in entries.flatten() {
        let Ok(file_type) = entry.file_type() else {
            continue;
        };
        if !file_type.is_file() {
            continue;
        }

        // Only files of our own rolling appender.
        if !entry.file_name().to_string_lossy().starts_with(prefix.as_ref()) {
            continue;
        }

        let Ok(modified) = entry.metadata().and_then(|m| m.modified()) else {
            continue;
        };
        if modified >= cutoff {
            continue;
        }

        let _ = fs::remove_file(entry.path());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("storage-planner-{name}-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).expect("scratch dir");
        dir
    }

    #[test]
    fn cleanup_keeps_recent_and_foreign_files() {
        let dir = scratch("logs");
        let ours = dir.join("storage-planner.log.2026-10-18");
        let foreign = dir.join("other.log");
        fs::write(&ours, "recent").expect("write");
        fs::write(&foreign, "foreign").expect("write");

        cleanup_old_logs(&dir, &OsString::from(DEFAULT_LOG_PREFIX), KEEP_DAYS);
        assert!(ours.exists());
        assert!(foreign.exists());

        // A zero-day window makes every file of ours stale.
        std::thread::sleep(Duration::from_millis(20));
        cleanup_old_logs(&dir, &OsString::from(DEFAULT_LOG_PREFIX), 0);
        assert!(!ours.exists());
        assert!(foreign.exists());

        let _ = fs::remove_dir_all(&dir);
    }
}
