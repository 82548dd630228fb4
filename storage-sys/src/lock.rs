// SPDX-License-Identifier: GPL-3.0-only

use std::fs::{File, OpenOptions};
use std::mem::MaybeUninit;
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};

use crate::{Result, SysError};

/// Advisory `fcntl` lock held for the lifetime of a storage instance.
///
/// Readers take a shared lock, writers an exclusive one. Acquisition never
/// blocks: a conflicting holder is reported with its PID.
#[derive(Debug)]
pub struct StorageLock {
    file: File,
    path: PathBuf,
    exclusive: bool,
}

impl StorageLock {
    pub fn acquire(path: &Path, readonly: bool) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let lock_type = if readonly {
            libc::F_RDLCK
        } else {
            libc::F_WRLCK
        };
        let mut request = whole_file_lock(lock_type);
        let rc = unsafe { libc::fcntl(file.as_raw_fd(), libc::F_SETLK, &mut request) };
        if rc == -1 {
            let error = std::io::Error::last_os_error();
            return match error.raw_os_error() {
                Some(libc::EACCES) | Some(libc::EAGAIN) => Err(SysError::Locked {
                    path: path.display().to_string(),
                    pid: holder_pid(&file, lock_type).unwrap_or(-1),
                }),
                _ => Err(SysError::Io(error)),
            };
        }

        tracing::debug!(
            "acquired {} lock on {}",
            if readonly { "shared" } else { "exclusive" },
            path.display()
        );
        Ok(Self {
            file,
            path: path.to_path_buf(),
            exclusive: !readonly,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_exclusive(&self) -> bool {
        self.exclusive
    }
}

impl Drop for StorageLock {
    fn drop(&mut self) {
        let mut request = whole_file_lock(libc::F_UNLCK);
        let rc = unsafe { libc::fcntl(self.file.as_raw_fd(), libc::F_SETLK, &mut request) };
        if rc == -1 {
            tracing::warn!(
                "unlocking {} failed: {}",
                self.path.display(),
                std::io::Error::last_os_error()
            );
        }
    }
}

fn whole_file_lock(lock_type: libc::c_int) -> libc::flock {
    let mut lock = unsafe { MaybeUninit::<libc::flock>::zeroed().assume_init() };
    lock.l_type = lock_type as libc::c_short;
    lock.l_whence = libc::SEEK_SET as libc::c_short;
    lock.l_start = 0;
    lock.l_len = 0;
    lock
}

fn holder_pid(file: &File, lock_type: libc::c_int) -> Option<i32> {
    let mut probe = whole_file_lock(lock_type);
    let rc = unsafe { libc::fcntl(file.as_raw_fd(), libc::F_GETLK, &mut probe) };
    if rc == -1 || probe.l_type == libc::F_UNLCK as libc::c_short {
        None
    } else {
        Some(probe.l_pid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    static COUNTER: AtomicU64 = AtomicU64::new(0);

    struct TempDir {
        path: PathBuf,
    }

    impl TempDir {
        fn new() -> Self {
            let unique = COUNTER.fetch_add(1, Ordering::Relaxed);
            let path = std::env::temp_dir().join(format!(
                "storage-sys-lock-{}-{unique}",
                std::process::id()
            ));
            std::fs::create_dir_all(&path).expect("create temp dir");
            Self { path }
        }
    }

    impl Drop for TempDir {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.path);
        }
    }

    #[test]
    fn creates_lock_file_and_releases_on_drop() {
        let temp = TempDir::new();
        let path = temp.path.join("run/storage.lock");
        {
            let lock = StorageLock::acquire(&path, false).expect("first writer");
            assert!(lock.is_exclusive());
            assert!(path.exists());
        }
        // fcntl locks are per process, so re-acquiring after drop only
        // checks that unlock did not error out.
        let again = StorageLock::acquire(&path, true).expect("reader after release");
        assert!(!again.is_exclusive());
    }

    #[test]
    fn unlocked_file_has_no_holder() {
        let temp = TempDir::new();
        let path = temp.path.join("free.lock");
        let file = std::fs::File::create(&path).expect("create lock file");
        assert_eq!(holder_pid(&file, libc::F_WRLCK), None);
    }
}
