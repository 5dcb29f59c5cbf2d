//! Single-instance guard: an advisory `flock` on the PID file.
//!
//! The lock, not the file content, is the source of truth for liveness.
//! The PID written inside is advisory, used by `ykmon stop`/`status` and by
//! takeover to signal the incumbent. A leftover file from a crashed process
//! holds no lock, so a new daemon acquires it without manual cleanup.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use nix::fcntl::{Flock, FlockArg};
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;

use crate::core::errors::{Result, YkmError};

/// Held for the daemon's lifetime; releases the lock and removes the file
/// on drop.
#[derive(Debug)]
pub struct PidLock {
    lock: Flock<File>,
    path: PathBuf,
}

impl PidLock {
    /// Try to become the single running instance.
    ///
    /// Takes an exclusive non-blocking `flock` on the PID file and writes
    /// our PID into it. If another process holds the lock, returns
    /// `AlreadyRunning` with the incumbent's PID when readable.
    pub fn acquire(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| YkmError::io(parent, source))?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|source| YkmError::io(path, source))?;

        let mut lock = match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
            Ok(lock) => lock,
            Err((_file, _errno)) => {
                return Err(YkmError::AlreadyRunning {
                    pid: read_pid(path),
                    path: path.to_path_buf(),
                });
            }
        };

        lock.set_len(0).map_err(|source| YkmError::io(path, source))?;
        lock.seek(SeekFrom::Start(0))
            .map_err(|source| YkmError::io(path, source))?;
        writeln!(lock, "{}", std::process::id())
            .map_err(|source| YkmError::io(path, source))?;
        lock.flush().map_err(|source| YkmError::io(path, source))?;

        Ok(Self {
            lock,
            path: path.to_path_buf(),
        })
    }

    /// The PID file path guarded by this lock.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PidLock {
    fn drop(&mut self) {
        // Unlink before the flock is released; a racing starter then
        // re-creates the file rather than locking a deleted inode.
        let _ = std::fs::remove_file(&self.path);
        let _ = self.lock.flush();
    }
}

/// Read the advisory PID from a PID file. Missing, empty, or corrupt
/// content yields `None` and never an error.
#[must_use]
pub fn read_pid(path: &Path) -> Option<i32> {
    let mut raw = String::new();
    File::open(path).ok()?.read_to_string(&mut raw).ok()?;
    let pid = raw.trim().parse::<i32>().ok()?;
    (pid > 0).then_some(pid)
}

/// Whether a process with this PID exists (signal 0 probe).
#[must_use]
pub fn is_alive(pid: i32) -> bool {
    kill(Pid::from_raw(pid), None).is_ok()
}

/// Evict a running instance: SIGTERM, wait up to `grace`, then SIGKILL.
///
/// A missing or corrupt PID file means no incumbent; the stale file is
/// removed and takeover succeeds. Returns the evicted PID, if any.
pub fn takeover(path: &Path, grace: Duration) -> Result<Option<i32>> {
    let Some(pid) = read_pid(path) else {
        let _ = std::fs::remove_file(path);
        return Ok(None);
    };

    if !is_alive(pid) {
        let _ = std::fs::remove_file(path);
        return Ok(None);
    }

    let target = Pid::from_raw(pid);
    kill(target, Signal::SIGTERM).map_err(|errno| YkmError::PidFile {
        path: path.to_path_buf(),
        details: format!("SIGTERM to pid {pid} failed: {errno}"),
    })?;

    let deadline = Instant::now() + grace;
    while Instant::now() < deadline {
        if !is_alive(pid) {
            let _ = std::fs::remove_file(path);
            return Ok(Some(pid));
        }
        std::thread::sleep(Duration::from_millis(100));
    }

    // Incumbent ignored SIGTERM within the grace window.
    let _ = kill(target, Signal::SIGKILL);
    std::thread::sleep(Duration::from_millis(100));
    let _ = std::fs::remove_file(path);
    Ok(Some(pid))
}
