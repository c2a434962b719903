//! Per-stage log tree and scoped standard-stream redirection.
//!
//! Each stage's output (the driver's own tracing lines included, since
//! they go to standard error) lands in
//! `log-<basename>/<timestamp_str>/<stage>[-internal]`, with
//! `log-<basename>/current` pointing at the newest timestamp directory.
//! Redirection swaps the process's fd 1 and 2 and restores them on drop,
//! so the streams come back on every exit path of a stage.

use crate::config::Config;
use crate::error::{Result, StagehandError};
use std::fs::OpenOptions;
use std::io::Write;
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};

/// Create (and re-point `current` at) this invocation's log directory.
pub(crate) fn stage_log_dir(cx: &Config) -> Result<PathBuf> {
    let base = cx.workdir().join(format!("log-{}", cx.basename()));
    let dir = base.join(cx.timestamp_str());
    std::fs::create_dir_all(&dir).map_err(|e| StagehandError::io(&dir, e))?;

    let current = base.join("current");
    if std::fs::symlink_metadata(&current).is_ok() {
        std::fs::remove_file(&current).map_err(|e| StagehandError::io(&current, e))?;
    }
    std::os::unix::fs::symlink(cx.timestamp_str(), &current)
        .map_err(|e| StagehandError::io(&current, e))?;

    Ok(dir)
}

/// Redirects standard output and error into a file until dropped.
pub(crate) struct RedirectGuard {
    saved_stdout: libc::c_int,
    saved_stderr: libc::c_int,
}

impl RedirectGuard {
    pub(crate) fn to_file(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| StagehandError::io(path, e))?;

        // Flush userspace buffers before the descriptors change owners.
        let _ = std::io::stdout().flush();
        let _ = std::io::stderr().flush();

        let fd = file.as_raw_fd();
        let saved_stdout = dup(path, libc::STDOUT_FILENO)?;
        let saved_stderr = dup(path, libc::STDERR_FILENO)?;
        dup2(path, fd, libc::STDOUT_FILENO)?;
        dup2(path, fd, libc::STDERR_FILENO)?;

        Ok(Self { saved_stdout, saved_stderr })
    }
}

impl Drop for RedirectGuard {
    fn drop(&mut self) {
        let _ = std::io::stdout().flush();
        let _ = std::io::stderr().flush();
        unsafe {
            libc::dup2(self.saved_stdout, libc::STDOUT_FILENO);
            libc::dup2(self.saved_stderr, libc::STDERR_FILENO);
            libc::close(self.saved_stdout);
            libc::close(self.saved_stderr);
        }
    }
}

/// Tests that swap fd 1/2 must not overlap; the harness runs them on
/// separate threads of one process.
#[cfg(test)]
pub(crate) fn stdio_test_lock() -> std::sync::MutexGuard<'static, ()> {
    static LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());
    LOCK.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

fn dup(path: &Path, fd: libc::c_int) -> Result<libc::c_int> {
    let duped = unsafe { libc::dup(fd) };
    if duped < 0 {
        return Err(StagehandError::io(path, std::io::Error::last_os_error()));
    }
    Ok(duped)
}

fn dup2(path: &Path, from: libc::c_int, to: libc::c_int) -> Result<()> {
    if unsafe { libc::dup2(from, to) } < 0 {
        return Err(StagehandError::io(path, std::io::Error::last_os_error()));
    }
    Ok(())
}
