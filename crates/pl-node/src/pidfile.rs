//! PID file utilities for single-instance management
//!
//! Lets the CLI find (and stop) a daemon started in the background, and
//! prevents two daemons from racing for the same control port.

use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use pl_core::config;

/// Default PID file name
const PID_FILE_NAME: &str = "node.pid";

/// Get the default PID file path
pub fn default_pid_path() -> PathBuf {
    config::default_config_dir().join(PID_FILE_NAME)
}

/// Read the PID from the PID file
///
/// Returns `Ok(Some(pid))` if the file exists and contains a valid PID,
/// `Ok(None)` if the file doesn't exist, or an error if the file is malformed.
pub fn read_pid_file(path: &Path) -> io::Result<Option<u32>> {
    match fs::File::open(path) {
        Ok(mut file) => {
            let mut contents = String::new();
            file.read_to_string(&mut contents)?;
            let pid = contents
                .trim()
                .parse::<u32>()
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            Ok(Some(pid))
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

/// Write the current process PID to the PID file
///
/// Creates parent directories if they don't exist.
pub fn write_pid_file(path: &Path, pid: u32) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut file = fs::File::create(path)?;
    writeln!(file, "{}", pid)?;
    Ok(())
}

/// Remove the PID file
///
/// Returns `Ok(())` even if the file doesn't exist.
pub fn remove_pid_file(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Check if a process with the given PID is still alive
#[cfg(unix)]
pub fn is_process_alive(pid: u32) -> bool {
    // kill(pid, 0) probes for existence; EPERM still means the process
    // exists, we just may not signal it.
    unsafe {
        let result = libc::kill(pid as libc::pid_t, 0);
        if result == 0 {
            return true;
        }
        let err = std::io::Error::last_os_error();
        err.raw_os_error() == Some(libc::EPERM)
    }
}

#[cfg(windows)]
pub fn is_process_alive(pid: u32) -> bool {
    use std::ptr;
    use windows_sys::Win32::Foundation::{CloseHandle, INVALID_HANDLE_VALUE};
    use windows_sys::Win32::System::Threading::{OpenProcess, PROCESS_QUERY_LIMITED_INFORMATION};

    unsafe {
        let handle = OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, 0, pid);
        if handle == INVALID_HANDLE_VALUE || handle == ptr::null_mut() {
            return false;
        }
        CloseHandle(handle);
        true
    }
}

/// Guard that removes the PID file when dropped
pub struct PidFileGuard {
    path: PathBuf,
}

impl PidFileGuard {
    /// Create a new guard and write the PID file
    pub fn new(path: PathBuf, pid: u32) -> io::Result<Self> {
        write_pid_file(&path, pid)?;
        Ok(Self { path })
    }
}

impl Drop for PidFileGuard {
    fn drop(&mut self) {
        if let Err(e) = remove_pid_file(&self.path) {
            tracing::warn!("Failed to remove PID file {:?}: {}", self.path, e);
        }
    }
}
