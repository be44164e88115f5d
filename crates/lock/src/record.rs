//! Lock record persistence and owner liveness.

use std::{fs, io, path::Path};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Contents of the coordinator-wide lock file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRecord {
    pub pid: u32,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    pub platform: String,
}

impl LockRecord {
    pub fn current() -> Self {
        Self {
            pid: std::process::id(),
            timestamp: chrono::Utc::now().timestamp_millis(),
            platform: std::env::consts::OS.to_string(),
        }
    }

    /// Whether this record names a live process other than the caller.
    pub fn held_by_other_live_process(&self) -> bool {
        self.pid != std::process::id() && process_alive(self.pid)
    }
}

/// Per-process marker, `switchboard-{pid}.lock`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessMarker {
    pub pid: u32,
    pub timestamp: i64,
}

impl ProcessMarker {
    pub fn current() -> Self {
        Self {
            pid: std::process::id(),
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }
}

/// Read the lock record. Missing or empty files mean "no owner".
pub fn read_record(path: &Path) -> Result<Option<LockRecord>> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(Error::io(path, e)),
    };
    if raw.trim().is_empty() {
        return Ok(None);
    }
    serde_json::from_str(&raw)
        .map(Some)
        .map_err(|source| Error::Record {
            path: path.to_path_buf(),
            source,
        })
}

/// Check whether a process with `pid` exists.
#[cfg(unix)]
pub fn process_alive(pid: u32) -> bool {
    use nix::{errno::Errno, sys::signal::kill, unistd::Pid};

    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    if raw <= 0 {
        return false;
    }
    // Signal 0 probes existence; EPERM means it exists under another user.
    match kill(Pid::from_raw(raw), None) {
        Ok(()) => true,
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

/// Check whether a process with `pid` exists.
#[cfg(not(unix))]
pub fn process_alive(pid: u32) -> bool {
    use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

    let pid = Pid::from_u32(pid);
    let mut sys = System::new();
    sys.refresh_processes_specifics(
        ProcessesToUpdate::Some(&[pid]),
        true,
        ProcessRefreshKind::nothing(),
    );
    sys.process(pid).is_some()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn current_process_is_alive() {
        assert!(process_alive(std::process::id()));
    }

    #[test]
    fn absurd_pid_is_dead() {
        assert!(!process_alive(i32::MAX as u32));
        assert!(!process_alive(u32::MAX));
    }

    #[test]
    fn own_record_is_not_another_process() {
        assert!(!LockRecord::current().held_by_other_live_process());
    }

    #[test]
    fn missing_and_empty_records_have_no_owner() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("switchboard.lock");
        assert_eq!(read_record(&path).unwrap(), None);
        fs::write(&path, "  \n").unwrap();
        assert_eq!(read_record(&path).unwrap(), None);
    }

    #[test]
    fn corrupt_record_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("switchboard.lock");
        fs::write(&path, "{pid:").unwrap();
        assert!(matches!(read_record(&path), Err(Error::Record { .. })));
    }
}
