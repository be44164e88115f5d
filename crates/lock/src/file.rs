//! File-backed coordinator lock.
//!
//! Layout inside the lock directory:
//! - `switchboard.lock`: the coordinator-wide record, guarded by an advisory
//!   `flock`/`LockFileEx` lock held for the life of the coordinator.
//! - `switchboard-{pid}.lock`: one liveness marker per coordinator process.

use std::{
    fs::{self, File, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
    time::Duration,
};

use {
    async_trait::async_trait,
    fd_lock::RwLock,
    tracing::{debug, info, warn},
};

use crate::{
    CoordinatorLock, LockStatus, OtherProcess,
    error::{Error, Result},
    ledger::ListenerLedger,
    record::{LockRecord, ProcessMarker, read_record},
};

pub const LOCK_FILE_NAME: &str = "switchboard.lock";
const MARKER_PREFIX: &str = "switchboard-";
const MARKER_SUFFIX: &str = ".lock";

/// Retry policy for the advisory lock call.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub retries: u32,
    pub min_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 3,
            min_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (zero based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.min_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

pub struct FileLock {
    dir: PathBuf,
    lock_file: PathBuf,
    marker_file: PathBuf,
    retry: RetryPolicy,
    held: Option<HeldLock>,
    ledger: ListenerLedger,
}

struct HeldLock {
    _lock: RwLock<File>,
    /// Second handle to the same file, used to clear the record on release.
    record: File,
}

impl FileLock {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        Self {
            lock_file: dir.join(LOCK_FILE_NAME),
            marker_file: dir.join(format!(
                "{MARKER_PREFIX}{}{MARKER_SUFFIX}",
                std::process::id()
            )),
            dir,
            retry: RetryPolicy::default(),
            held: None,
            ledger: ListenerLedger::default(),
        }
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn lock_file(&self) -> &Path {
        &self.lock_file
    }

    fn ensure_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.dir).map_err(|e| Error::io(&self.dir, e))
    }

    fn open_lock_file(&self) -> Result<File> {
        OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.lock_file)
            .map_err(|e| Error::io(&self.lock_file, e))
    }

    /// Try the advisory lock with bounded retries; on success the record is
    /// written through the locked handle.
    async fn lock_with_retries(&self) -> Result<Option<HeldLock>> {
        let file = self.open_lock_file()?;
        let record = file
            .try_clone()
            .map_err(|e| Error::io(&self.lock_file, e))?;
        let mut lock = RwLock::new(file);
        for attempt in 0..=self.retry.retries {
            if try_write_record(&mut lock, &self.lock_file, &LockRecord::current())? {
                return Ok(Some(HeldLock {
                    _lock: lock,
                    record,
                }));
            }
            if attempt < self.retry.retries {
                let delay = self.retry.backoff(attempt);
                debug!(attempt, ?delay, "lock contended, backing off");
                tokio::time::sleep(delay).await;
            }
        }
        Ok(None)
    }

    fn write_marker(&self) -> Result<()> {
        let json = serde_json::to_vec(&ProcessMarker::current()).map_err(|source| {
            Error::Record {
                path: self.marker_file.clone(),
                source,
            }
        })?;
        fs::write(&self.marker_file, json).map_err(|e| Error::io(&self.marker_file, e))
    }

    fn other_processes(&self) -> Vec<OtherProcess> {
        let Ok(entries) = fs::read_dir(&self.dir) else {
            return Vec::new();
        };
        let mut others: Vec<OtherProcess> = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let name = entry.file_name().to_string_lossy().into_owned();
                let is_marker = name.starts_with(MARKER_PREFIX) && name.ends_with(MARKER_SUFFIX);
                is_marker.then(|| OtherProcess::read(&entry.path(), name))
            })
            .collect();
        others.sort_by(|a, b| a.file.cmp(&b.file));
        others
    }
}

/// Returns `Ok(false)` when another handle holds the lock.
fn try_write_record(lock: &mut RwLock<File>, path: &Path, record: &LockRecord) -> Result<bool> {
    let mut guard = match lock.try_write() {
        Ok(guard) => guard,
        Err(e) => {
            debug!(error = %e, "advisory lock unavailable");
            return Ok(false);
        },
    };
    let json = serde_json::to_vec(record).map_err(|source| Error::Record {
        path: path.to_path_buf(),
        source,
    })?;
    let file: &mut File = &mut guard;
    file.set_len(0)
        .and_then(|()| file.write_all(&json))
        .and_then(|()| file.sync_all())
        .map_err(|e| Error::io(path, e))?;
    // The OS lock now lives as long as the file handle inside `lock`.
    std::mem::forget(guard);
    Ok(true)
}

#[async_trait]
impl CoordinatorLock for FileLock {
    async fn acquire(&mut self) -> Result<bool> {
        if self.held.is_some() {
            return Ok(true);
        }
        self.ensure_dir()?;

        match read_record(&self.lock_file) {
            Ok(Some(record)) if record.held_by_other_live_process() => {
                info!(pid = record.pid, "coordinator already running in another process");
                return Ok(false);
            },
            Ok(Some(record)) if record.pid != std::process::id() => {
                info!(pid = record.pid, "reclaiming stale lock from dead process");
                #[cfg(feature = "metrics")]
                switchboard_metrics::counter!(switchboard_metrics::lock::STALE_RECLAIMED_TOTAL)
                    .increment(1);
            },
            Ok(_) => {},
            Err(e) => warn!(error = %e, "unreadable lock record, treating as unowned"),
        }

        let Some(held) = self.lock_with_retries().await? else {
            info!("coordinator lock is held by another process");
            return Ok(false);
        };
        self.held = Some(held);

        if let Err(e) = self.write_marker() {
            warn!(error = %e, "failed to write process marker");
        }
        info!(pid = std::process::id(), path = %self.lock_file.display(), "coordinator lock acquired");
        Ok(true)
    }

    fn release(&mut self) {
        if let Some(held) = self.held.take() {
            if let Err(e) = held.record.set_len(0) {
                warn!(error = %e, "failed to clear lock record");
            }
            drop(held);
            info!(pid = std::process::id(), "coordinator lock released");
        }
        match fs::remove_file(&self.marker_file) {
            Ok(()) => {},
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {},
            Err(e) => warn!(error = %e, "failed to remove process marker"),
        }
    }

    fn is_held_by_live_process(&self) -> bool {
        if self.held.is_some() {
            return true;
        }
        matches!(read_record(&self.lock_file), Ok(Some(record)) if crate::record::process_alive(record.pid))
    }

    fn has_lock(&self) -> bool {
        self.held.is_some()
    }

    fn ledger(&self) -> &ListenerLedger {
        &self.ledger
    }

    fn ledger_mut(&mut self) -> &mut ListenerLedger {
        &mut self.ledger
    }

    fn status(&self) -> LockStatus {
        LockStatus {
            has_lock: self.has_lock(),
            current_pid: std::process::id(),
            lock_file: self.lock_file.display().to_string(),
            process_lock_file: self.marker_file.display().to_string(),
            owner: read_record(&self.lock_file).ok().flatten(),
            active_clients: self.ledger.active_clients(),
            listeners: self.ledger.listener_keys(),
            other_processes: self.other_processes(),
        }
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        self.release();
    }
}
