//! Cross-process lock guaranteeing a single coordinator instance.
//!
//! The process that acquires the lock runs the coordinator; every other
//! process behaves as a plain client of it.

pub mod error;
pub mod file;
pub mod ledger;
pub mod memory;
pub mod record;

use std::{
    path::Path,
    sync::{Arc, Mutex},
};

use {
    async_trait::async_trait,
    serde::{Deserialize, Serialize},
};

pub use {
    error::{Error, Result},
    file::{FileLock, RetryPolicy},
    ledger::ListenerLedger,
    memory::MemoryLock,
    record::{LockRecord, ProcessMarker},
};

#[async_trait]
pub trait CoordinatorLock: Send + Sync {
    /// Try to become the coordinator. `Ok(false)` means another live process
    /// holds the lock.
    async fn acquire(&mut self) -> Result<bool>;
    /// Idempotent; safe to call from several exit paths.
    fn release(&mut self);
    fn is_held_by_live_process(&self) -> bool;
    fn has_lock(&self) -> bool;
    fn ledger(&self) -> &ListenerLedger;
    fn ledger_mut(&mut self) -> &mut ListenerLedger;
    fn status(&self) -> LockStatus;
}

/// A lock shared between the coordinator and the process exit paths.
///
/// A plain mutex so it can be released from a panic hook.
pub type SharedLock = Arc<Mutex<Box<dyn CoordinatorLock>>>;

pub fn shared(lock: Box<dyn CoordinatorLock>) -> SharedLock {
    Arc::new(Mutex::new(lock))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockStatus {
    pub has_lock: bool,
    pub current_pid: u32,
    pub lock_file: String,
    pub process_lock_file: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<LockRecord>,
    pub active_clients: usize,
    pub listeners: Vec<String>,
    pub other_processes: Vec<OtherProcess>,
}

/// A per-process marker found in the lock directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OtherProcess {
    pub file: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl OtherProcess {
    fn read(path: &Path, file: String) -> Self {
        let parsed = std::fs::read_to_string(path)
            .ok()
            .and_then(|raw| serde_json::from_str::<ProcessMarker>(&raw).ok());
        match parsed {
            Some(marker) => Self {
                file,
                pid: Some(marker.pid),
                timestamp: Some(marker.timestamp),
                error: None,
            },
            None => Self {
                file,
                pid: None,
                timestamp: None,
                error: Some("Could not read".into()),
            },
        }
    }
}
