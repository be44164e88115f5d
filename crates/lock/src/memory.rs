//! In-process lock used by tests and embedded coordinators.

use std::sync::{
    Arc, Mutex,
    atomic::{AtomicU32, Ordering},
};

use async_trait::async_trait;

use crate::{CoordinatorLock, LockStatus, error::Result, ledger::ListenerLedger};

static NEXT_HOLDER: AtomicU32 = AtomicU32::new(1);

/// A lock whose "lock file" is a shared slot in memory.
///
/// Handles created with [`MemoryLock::sharing`] contend for the same slot,
/// which lets tests model a second coordinator process.
pub struct MemoryLock {
    slot: Arc<Mutex<Option<u32>>>,
    holder: u32,
    ledger: ListenerLedger,
}

impl MemoryLock {
    pub fn new() -> Self {
        Self {
            slot: Arc::new(Mutex::new(None)),
            holder: NEXT_HOLDER.fetch_add(1, Ordering::Relaxed),
            ledger: ListenerLedger::default(),
        }
    }

    /// A new handle contending for the same slot as `other`.
    pub fn sharing(other: &Self) -> Self {
        Self {
            slot: Arc::clone(&other.slot),
            holder: NEXT_HOLDER.fetch_add(1, Ordering::Relaxed),
            ledger: ListenerLedger::default(),
        }
    }

    fn owner(&self) -> Option<u32> {
        self.slot.lock().map(|slot| *slot).unwrap_or_else(|e| *e.into_inner())
    }
}

impl Default for MemoryLock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CoordinatorLock for MemoryLock {
    async fn acquire(&mut self) -> Result<bool> {
        let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        match *slot {
            Some(owner) if owner != self.holder => Ok(false),
            _ => {
                *slot = Some(self.holder);
                Ok(true)
            },
        }
    }

    fn release(&mut self) {
        let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        if *slot == Some(self.holder) {
            *slot = None;
        }
    }

    fn is_held_by_live_process(&self) -> bool {
        self.owner().is_some()
    }

    fn has_lock(&self) -> bool {
        self.owner() == Some(self.holder)
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
            lock_file: "memory".into(),
            process_lock_file: format!("memory-{}", self.holder),
            owner: None,
            active_clients: self.ledger.active_clients(),
            listeners: self.ledger.listener_keys(),
            other_processes: Vec::new(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn shared_slot_is_exclusive() {
        let mut a = MemoryLock::new();
        let mut b = MemoryLock::sharing(&a);

        assert!(a.acquire().await.unwrap());
        assert!(a.acquire().await.unwrap());
        assert!(!b.acquire().await.unwrap());
        assert!(b.is_held_by_live_process());

        b.release();
        assert!(a.has_lock());

        a.release();
        assert!(!a.is_held_by_live_process());
        assert!(b.acquire().await.unwrap());
    }
}
