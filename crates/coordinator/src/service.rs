//! Process-level entry points: become the coordinator or stay a client.

use std::{
    sync::{Arc, Mutex, TryLockError, mpsc as std_mpsc},
    time::Duration,
};

use {
    switchboard_channels::PlatformConnector,
    switchboard_config::SwitchboardConfig,
    switchboard_ipc::IpcServer,
    switchboard_lock::{CoordinatorLock, SharedLock, shared},
    tokio::sync::mpsc,
    tokio_util::sync::CancellationToken,
    tracing::{info, warn},
};

use crate::{
    coordinator::{Coordinator, CoordinatorSettings},
    error::Result,
};

/// Try to take the coordinator lock. `None` means another live process is
/// the coordinator and this one should act as its client.
pub async fn acquire(mut lock: Box<dyn CoordinatorLock>) -> Result<Option<SharedLock>> {
    if lock.acquire().await? {
        Ok(Some(shared(lock)))
    } else {
        info!("another process is the coordinator");
        Ok(None)
    }
}

/// Release the lock from an exit path that may race the coordinator task,
/// such as a panic hook. Never blocks.
pub fn release_lock(lock: &SharedLock) {
    match lock.try_lock() {
        Ok(mut guard) => guard.release(),
        Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner().release(),
        Err(TryLockError::WouldBlock) => warn!("lock busy, leaving release to the owner"),
    }
}

/// Runs the coordinator's shutdown from a panic hook.
///
/// [`FatalCleanup::run`] cancels the coordinator, blocks until its cleanup
/// finishes or `grace` runs out, then releases the lock.
#[derive(Clone)]
pub struct FatalCleanup {
    lock: SharedLock,
    shutdown: CancellationToken,
    stopped: Arc<Mutex<std_mpsc::Receiver<()>>>,
    grace: Duration,
}

/// Dropped once the coordinator has stopped.
pub struct StoppedGuard {
    _tx: std_mpsc::SyncSender<()>,
}

impl FatalCleanup {
    pub fn new(lock: SharedLock, shutdown: CancellationToken, grace: Duration) -> (Self, StoppedGuard) {
        let (tx, rx) = std_mpsc::sync_channel(1);
        let cleanup = Self {
            lock,
            shutdown,
            stopped: Arc::new(Mutex::new(rx)),
            grace,
        };
        (cleanup, StoppedGuard { _tx: tx })
    }

    /// Blocks the calling thread. Returns whether the coordinator finished its
    /// shutdown within the grace period.
    pub fn run(&self) -> bool {
        self.shutdown.cancel();
        let stopped = self.stopped.lock().unwrap_or_else(|e| e.into_inner());
        let finished = !matches!(
            stopped.recv_timeout(self.grace),
            Err(std_mpsc::RecvTimeoutError::Timeout)
        );
        if !finished {
            warn!(grace_ms = self.grace.as_millis() as u64, "coordinator shutdown did not finish in time");
        }
        release_lock(&self.lock);
        finished
    }
}

/// Serve the messaging channel with an already acquired lock until
/// `shutdown` fires. The lock is released on every return path.
pub async fn serve(
    config: &SwitchboardConfig,
    connector: Arc<dyn PlatformConnector>,
    lock: SharedLock,
    shutdown: CancellationToken,
) -> Result<()> {
    let server = match IpcServer::bind(&config.coordinator.socket_path) {
        Ok(server) => server,
        Err(e) => {
            release_lock(&lock);
            return Err(e.into());
        },
    };
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let accept = shutdown.child_token();
    let server_task = tokio::spawn(server.run(events_tx, accept.clone()));

    let coordinator = Coordinator::new(CoordinatorSettings::from(config), connector, lock).await;
    coordinator.run(events_rx, shutdown).await;

    accept.cancel();
    if let Err(e) = server_task.await {
        warn!(error = %e, "messaging channel task failed");
    }
    info!("coordinator stopped");
    Ok(())
}
