//! `serve` and `status`: running the coordinator and inspecting its lock.

use std::{sync::Arc, time::Duration};

use {
    anyhow::Result,
    clap::{Args, ValueEnum},
    switchboard_channels::{MemoryConnector, PlatformConnector},
    switchboard_config::SwitchboardConfig,
    switchboard_coordinator::{FatalCleanup, acquire, serve},
    switchboard_lock::{CoordinatorLock, FileLock, RetryPolicy},
    tokio_util::sync::CancellationToken,
    tracing::{info, warn},
};

/// How long a panic waits for the coordinator to tear down.
const FATAL_GRACE: Duration = Duration::from_secs(5);

#[derive(Clone, Copy, Debug, Default, ValueEnum)]
pub enum Platform {
    /// In-process platform that accepts any token. For local testing.
    #[default]
    Memory,
}

#[derive(Args, Default)]
pub struct ServeArgs {
    /// Platform backend the coordinator logs in to.
    #[arg(long, value_enum, default_value_t = Platform::Memory)]
    platform: Platform,
}

fn file_lock(config: &SwitchboardConfig) -> FileLock {
    let coordinator = &config.coordinator;
    FileLock::new(&coordinator.lock_dir).with_retry(RetryPolicy {
        retries: coordinator.lock_retries,
        min_backoff: Duration::from_millis(coordinator.lock_min_backoff_ms),
        max_backoff: Duration::from_millis(coordinator.lock_max_backoff_ms),
    })
}

pub async fn handle_serve(config: &SwitchboardConfig, args: ServeArgs) -> Result<()> {
    #[cfg(feature = "metrics")]
    let _metrics = switchboard_metrics::init_metrics(switchboard_metrics::MetricsRecorderConfig {
        enabled: config.metrics.enabled,
        global_labels: Vec::new(),
    })?;

    let Some(lock) = acquire(Box::new(file_lock(config))).await? else {
        match FileLock::new(&config.coordinator.lock_dir).status().owner {
            Some(owner) => eprintln!("A coordinator is already running (pid {}).", owner.pid),
            None => eprintln!("A coordinator is already running."),
        }
        return Ok(());
    };
    let shutdown = CancellationToken::new();
    let (cleanup, stopped) = FatalCleanup::new(Arc::clone(&lock), shutdown.clone(), FATAL_GRACE);
    install_panic_hook(cleanup);

    let connector: Arc<dyn PlatformConnector> = match args.platform {
        Platform::Memory => Arc::new(MemoryConnector::accept_any()),
    };
    tokio::spawn(wait_for_signal(shutdown.clone()));
    info!(
        socket = %config.coordinator.socket_path.display(),
        lock_dir = %config.coordinator.lock_dir.display(),
        "coordinator lock acquired"
    );
    let served = serve(config, connector, lock, shutdown).await;
    drop(stopped);
    served?;
    Ok(())
}

pub fn handle_status(config: &SwitchboardConfig) -> Result<()> {
    let status = FileLock::new(&config.coordinator.lock_dir).status();
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}

/// On a panic, run the coordinator's shutdown and release the lock before
/// exiting with status 1.
fn install_panic_hook(cleanup: FatalCleanup) {
    let previous = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        previous(info);
        cleanup.run();
        std::process::exit(1);
    }));
}

async fn wait_for_signal(shutdown: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = terminate.recv() => {},
                }
            },
            Err(e) => {
                warn!(error = %e, "cannot listen for SIGTERM");
                let _ = tokio::signal::ctrl_c().await;
            },
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
    info!("shutdown signal received");
    shutdown.cancel();
}
