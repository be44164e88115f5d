/// Failures installing the process-wide metrics recorder.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// `init_metrics` already installed a recorder in this process.
    #[error("metrics recorder already installed")]
    AlreadyInstalled,

    #[cfg(feature = "prometheus")]
    #[error("failed to build prometheus recorder: {0}")]
    Prometheus(#[from] metrics_exporter_prometheus::BuildError),
}

pub type Result<T> = std::result::Result<T, Error>;
