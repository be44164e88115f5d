//! Metrics recorder initialization.

use std::sync::atomic::{AtomicBool, Ordering};

use {
    crate::error::{Error, Result},
    tracing::info,
};

static INSTALLED: AtomicBool = AtomicBool::new(false);

/// Handle to the installed recorder.
#[derive(Clone, Default)]
pub struct MetricsHandle {
    #[cfg(feature = "prometheus")]
    prometheus_handle: Option<metrics_exporter_prometheus::PrometheusHandle>,
}

impl MetricsHandle {
    /// Render metrics in Prometheus text format.
    ///
    /// Empty when metrics are disabled or the exporter is not compiled in.
    #[must_use]
    pub fn render(&self) -> String {
        #[cfg(feature = "prometheus")]
        {
            self.prometheus_handle
                .as_ref()
                .map(|h| h.render())
                .unwrap_or_default()
        }
        #[cfg(not(feature = "prometheus"))]
        {
            String::new()
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MetricsRecorderConfig {
    pub enabled: bool,
    /// Labels added to every metric.
    pub global_labels: Vec<(String, String)>,
}

/// Initialize the metrics system. Call once at startup; a second enabled
/// call fails with [`Error::AlreadyInstalled`].
///
/// When disabled, no recorder is installed and the facade macros are no-ops.
pub fn init_metrics(config: MetricsRecorderConfig) -> Result<MetricsHandle> {
    if !config.enabled {
        info!("metrics collection is disabled");
        return Ok(MetricsHandle::default());
    }
    if INSTALLED.swap(true, Ordering::SeqCst) {
        return Err(Error::AlreadyInstalled);
    }

    #[cfg(feature = "prometheus")]
    {
        let mut builder = metrics_exporter_prometheus::PrometheusBuilder::new();
        for (key, value) in config.global_labels {
            builder = builder.add_global_label(key, value);
        }
        let handle = builder.install_recorder()?;
        info!("prometheus metrics recorder installed");
        Ok(MetricsHandle {
            prometheus_handle: Some(handle),
        })
    }

    #[cfg(not(feature = "prometheus"))]
    {
        info!("metrics enabled but the prometheus feature is not compiled in");
        Ok(MetricsHandle::default())
    }
}
