//! Metrics for switchboard.
//!
//! Metric names live in this crate so recording sites and dashboards agree.
//! Recording goes through the `metrics` crate facade; with the `prometheus`
//! feature, [`init_metrics`] installs a Prometheus recorder whose output is
//! available from [`MetricsHandle::render`].
//!
//! ```rust,ignore
//! use switchboard_metrics::{counter, coordinator};
//!
//! counter!(coordinator::EMISSIONS_TOTAL, "event" => "messageCreate").increment(1);
//! ```

mod definitions;
pub mod error;
mod recorder;

pub use {
    definitions::*,
    error::{Error, Result},
    recorder::{MetricsHandle, MetricsRecorderConfig, init_metrics},
};

pub use metrics::{counter, gauge, histogram};
