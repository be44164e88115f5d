//! The single-instance event coordinator.
//!
//! One process per host holds the coordinator lock. It keeps one platform
//! client per bot token, routes platform events to the triggers that
//! workflow processes register over the messaging channel, and performs
//! outbound requests on their behalf.

pub mod coordinator;
pub mod debounce;
pub mod disabled;
pub mod error;
pub mod filters;
pub mod pattern;
pub mod pool;
pub mod registry;
pub mod requests;
mod router;
pub mod service;
pub mod support;
mod voice_routing;

pub use {
    coordinator::{Coordinator, CoordinatorSettings},
    disabled::DisabledChannels,
    error::{Error, Result},
    pattern::Pattern,
    pool::token_hint,
    registry::TriggerRegistry,
    service::{FatalCleanup, StoppedGuard, acquire, release_lock, serve},
};
