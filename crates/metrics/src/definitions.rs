//! Metric name and label definitions.

/// Event routing metrics
pub mod coordinator {
    /// Platform events received by the router
    pub const EVENTS_ROUTED_TOTAL: &str = "switchboard_events_routed_total";
    /// Payloads pushed to clients
    pub const EMISSIONS_TOTAL: &str = "switchboard_emissions_total";
    /// Triggers skipped by a filter, labelled with the reason
    pub const SKIPS_TOTAL: &str = "switchboard_trigger_skips_total";
    /// Pending emissions pushed back by an active cooldown
    pub const DEBOUNCE_RESCHEDULES_TOTAL: &str = "switchboard_debounce_reschedules_total";
    /// Pending emissions dropped after too many reschedules
    pub const DEBOUNCE_DROPPED_TOTAL: &str = "switchboard_debounce_dropped_total";
    /// Registered triggers
    pub const TRIGGERS_ACTIVE: &str = "switchboard_triggers_active";
    /// Logged-in platform clients
    pub const PLATFORM_CLIENTS_ACTIVE: &str = "switchboard_platform_clients_active";
    /// Failed platform logins
    pub const LOGIN_FAILURES_TOTAL: &str = "switchboard_login_failures_total";
}

/// Messaging channel metrics
pub mod ipc {
    /// Connected client processes
    pub const CONNECTIONS_ACTIVE: &str = "switchboard_ipc_connections_active";
    /// Frames received from clients
    pub const FRAMES_RECEIVED_TOTAL: &str = "switchboard_ipc_frames_received_total";
    /// Frames that failed to decode
    pub const MALFORMED_FRAMES_TOTAL: &str = "switchboard_ipc_malformed_frames_total";
}

/// Voice session metrics
pub mod voice {
    /// Open voice sessions
    pub const SESSIONS_ACTIVE: &str = "switchboard_voice_sessions_active";
    /// Recordings delivered to clients
    pub const RECORDINGS_TOTAL: &str = "switchboard_voice_recordings_total";
    /// Captures discarded for being shorter than the minimum
    pub const RECORDINGS_DISCARDED_TOTAL: &str = "switchboard_voice_recordings_discarded_total";
}

/// Lock manager metrics
pub mod lock {
    /// Lock acquisitions that had to reclaim a stale record
    pub const STALE_RECLAIMED_TOTAL: &str = "switchboard_lock_stale_reclaimed_total";
}

/// Common label keys
pub mod labels {
    pub const EVENT: &str = "event";
    pub const REASON: &str = "reason";
    pub const MODE: &str = "mode";
}
