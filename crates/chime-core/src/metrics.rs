//! Metric names and recorders for the core.
//!
//! These go through the `metrics` facade; nothing is recorded unless the
//! embedding process installs a recorder.

use metrics::{counter, gauge};

/// Metric names.
pub mod names {
    pub const CACHE_LOOKUPS: &str = "chime_credential_cache_lookups_total";
    pub const OCCUPANCY_TRANSITIONS: &str = "chime_occupancy_transitions_total";
    pub const BROADCAST_DELIVERIES: &str = "chime_broadcast_deliveries_total";
    pub const BROADCAST_FAILURES: &str = "chime_broadcast_failures_total";
    pub const DECODE_ERRORS: &str = "chime_decode_errors_total";
    pub const FRAMES_TOTAL: &str = "chime_frames_total";
    pub const FRAME_BYTES: &str = "chime_frame_bytes_total";
    pub const SUBSCRIPTIONS_TOTAL: &str = "chime_subscriptions_total";
    pub const SUBSCRIPTIONS_ACTIVE: &str = "chime_subscriptions_active";
}

/// Describe the core metrics.
pub fn describe() {
    metrics::describe_counter!(
        names::CACHE_LOOKUPS,
        "Credential cache lookups by outcome (hit, miss, error)"
    );
    metrics::describe_counter!(
        names::OCCUPANCY_TRANSITIONS,
        "Channel occupancy transitions (occupied, vacated)"
    );
    metrics::describe_counter!(
        names::BROADCAST_DELIVERIES,
        "Frames queued to subscribers by broadcast"
    );
    metrics::describe_counter!(
        names::BROADCAST_FAILURES,
        "Broadcast deliveries that failed and closed the target connection"
    );
    metrics::describe_counter!(names::DECODE_ERRORS, "Inbound frames discarded as malformed");
    metrics::describe_counter!(
        names::FRAMES_TOTAL,
        "Frames read from or written to connections, by direction"
    );
    metrics::describe_counter!(names::FRAME_BYTES, "Frame payload bytes, by direction");
    metrics::describe_counter!(
        names::SUBSCRIPTIONS_TOTAL,
        "Total number of channel subscriptions"
    );
    metrics::describe_gauge!(
        names::SUBSCRIPTIONS_ACTIVE,
        "Current number of channel subscriptions"
    );
}

pub(crate) fn record_cache_lookup(outcome: &'static str) {
    counter!(names::CACHE_LOOKUPS, "outcome" => outcome).increment(1);
}

pub(crate) fn record_occupancy_transition(kind: &'static str) {
    counter!(names::OCCUPANCY_TRANSITIONS, "kind" => kind).increment(1);
}

pub(crate) fn record_broadcast(delivered: usize, failed: usize) {
    counter!(names::BROADCAST_DELIVERIES).increment(delivered as u64);
    if failed > 0 {
        counter!(names::BROADCAST_FAILURES).increment(failed as u64);
    }
}

pub(crate) fn record_decode_error() {
    counter!(names::DECODE_ERRORS).increment(1);
}

pub(crate) fn record_frame(direction: &'static str, bytes: usize) {
    counter!(names::FRAMES_TOTAL, "direction" => direction).increment(1);
    counter!(names::FRAME_BYTES, "direction" => direction).increment(bytes as u64);
}

pub(crate) fn record_subscription_added() {
    counter!(names::SUBSCRIPTIONS_TOTAL).increment(1);
    gauge!(names::SUBSCRIPTIONS_ACTIVE).increment(1.0);
}

pub(crate) fn record_subscriptions_removed(count: usize) {
    if count > 0 {
        gauge!(names::SUBSCRIPTIONS_ACTIVE).decrement(count as f64);
    }
}
