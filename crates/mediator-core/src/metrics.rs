//! Metrics instrumentation for the mediator.
//!
//! Uses the `metrics` facade. Nothing is recorded anywhere until the host
//! application installs a recorder.

use metrics::{counter, gauge};
use tracing::info;

/// Metric names.
pub mod names {
    pub const PUBLISH_TOTAL: &str = "mediator_publish_total";
    pub const DELIVERIES_TOTAL: &str = "mediator_deliveries_total";
    pub const CALLBACK_FAILURES_TOTAL: &str = "mediator_callback_failures_total";
    pub const SUBSCRIPTIONS_TOTAL: &str = "mediator_subscriptions_total";
    pub const CHANNELS: &str = "mediator_channels";
}

/// Register metric descriptions with the installed recorder.
pub fn init_metrics() {
    metrics::describe_counter!(names::PUBLISH_TOTAL, "Total number of publish calls");
    metrics::describe_counter!(
        names::DELIVERIES_TOTAL,
        "Total number of successful callback invocations"
    );
    metrics::describe_counter!(
        names::CALLBACK_FAILURES_TOTAL,
        "Total number of subscriber callbacks that returned an error"
    );
    metrics::describe_counter!(
        names::SUBSCRIPTIONS_TOTAL,
        "Total number of subscriptions made through a mediator"
    );
    metrics::describe_gauge!(names::CHANNELS, "Current number of non-root channels");

    info!("Metrics initialized");
}

/// Record a publish call.
pub fn record_publish() {
    counter!(names::PUBLISH_TOTAL).increment(1);
}

/// Record successful deliveries.
pub fn record_deliveries(count: usize) {
    counter!(names::DELIVERIES_TOTAL).increment(count as u64);
}

/// Record a failed callback.
pub fn record_callback_failure() {
    counter!(names::CALLBACK_FAILURES_TOTAL).increment(1);
}

/// Record a subscription.
pub fn record_subscription() {
    counter!(names::SUBSCRIPTIONS_TOTAL).increment(1);
}

/// Record a newly created channel.
pub fn record_channel_created() {
    gauge!(names::CHANNELS).increment(1.0);
}

/// Record channels discarded when a child channel is replaced.
pub fn record_channels_dropped(count: usize) {
    if count > 0 {
        gauge!(names::CHANNELS).decrement(count as f64);
    }
}
