//! Prometheus metrics for instance queue workers

use metrics::{counter, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use std::time::Duration;
use tracing::{info, warn};

static PROMETHEUS_HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

/// Outcome of one message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageStatus {
    /// Handler succeeded and the message was deleted
    Success,
    /// Handler returned an error; left for redelivery
    Failed,
    /// Handler missed its deadline; left for redelivery
    TimedOut,
    /// Handler task panicked; left for redelivery
    Panicked,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Success => "success",
            MessageStatus::Failed => "failed",
            MessageStatus::TimedOut => "timed_out",
            MessageStatus::Panicked => "panicked",
        }
    }
}

/// Install the Prometheus recorder.
///
/// Call once at startup; later calls are no-ops. A recorder installed by
/// someone else is logged and left in place.
pub fn init_metrics() {
    let _ = PROMETHEUS_HANDLE.get_or_try_init(|| {
        PrometheusBuilder::new()
            .install_recorder()
            .map(|handle| {
                info!("Prometheus metrics initialized");
                handle
            })
            .map_err(|e| {
                warn!(error = %e, "Failed to install Prometheus recorder");
                e
            })
    });
}

/// Handle for rendering metrics, if [`init_metrics`] succeeded
pub fn metrics_handle() -> Option<&'static PrometheusHandle> {
    PROMETHEUS_HANDLE.get()
}

pub fn record_received(queue: &str, count: usize) {
    counter!("iq_messages_received_total", "queue" => queue.to_string()).increment(count as u64);
    histogram!("iq_batch_size", "queue" => queue.to_string()).record(count as f64);
}

pub fn record_processed(queue: &str, status: MessageStatus, duration: Duration) {
    counter!(
        "iq_messages_processed_total",
        "queue" => queue.to_string(),
        "status" => status.as_str()
    )
    .increment(1);

    histogram!("iq_handler_duration_seconds", "queue" => queue.to_string())
        .record(duration.as_secs_f64());
}

/// `part` is `envelope` or `body`
pub fn record_parse_error(part: &'static str) {
    counter!("iq_parse_errors_total", "part" => part).increment(1);
}

pub fn record_delete_error(queue: &str) {
    counter!("iq_delete_errors_total", "queue" => queue.to_string()).increment(1);
}

pub fn record_subscribe_error(topic: &str) {
    counter!("iq_subscribe_errors_total", "topic" => topic.to_string()).increment(1);
}
