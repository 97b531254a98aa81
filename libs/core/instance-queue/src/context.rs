//! Per-message correlation context
//!
//! Ties together the log lines of one message's receive, dispatch, handle and
//! delete steps, and carries the handler deadline.

use std::time::Duration;
use tokio::time::Instant;
use tracing::Span;
use uuid::Uuid;

/// Message attribute carrying the publisher's correlation id.
pub const REQ_ID_ATTRIBUTE: &str = "x_req_id";

/// Correlation id used when a message carries none.
pub const FALLBACK_REQ_ID: &str = "00000000000000000000000000000000";

/// Mint a fresh correlation id for a publisher to attach as [`REQ_ID_ATTRIBUTE`].
pub fn next_request_id() -> String {
    Uuid::new_v4().to_string()
}

/// Execution context of one message's handler invocation
#[derive(Debug, Clone)]
pub struct CorrelationContext {
    req_id: String,
    message_id: String,
    deadline: Instant,
}

impl CorrelationContext {
    pub fn new(
        req_id: impl Into<String>,
        message_id: impl Into<String>,
        deadline: Instant,
    ) -> Self {
        Self {
            req_id: req_id.into(),
            message_id: message_id.into(),
            deadline,
        }
    }

    pub fn req_id(&self) -> &str {
        &self.req_id
    }

    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    /// Instant after which the handler is abandoned
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Time left before the deadline; zero once expired
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.deadline
    }

    /// Span carrying `req_id` and `message_id` for every log line of this message
    pub fn span(&self) -> Span {
        tracing::info_span!("iq_message", req_id = %self.req_id, message_id = %self.message_id)
    }
}
