//! Instance Queue
//!
//! A per-process queue subscribed to pub/sub topics. Every replica of a
//! service gets its own copy of each notification: the queue lives exactly as
//! long as the process, and is unsubscribed and deleted on shutdown.
//!
//! ## Features
//!
//! - **Provisioning**: queue named `<prefix>_srv-<instance>`, tagged with the
//!   prefix and instance id, subscribed to every configured topic
//! - **Batch dispatch**: each received batch is handled concurrently, and the
//!   next receive waits for the whole batch
//! - **Handler deadline**: a handler that overruns is abandoned and its message
//!   redelivered
//! - **Correlation ids**: `x_req_id` attribute propagated through a tracing span
//! - **Prometheus metrics** and K8s-ready health endpoints
//!
//! ## Example
//!
//! ```ignore
//! use instance_queue::{handler_fn, unique_name, AwsBroker, IqConfig, InstanceQueue};
//!
//! let config = IqConfig::from_env()?;
//! let broker = AwsBroker::from_env().await;
//! let mut iq = InstanceQueue::provision(unique_name(), config, broker).await?;
//!
//! iq.start(handler_fn(|ctx, msg| Box::pin(async move {
//!     tracing::info!(req_id = %ctx.req_id(), body = ?msg.body, "notification");
//!     Ok(())
//! })));
//!
//! shutdown_signal().await;
//! iq.stop().await;
//! ```

#[cfg(feature = "aws")]
mod aws;
mod broker;
mod config;
mod context;
mod error;
mod handler;
mod health;
mod message;
pub mod metrics;
mod naming;
mod policy;
mod queue;

// Re-export main types
#[cfg(feature = "aws")]
pub use aws::AwsBroker;
pub use broker::{Broker, QueueSettings, ReceiveRequest, ReceivedMessage};
pub use config::IqConfig;
pub use context::{next_request_id, CorrelationContext, FALLBACK_REQ_ID, REQ_ID_ATTRIBUTE};
pub use error::{BrokerError, IqError, IqResult};
pub use handler::{handler_fn, Handler, HandlerFn};
pub use health::{health_router, HealthState};
pub use message::{Message, MessageAttribute, Notification};
pub use crate::metrics::{init_metrics, MessageStatus};
pub use naming::{instance_id, unique_name, FALLBACK_INSTANCE_ID};
pub use policy::QueuePolicy;
pub use queue::{InstanceQueue, QueueState, Subscription};
