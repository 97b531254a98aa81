//! Handler contract
//!
//! Implement [`Handler`] to process notifications, or wrap a closure with
//! [`handler_fn`].
//!
//! # Example
//!
//! ```rust,ignore
//! use instance_queue::{CorrelationContext, Handler, Message};
//!
//! struct InvoiceHandler {
//!     service: Arc<InvoiceService>,
//! }
//!
//! #[async_trait]
//! impl Handler for InvoiceHandler {
//!     async fn handle_message(&self, ctx: &CorrelationContext, msg: &Message) -> eyre::Result<()> {
//!         let invoice_id = msg.body_field("invoice_id").ok_or_else(|| eyre!("no invoice_id"))?;
//!         self.service.sync(invoice_id, ctx.req_id()).await?;
//!         Ok(())
//!     }
//!
//!     fn name(&self) -> &'static str {
//!         "InvoiceHandler"
//!     }
//! }
//! ```

use crate::context::CorrelationContext;
use crate::message::Message;
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::sync::Arc;

/// Processes one message.
///
/// Returning `Ok` acknowledges (deletes) the message. Returning `Err`, or not
/// finishing before [`CorrelationContext::deadline`], leaves it on the queue
/// to be redelivered once its visibility timeout elapses.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle_message(&self, ctx: &CorrelationContext, msg: &Message) -> eyre::Result<()>;

    /// Handler name for logging
    fn name(&self) -> &'static str {
        "handler"
    }
}

#[async_trait]
impl<H: Handler + ?Sized> Handler for Arc<H> {
    async fn handle_message(&self, ctx: &CorrelationContext, msg: &Message) -> eyre::Result<()> {
        (**self).handle_message(ctx, msg).await
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }
}

/// Closure-backed [`Handler`], built with [`handler_fn`]
pub struct HandlerFn<F> {
    f: F,
}

/// Wrap a closure as a [`Handler`].
///
/// ```rust,ignore
/// let handler = handler_fn(|ctx, msg| {
///     Box::pin(async move {
///         tracing::info!(req_id = %ctx.req_id(), id = %msg.id, "got message");
///         Ok(())
///     })
/// });
/// ```
pub fn handler_fn<F>(f: F) -> HandlerFn<F>
where
    F: for<'a> Fn(&'a CorrelationContext, &'a Message) -> BoxFuture<'a, eyre::Result<()>>
        + Send
        + Sync,
{
    HandlerFn { f }
}

#[async_trait]
impl<F> Handler for HandlerFn<F>
where
    F: for<'a> Fn(&'a CorrelationContext, &'a Message) -> BoxFuture<'a, eyre::Result<()>>
        + Send
        + Sync,
{
    async fn handle_message(&self, ctx: &CorrelationContext, msg: &Message) -> eyre::Result<()> {
        (self.f)(ctx, msg).await
    }

    fn name(&self) -> &'static str {
        "handler_fn"
    }
}
