//! The instance queue: a per-process queue subscribed to pub/sub topics.
//!
//! Lifecycle (one-directional, no restart):
//!
//! ```text
//! provision() ──► Provisioned ──start()──► Running ──stop()──► Stopping ──► Stopped
//!                                             │
//!                                             └── fatal receive error ──► Failed
//! ```
//!
//! The poll loop receives a batch, dispatches every message of the batch to
//! its own task, and waits for the whole batch before receiving again. So at
//! most one batch is in flight, and shutdown is only observed between batches.

use crate::broker::{Broker, QueueSettings, ReceiveRequest, ReceivedMessage};
use crate::config::IqConfig;
use crate::context::CorrelationContext;
use crate::error::IqResult;
use crate::handler::Handler;
use crate::message::Message;
use crate::metrics::{self, MessageStatus};
use crate::naming::instance_id;
use crate::policy::QueuePolicy;
use futures::FutureExt;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;
use tracing::{debug, error, info, warn, Instrument, Span};

/// Lifecycle state of an [`InstanceQueue`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueState {
    /// Queue created and subscribed; not polling yet
    Provisioned,
    /// Poll loop active
    Running,
    /// Shutdown requested; waiting for the poll loop to exit
    Stopping,
    /// Poll loop exited and broker resources released
    Stopped,
    /// Poll loop terminated on an unrecoverable receive error
    Failed,
}

/// A topic subscription created during provisioning
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub topic_arn: String,
    pub subscription_arn: String,
}

/// Per-process queue worker.
///
/// Created by [`InstanceQueue::provision`], started with
/// [`InstanceQueue::start`], and torn down with [`InstanceQueue::stop`], which
/// unsubscribes every topic and deletes the queue.
pub struct InstanceQueue<B: Broker + 'static> {
    name: String,
    queue_name: String,
    queue_url: String,
    queue_arn: String,
    subscriptions: Vec<Subscription>,
    config: Arc<IqConfig>,
    broker: Arc<B>,
    shutdown_tx: watch::Sender<bool>,
    state_tx: Arc<watch::Sender<QueueState>>,
    worker: Option<JoinHandle<IqResult<()>>>,
    span: Span,
}

impl<B: Broker + 'static> InstanceQueue<B> {
    /// Create the instance queue and subscribe it to every configured topic.
    ///
    /// Fails only if the queue cannot be created or its ARN cannot be read;
    /// a topic that cannot be subscribed is logged and skipped, and a policy
    /// that cannot be installed is logged.
    pub async fn provision(
        instance_name: impl Into<String>,
        config: IqConfig,
        broker: B,
    ) -> IqResult<Self> {
        config.validate()?;

        let name = instance_name.into();
        let queue_name = config.queue_name(&name);
        let span = tracing::info_span!("instance_queue", worker = %name);

        let (queue_url, queue_arn, subscriptions) =
            Self::create_resources(&name, &queue_name, &config, &broker)
                .instrument(span.clone())
                .await?;

        let (shutdown_tx, _) = watch::channel(false);
        let (state_tx, _) = watch::channel(QueueState::Provisioned);

        Ok(Self {
            name,
            queue_name,
            queue_url,
            queue_arn,
            subscriptions,
            config: Arc::new(config),
            broker: Arc::new(broker),
            shutdown_tx,
            state_tx: Arc::new(state_tx),
            worker: None,
            span,
        })
    }

    async fn create_resources(
        name: &str,
        queue_name: &str,
        config: &IqConfig,
        broker: &B,
    ) -> IqResult<(String, String, Vec<Subscription>)> {
        let settings = QueueSettings {
            delay_seconds: config.delivery_delay,
            visibility_timeout: config.visibility_timeout,
            message_retention_period: config.message_retention_period,
        };
        let tags = HashMap::from([
            ("Prefix".to_string(), config.prefix.clone()),
            ("InstanceID".to_string(), instance_id(name).to_string()),
        ]);

        let queue_url = broker.create_queue(queue_name, settings, tags).await?;
        info!(queue = %queue_name, queue_url = %queue_url, "Instance queue created");

        let queue_arn = match broker.queue_arn(&queue_url).await {
            Ok(arn) => arn,
            Err(e) => {
                // Nothing else references the queue yet; don't leave it behind.
                if let Err(cleanup_err) = broker.delete_queue(&queue_url).await {
                    error!(
                        queue_url = %queue_url,
                        error = %cleanup_err,
                        "Failed to delete queue after ARN lookup failure"
                    );
                }
                return Err(e.into());
            }
        };

        debug!(queue_arn = %queue_arn, topics = ?config.topic_arns, "Subscribing queue to topics");

        let mut subscriptions = Vec::with_capacity(config.topic_arns.len());
        for topic_arn in &config.topic_arns {
            match broker.subscribe(topic_arn, &queue_arn).await {
                Ok(subscription_arn) => {
                    debug!(
                        topic = %topic_arn,
                        subscription = %subscription_arn,
                        "Subscribed to topic"
                    );
                    subscriptions.push(Subscription {
                        topic_arn: topic_arn.clone(),
                        subscription_arn,
                    });
                }
                Err(e) => {
                    metrics::record_subscribe_error(topic_arn);
                    error!(
                        topic = %topic_arn,
                        queue_arn = %queue_arn,
                        error = %e,
                        "Failed to subscribe to topic, skipping"
                    );
                }
            }
        }

        Self::install_policy(broker, &queue_url, &queue_arn, &subscriptions).await;

        info!(
            queue = %queue_name,
            subscribed = subscriptions.len(),
            configured = config.topic_arns.len(),
            "Instance queue provisioned"
        );

        Ok((queue_url, queue_arn, subscriptions))
    }

    async fn install_policy(
        broker: &B,
        queue_url: &str,
        queue_arn: &str,
        subscriptions: &[Subscription],
    ) {
        let policy =
            QueuePolicy::for_topics(queue_arn, subscriptions.iter().map(|s| s.topic_arn.as_str()));
        if policy.is_empty() {
            warn!(queue_arn = %queue_arn, "No topic subscribed, skipping queue policy");
            return;
        }

        let document = match policy.to_json() {
            Ok(document) => document,
            Err(e) => {
                error!(error = %e, "Failed to serialize queue policy");
                return;
            }
        };
        debug!(policy = %document, "Installing queue policy");

        if let Err(e) = broker.set_queue_policy(queue_url, &document).await {
            error!(error = %e, policy = %document, "Failed to set queue policy");
        }
    }

    /// Begin polling in a background task. Returns immediately.
    ///
    /// Has no effect (beyond a warning) if the queue was already started.
    pub fn start<H: Handler + 'static>(&mut self, handler: H) {
        if self.worker.is_some() || self.state() != QueueState::Provisioned {
            warn!(worker = %self.name, state = ?self.state(), "Instance queue already started");
            return;
        }

        let poller = Arc::new(Poller {
            broker: Arc::clone(&self.broker),
            handler: Arc::new(handler),
            queue_url: self.queue_url.clone(),
            queue_name: self.queue_name.clone(),
            config: Arc::clone(&self.config),
        });

        self.state_tx.send_replace(QueueState::Running);
        let shutdown_rx = self.shutdown_tx.subscribe();
        let state_tx = Arc::clone(&self.state_tx);

        self.worker = Some(tokio::spawn(
            poller
                .run(shutdown_rx, state_tx)
                .instrument(self.span.clone()),
        ));
    }

    /// Wait for the poll loop to exit on its own.
    ///
    /// Resolves with the fatal receive error if the loop terminated abnormally,
    /// so a supervisor can tear down and restart. Resolves immediately if the
    /// queue was never started or has already been waited on.
    pub async fn wait(&mut self) -> IqResult<()> {
        let Some(worker) = self.worker.as_mut() else {
            return Ok(());
        };
        let joined = worker.await;
        self.worker = None;
        joined?
    }

    /// Stop polling, wait for the in-flight batch, then release broker resources.
    ///
    /// A receive call already in flight is allowed to finish. Cleanup failures
    /// are logged and never stop the remaining cleanup steps.
    pub async fn stop(mut self) {
        let span = self.span.clone();
        async move {
            info!("Stopping instance queue");
            self.state_tx.send_replace(QueueState::Stopping);
            self.shutdown_tx.send_replace(true);

            if let Some(worker) = self.worker.take() {
                match worker.await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => warn!(error = %e, "Instance queue worker had already failed"),
                    Err(e) => error!(error = %e, "Instance queue worker task failed"),
                }
            }

            self.cleanup().await;
            self.state_tx.send_replace(QueueState::Stopped);
            info!("Instance queue stopped");
        }
        .instrument(span)
        .await
    }

    async fn cleanup(&self) {
        for subscription in &self.subscriptions {
            info!(
                subscription = %subscription.subscription_arn,
                topic = %subscription.topic_arn,
                "Unsubscribing from topic"
            );
            if let Err(e) = self.broker.unsubscribe(&subscription.subscription_arn).await {
                error!(
                    subscription = %subscription.subscription_arn,
                    error = %e,
                    "Failed to unsubscribe from topic"
                );
            }
        }

        info!(queue_url = %self.queue_url, "Deleting instance queue");
        if let Err(e) = self.broker.delete_queue(&self.queue_url).await {
            error!(queue_url = %self.queue_url, error = %e, "Failed to delete instance queue");
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn instance_id(&self) -> &str {
        instance_id(&self.name)
    }

    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    pub fn queue_url(&self) -> &str {
        &self.queue_url
    }

    pub fn queue_arn(&self) -> &str {
        &self.queue_arn
    }

    pub fn subscriptions(&self) -> &[Subscription] {
        &self.subscriptions
    }

    pub fn config(&self) -> &IqConfig {
        &self.config
    }

    pub fn state(&self) -> QueueState {
        *self.state_tx.borrow()
    }

    /// Receiver that observes every lifecycle transition
    pub fn subscribe_state(&self) -> watch::Receiver<QueueState> {
        self.state_tx.subscribe()
    }
}

/// Run-phase view of the queue: read-only, shared with every handler task.
struct Poller<B, H> {
    broker: Arc<B>,
    handler: Arc<H>,
    queue_url: String,
    queue_name: String,
    config: Arc<IqConfig>,
}

impl<B, H> Poller<B, H>
where
    B: Broker + 'static,
    H: Handler + 'static,
{
    async fn run(
        self: Arc<Self>,
        shutdown: watch::Receiver<bool>,
        state: Arc<watch::Sender<QueueState>>,
    ) -> IqResult<()> {
        info!(
            queue = %self.queue_name,
            handler = %self.handler.name(),
            max_messages = self.config.max_number_of_messages,
            wait_time_seconds = self.config.wait_time_seconds,
            "Instance queue worker started"
        );

        let request = ReceiveRequest {
            max_messages: self.config.max_number_of_messages,
            wait_time_seconds: self.config.wait_time_seconds,
            visibility_timeout: self.config.visibility_timeout,
        };

        loop {
            if shutdown_requested(&shutdown) {
                info!("Instance queue worker stopped");
                return Ok(());
            }

            let items = match self.broker.receive(&self.queue_url, request).await {
                Ok(items) => items,
                Err(e) if shutdown_requested(&shutdown) => {
                    debug!(error = %e, "Receive interrupted by shutdown");
                    continue;
                }
                Err(e) => {
                    error!(error = %e, "Error receiving messages from queue, worker terminating");
                    state.send_replace(QueueState::Failed);
                    return Err(e.into());
                }
            };

            if items.is_empty() {
                continue;
            }

            self.dispatch_batch(items).await;
        }
    }

    /// Handle every message of the batch concurrently and wait for all of them.
    async fn dispatch_batch(self: &Arc<Self>, items: Vec<ReceivedMessage>) {
        metrics::record_received(&self.queue_name, items.len());

        let timeout = self.config.handler_timeout();
        let mut tasks = JoinSet::new();

        for raw in items {
            let (message, ctx) = Message::from_received(raw, Instant::now() + timeout);
            let poller = Arc::clone(self);
            let span = ctx.span();
            tasks.spawn(async move { poller.handle_one(ctx, message).await }.instrument(span));
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Message task failed");
            }
        }
    }

    async fn handle_one(&self, ctx: CorrelationContext, message: Message) {
        let started = Instant::now();

        let outcome = tokio::time::timeout_at(
            ctx.deadline(),
            AssertUnwindSafe(self.handler.handle_message(&ctx, &message)).catch_unwind(),
        )
        .await;

        let status = match outcome {
            Ok(Ok(Ok(()))) => {
                self.delete(&message).await;
                MessageStatus::Success
            }
            Ok(Ok(Err(e))) => {
                error!(handler = %self.handler.name(), error = ?e, "Error handling message");
                MessageStatus::Failed
            }
            Ok(Err(_)) => {
                error!(handler = %self.handler.name(), "Handler panicked");
                MessageStatus::Panicked
            }
            Err(_) => {
                warn!(
                    handler = %self.handler.name(),
                    timeout_secs = self.config.handler_timeout,
                    "Handler timed out"
                );
                MessageStatus::TimedOut
            }
        };

        metrics::record_processed(&self.queue_name, status, started.elapsed());
    }

    async fn delete(&self, message: &Message) {
        let started = Instant::now();
        match self
            .broker
            .delete_message(&self.queue_url, &message.receipt_handle)
            .await
        {
            Ok(()) => {
                info!(
                    elapsed_ms = started.elapsed().as_secs_f64() * 1000.0,
                    "Notification message deleted"
                );
            }
            Err(e) => {
                metrics::record_delete_error(&self.queue_name);
                error!(error = %e, "Error deleting message");
            }
        }
    }
}

/// True once stop was requested, or the owning queue was dropped without stopping.
fn shutdown_requested(shutdown: &watch::Receiver<bool>) -> bool {
    *shutdown.borrow() || shutdown.has_changed().is_err()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::MockBroker;
    use crate::error::{BrokerError, IqError};

    const QUEUE_URL: &str = "https://sqs.local/123/billing_srv-api-7d9f8-x2kqp";
    const QUEUE_ARN: &str = "arn:aws:sqs:us-east-1:123:billing_srv-api-7d9f8-x2kqp";

    fn config(topics: &[&str]) -> IqConfig {
        IqConfig::new("billing", topics.iter().map(|t| t.to_string()).collect())
            .with_delivery_delay(5)
            .with_visibility_timeout(120)
            .with_message_retention_period(900)
    }

    fn expect_queue(mock: &mut MockBroker) {
        mock.expect_create_queue()
            .withf(|name, settings, tags| {
                name == "billing_srv-api-7d9f8-x2kqp"
                    && settings.delay_seconds == 5
                    && settings.visibility_timeout == 120
                    && settings.message_retention_period == 900
                    && tags.get("Prefix").map(String::as_str) == Some("billing")
                    && tags.get("InstanceID").map(String::as_str) == Some("7d9f8")
            })
            .times(1)
            .returning(|_, _, _| Ok(QUEUE_URL.to_string()));
        mock.expect_queue_arn()
            .withf(|url| url == QUEUE_URL)
            .times(1)
            .returning(|_| Ok(QUEUE_ARN.to_string()));
    }

    #[tokio::test]
    async fn test_provision_subscribes_every_topic() {
        let mut mock = MockBroker::new();
        expect_queue(&mut mock);
        mock.expect_subscribe()
            .withf(|_, endpoint| endpoint == QUEUE_ARN)
            .times(3)
            .returning(|topic, _| Ok(format!("{topic}:sub")));
        mock.expect_set_queue_policy()
            .withf(|url, policy| {
                url == QUEUE_URL && policy.matches("Allow-SNS-SendMessage").count() == 3
            })
            .times(1)
            .returning(|_, _| Ok(()));

        let iq = InstanceQueue::provision(
            "api-7d9f8-x2kqp",
            config(&["arn:t1", "arn:t2", "arn:t3"]),
            mock,
        )
        .await
        .unwrap();

        assert_eq!(iq.state(), QueueState::Provisioned);
        assert_eq!(iq.queue_url(), QUEUE_URL);
        assert_eq!(iq.queue_arn(), QUEUE_ARN);
        assert_eq!(iq.instance_id(), "7d9f8");
        let subs: Vec<&str> = iq
            .subscriptions()
            .iter()
            .map(|s| s.subscription_arn.as_str())
            .collect();
        assert_eq!(subs, vec!["arn:t1:sub", "arn:t2:sub", "arn:t3:sub"]);
    }

    #[tokio::test]
    async fn test_provision_skips_failed_topic() {
        let mut mock = MockBroker::new();
        expect_queue(&mut mock);
        mock.expect_subscribe().times(3).returning(|topic, _| {
            if topic == "arn:bad" {
                Err(BrokerError::request("Subscribe", "NotFound"))
            } else {
                Ok(format!("{topic}:sub"))
            }
        });
        mock.expect_set_queue_policy()
            .withf(|_, policy| !policy.contains("arn:bad") && policy.contains("arn:good2"))
            .times(1)
            .returning(|_, _| Ok(()));

        let iq = InstanceQueue::provision(
            "api-7d9f8-x2kqp",
            config(&["arn:good1", "arn:bad", "arn:good2"]),
            mock,
        )
        .await
        .unwrap();

        assert_eq!(iq.subscriptions().len(), 2);
        assert!(iq.subscriptions().iter().all(|s| s.topic_arn != "arn:bad"));
    }

    #[tokio::test]
    async fn test_provision_create_failure_is_fatal() {
        let mut mock = MockBroker::new();
        mock.expect_create_queue()
            .times(1)
            .returning(|_, _, _| Err(BrokerError::request("CreateQueue", "AccessDenied")));
        mock.expect_subscribe().never();
        mock.expect_delete_queue().never();

        let result =
            InstanceQueue::provision("api-7d9f8-x2kqp", config(&["arn:t1"]), mock).await;

        assert!(matches!(result, Err(IqError::Broker(_))));
    }

    #[tokio::test]
    async fn test_provision_arn_failure_removes_queue() {
        let mut mock = MockBroker::new();
        mock.expect_create_queue()
            .times(1)
            .returning(|_, _, _| Ok(QUEUE_URL.to_string()));
        mock.expect_queue_arn()
            .times(1)
            .returning(|_| Err(BrokerError::missing("GetQueueAttributes", "QueueArn")));
        mock.expect_delete_queue()
            .withf(|url| url == QUEUE_URL)
            .times(1)
            .returning(|_| Ok(()));
        mock.expect_subscribe().never();

        let err = InstanceQueue::provision("api-7d9f8-x2kqp", config(&["arn:t1"]), mock)
            .await
            .err()
            .unwrap();

        assert!(err.to_string().contains("QueueArn"));
    }

    #[tokio::test]
    async fn test_provision_policy_failure_is_not_fatal() {
        let mut mock = MockBroker::new();
        expect_queue(&mut mock);
        mock.expect_subscribe()
            .returning(|topic, _| Ok(format!("{topic}:sub")));
        mock.expect_set_queue_policy()
            .times(1)
            .returning(|_, _| {
                Err(BrokerError::request(
                    "SetQueueAttributes",
                    "InvalidAttributeValue",
                ))
            });

        let iq = InstanceQueue::provision("api-7d9f8-x2kqp", config(&["arn:t1"]), mock)
            .await
            .unwrap();

        assert_eq!(iq.subscriptions().len(), 1);
    }

    #[tokio::test]
    async fn test_provision_rejects_invalid_config() {
        let mut mock = MockBroker::new();
        mock.expect_create_queue().never();

        let result = InstanceQueue::provision("api-7d9f8-x2kqp", config(&[]), mock).await;

        assert!(matches!(result, Err(IqError::Config(_))));
    }

    #[tokio::test]
    async fn test_stop_without_start_cleans_up() {
        let mut mock = MockBroker::new();
        expect_queue(&mut mock);
        mock.expect_subscribe()
            .returning(|topic, _| Ok(format!("{topic}:sub")));
        mock.expect_set_queue_policy().returning(|_, _| Ok(()));
        mock.expect_unsubscribe()
            .times(2)
            .returning(|_| Err(BrokerError::request("Unsubscribe", "Throttled")));
        mock.expect_delete_queue()
            .withf(|url| url == QUEUE_URL)
            .times(1)
            .returning(|_| Ok(()));
        mock.expect_receive().never();

        let iq = InstanceQueue::provision("api-7d9f8-x2kqp", config(&["arn:t1", "arn:t2"]), mock)
            .await
            .unwrap();
        let state = iq.subscribe_state();

        iq.stop().await;

        assert_eq!(*state.borrow(), QueueState::Stopped);
    }

    #[test]
    fn test_shutdown_requested_when_sender_dropped() {
        let (tx, rx) = watch::channel(false);
        assert!(!shutdown_requested(&rx));
        drop(tx);
        assert!(shutdown_requested(&rx));
    }
}
