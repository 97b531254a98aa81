//! Broker abstraction
//!
//! The instance queue talks to a durable queue service and a pub/sub topic
//! service through this trait. [`crate::aws::AwsBroker`] implements it over
//! SQS and SNS; tests implement it in memory.

use crate::error::BrokerError;
use async_trait::async_trait;
use std::collections::HashMap;

/// Queue attributes applied at creation time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueSettings {
    pub delay_seconds: u32,
    pub visibility_timeout: u32,
    pub message_retention_period: u32,
}

/// Parameters of one long-poll receive call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiveRequest {
    pub max_messages: u32,
    pub wait_time_seconds: u32,
    pub visibility_timeout: u32,
}

/// A raw item as delivered by the queue, before any parsing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReceivedMessage {
    pub message_id: String,
    /// Opaque ack token; required to delete the message
    pub receipt_handle: String,
    /// The pub/sub notification envelope, serialized as JSON
    pub body: String,
}

/// Operations the instance queue consumes from the broker.
///
/// Delivery is at-least-once: a received message that is not deleted becomes
/// visible again once its visibility timeout elapses.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Broker: Send + Sync {
    /// Create a queue and return its URL
    async fn create_queue(
        &self,
        name: &str,
        settings: QueueSettings,
        tags: HashMap<String, String>,
    ) -> Result<String, BrokerError>;

    /// Look up the ARN of the queue at `queue_url`
    async fn queue_arn(&self, queue_url: &str) -> Result<String, BrokerError>;

    /// Subscribe the queue `endpoint_arn` to `topic_arn`; returns the subscription ARN
    async fn subscribe(&self, topic_arn: &str, endpoint_arn: &str) -> Result<String, BrokerError>;

    /// Replace the queue's access policy document
    async fn set_queue_policy(&self, queue_url: &str, policy: &str) -> Result<(), BrokerError>;

    /// Long-poll the queue for up to `request.max_messages` items
    async fn receive(
        &self,
        queue_url: &str,
        request: ReceiveRequest,
    ) -> Result<Vec<ReceivedMessage>, BrokerError>;

    /// Acknowledge a message by its receipt handle
    async fn delete_message(
        &self,
        queue_url: &str,
        receipt_handle: &str,
    ) -> Result<(), BrokerError>;

    /// Remove a subscription created by [`Broker::subscribe`]
    async fn unsubscribe(&self, subscription_arn: &str) -> Result<(), BrokerError>;

    /// Delete the queue and any messages left in it
    async fn delete_queue(&self, queue_url: &str) -> Result<(), BrokerError>;
}

#[async_trait]
impl<B: Broker + ?Sized> Broker for std::sync::Arc<B> {
    async fn create_queue(
        &self,
        name: &str,
        settings: QueueSettings,
        tags: HashMap<String, String>,
    ) -> Result<String, BrokerError> {
        (**self).create_queue(name, settings, tags).await
    }

    async fn queue_arn(&self, queue_url: &str) -> Result<String, BrokerError> {
        (**self).queue_arn(queue_url).await
    }

    async fn subscribe(&self, topic_arn: &str, endpoint_arn: &str) -> Result<String, BrokerError> {
        (**self).subscribe(topic_arn, endpoint_arn).await
    }

    async fn set_queue_policy(&self, queue_url: &str, policy: &str) -> Result<(), BrokerError> {
        (**self).set_queue_policy(queue_url, policy).await
    }

    async fn receive(
        &self,
        queue_url: &str,
        request: ReceiveRequest,
    ) -> Result<Vec<ReceivedMessage>, BrokerError> {
        (**self).receive(queue_url, request).await
    }

    async fn delete_message(
        &self,
        queue_url: &str,
        receipt_handle: &str,
    ) -> Result<(), BrokerError> {
        (**self).delete_message(queue_url, receipt_handle).await
    }

    async fn unsubscribe(&self, subscription_arn: &str) -> Result<(), BrokerError> {
        (**self).unsubscribe(subscription_arn).await
    }

    async fn delete_queue(&self, queue_url: &str) -> Result<(), BrokerError> {
        (**self).delete_queue(queue_url).await
    }
}
