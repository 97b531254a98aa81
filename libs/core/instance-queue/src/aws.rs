//! AWS broker: SQS for the instance queue, SNS for topic subscriptions
//!
//! Uses the standard AWS SDK credential chain:
//! - Environment variables (`AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY`)
//! - Web identity token (EKS IRSA)
//! - IAM instance profile (EC2)
//! - Shared credentials file
//!
//! The region comes from `IQ_AWS_REGION`, then `AWS_REGION`, then the SDK's
//! own resolution.

use crate::broker::{Broker, QueueSettings, ReceiveRequest, ReceivedMessage};
use crate::error::BrokerError;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_sqs::error::DisplayErrorContext;
use aws_sdk_sqs::types::{Message as SqsMessage, QueueAttributeName};
use std::collections::HashMap;
use tracing::{debug, warn};

/// [`Broker`] over SQS and SNS
#[derive(Clone)]
pub struct AwsBroker {
    sqs: aws_sdk_sqs::Client,
    sns: aws_sdk_sns::Client,
}

impl AwsBroker {
    pub fn new(sqs: aws_sdk_sqs::Client, sns: aws_sdk_sns::Client) -> Self {
        Self { sqs, sns }
    }

    /// Build both clients from the default AWS SDK config
    pub async fn from_env() -> Self {
        let region = std::env::var("IQ_AWS_REGION")
            .or_else(|_| std::env::var("AWS_REGION"))
            .ok();

        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = region {
            loader = loader.region(aws_config::Region::new(region));
        }
        let config = loader.load().await;

        debug!(region = ?config.region(), "AWS config loaded");

        Self::new(
            aws_sdk_sqs::Client::new(&config),
            aws_sdk_sns::Client::new(&config),
        )
    }
}

fn to_i32(field: &'static str, value: u32) -> Result<i32, BrokerError> {
    i32::try_from(value).map_err(|_| BrokerError::InvalidArgument {
        field,
        value: value.to_string(),
    })
}

fn received(message: SqsMessage) -> ReceivedMessage {
    ReceivedMessage {
        message_id: message.message_id.unwrap_or_default(),
        receipt_handle: message.receipt_handle.unwrap_or_default(),
        body: message.body.unwrap_or_default(),
    }
}

#[async_trait]
impl Broker for AwsBroker {
    async fn create_queue(
        &self,
        name: &str,
        settings: QueueSettings,
        tags: HashMap<String, String>,
    ) -> Result<String, BrokerError> {
        let output = self
            .sqs
            .create_queue()
            .queue_name(name)
            .attributes(
                QueueAttributeName::DelaySeconds,
                settings.delay_seconds.to_string(),
            )
            .attributes(
                QueueAttributeName::VisibilityTimeout,
                settings.visibility_timeout.to_string(),
            )
            .attributes(
                QueueAttributeName::MessageRetentionPeriod,
                settings.message_retention_period.to_string(),
            )
            .set_tags(Some(tags))
            .send()
            .await
            .map_err(|e| BrokerError::request("CreateQueue", DisplayErrorContext(&e)))?;

        output
            .queue_url()
            .map(str::to_string)
            .ok_or_else(|| BrokerError::missing("CreateQueue", "QueueUrl"))
    }

    async fn queue_arn(&self, queue_url: &str) -> Result<String, BrokerError> {
        let output = self
            .sqs
            .get_queue_attributes()
            .queue_url(queue_url)
            .attribute_names(QueueAttributeName::QueueArn)
            .send()
            .await
            .map_err(|e| BrokerError::request("GetQueueAttributes", DisplayErrorContext(&e)))?;

        output
            .attributes()
            .and_then(|attributes| attributes.get(&QueueAttributeName::QueueArn))
            .cloned()
            .ok_or_else(|| BrokerError::missing("GetQueueAttributes", "QueueArn"))
    }

    async fn subscribe(&self, topic_arn: &str, endpoint_arn: &str) -> Result<String, BrokerError> {
        let output = self
            .sns
            .subscribe()
            .topic_arn(topic_arn)
            .protocol("sqs")
            .endpoint(endpoint_arn)
            .send()
            .await
            .map_err(|e| {
                BrokerError::request("Subscribe", aws_sdk_sns::error::DisplayErrorContext(&e))
            })?;

        output
            .subscription_arn()
            .map(str::to_string)
            .ok_or_else(|| BrokerError::missing("Subscribe", "SubscriptionArn"))
    }

    async fn set_queue_policy(&self, queue_url: &str, policy: &str) -> Result<(), BrokerError> {
        self.sqs
            .set_queue_attributes()
            .queue_url(queue_url)
            .attributes(QueueAttributeName::Policy, policy)
            .send()
            .await
            .map_err(|e| BrokerError::request("SetQueueAttributes", DisplayErrorContext(&e)))?;
        Ok(())
    }

    async fn receive(
        &self,
        queue_url: &str,
        request: ReceiveRequest,
    ) -> Result<Vec<ReceivedMessage>, BrokerError> {
        let output = self
            .sqs
            .receive_message()
            .queue_url(queue_url)
            .max_number_of_messages(to_i32("max_number_of_messages", request.max_messages)?)
            .wait_time_seconds(to_i32("wait_time_seconds", request.wait_time_seconds)?)
            .visibility_timeout(to_i32("visibility_timeout", request.visibility_timeout)?)
            .message_attribute_names("All")
            .send()
            .await
            .map_err(|e| BrokerError::request("ReceiveMessage", DisplayErrorContext(&e)))?;

        let messages: Vec<ReceivedMessage> = output
            .messages
            .unwrap_or_default()
            .into_iter()
            .map(received)
            .collect();

        for message in messages.iter().filter(|m| m.receipt_handle.is_empty()) {
            warn!(message_id = %message.message_id, "Received message without receipt handle");
        }

        Ok(messages)
    }

    async fn delete_message(
        &self,
        queue_url: &str,
        receipt_handle: &str,
    ) -> Result<(), BrokerError> {
        self.sqs
            .delete_message()
            .queue_url(queue_url)
            .receipt_handle(receipt_handle)
            .send()
            .await
            .map_err(|e| BrokerError::request("DeleteMessage", DisplayErrorContext(&e)))?;
        Ok(())
    }

    async fn unsubscribe(&self, subscription_arn: &str) -> Result<(), BrokerError> {
        self.sns
            .unsubscribe()
            .subscription_arn(subscription_arn)
            .send()
            .await
            .map_err(|e| {
                BrokerError::request("Unsubscribe", aws_sdk_sns::error::DisplayErrorContext(&e))
            })?;
        Ok(())
    }

    async fn delete_queue(&self, queue_url: &str) -> Result<(), BrokerError> {
        self.sqs
            .delete_queue()
            .queue_url(queue_url)
            .send()
            .await
            .map_err(|e| BrokerError::request("DeleteQueue", DisplayErrorContext(&e)))?;
        Ok(())
    }
}
