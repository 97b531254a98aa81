//! Notification message model
//!
//! A queue item carries a pub/sub notification envelope whose `Message` field
//! is itself a JSON document. Both layers are parsed independently: a broken
//! envelope or a broken body degrades that field to its default and is
//! logged, without affecting other messages in the batch.

use crate::broker::ReceivedMessage;
use crate::context::{CorrelationContext, FALLBACK_REQ_ID, REQ_ID_ATTRIBUTE};
use crate::metrics;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use tokio::time::Instant;
use tracing::{error, info};

/// A typed message attribute attached by the publisher
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageAttribute {
    #[serde(rename = "Type", default)]
    pub kind: String,
    #[serde(rename = "Value", default)]
    pub value: String,
}

/// The pub/sub envelope wrapped around a published payload
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Notification {
    #[serde(rename = "Type")]
    pub kind: String,
    #[serde(rename = "MessageId")]
    pub id: String,
    #[serde(rename = "TopicArn")]
    pub topic_arn: String,
    /// Raw payload; parsed separately into [`Message::body`]
    #[serde(rename = "Message")]
    pub body: String,
    #[serde(rename = "Timestamp", deserialize_with = "lenient")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(rename = "SignatureVersion")]
    pub signature_version: String,
    #[serde(rename = "Signature")]
    pub signature: String,
    #[serde(rename = "SigningCertURL")]
    pub signing_cert_url: String,
    #[serde(rename = "UnsubscribeURL")]
    pub unsubscribe_url: String,
    #[serde(
        rename = "MessageAttributes",
        alias = "Attributes",
        deserialize_with = "lenient"
    )]
    pub attributes: HashMap<String, MessageAttribute>,
}

/// Decode a field, falling back to its default when it is null or malformed,
/// so one bad field does not discard the rest of the envelope.
fn lenient<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).unwrap_or_default())
}

impl Notification {
    /// Look up a publisher attribute value
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(|a| a.value.as_str())
    }
}

/// The unit handed to a [`crate::Handler`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Message {
    pub id: String,
    /// Ack token used to delete the message once handled
    pub receipt_handle: String,
    pub notification: Notification,
    /// The notification body parsed as a JSON object; empty if it was not one
    pub body: Map<String, Value>,
}

impl Message {
    /// Parse a raw queue item into a message and its correlation context.
    ///
    /// Never fails: parse errors are logged and leave the affected field at its
    /// default so the handler still sees the ids and receipt handle.
    pub fn from_received(raw: ReceivedMessage, deadline: Instant) -> (Self, CorrelationContext) {
        let notification = match serde_json::from_str::<Notification>(&raw.body) {
            Ok(notification) => notification,
            Err(e) => {
                metrics::record_parse_error("envelope");
                error!(
                    message_id = %raw.message_id,
                    error = %e,
                    "Failed to parse notification envelope"
                );
                Notification::default()
            }
        };

        let body = match serde_json::from_str::<Map<String, Value>>(&notification.body) {
            Ok(body) => body,
            Err(e) => {
                metrics::record_parse_error("body");
                error!(
                    message_id = %raw.message_id,
                    error = %e,
                    "Failed to parse notification body"
                );
                Map::new()
            }
        };

        let req_id = notification
            .attribute(REQ_ID_ATTRIBUTE)
            .unwrap_or(FALLBACK_REQ_ID)
            .to_string();
        let ctx = CorrelationContext::new(req_id, raw.message_id.clone(), deadline);

        let message = Self {
            id: raw.message_id,
            receipt_handle: raw.receipt_handle,
            notification,
            body,
        };

        info!(
            message_id = %message.id,
            req_id = %ctx.req_id(),
            topic = %message.notification.topic_arn,
            "Notification message received"
        );

        (message, ctx)
    }

    /// Publisher attribute by name
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.notification.attribute(name)
    }

    /// Correlation id attached by the publisher, if any
    pub fn req_id(&self) -> Option<&str> {
        self.attribute(REQ_ID_ATTRIBUTE)
    }

    /// Top-level field of the parsed body
    pub fn body_field(&self, key: &str) -> Option<&Value> {
        self.body.get(key)
    }
}
