//! In-memory broker and recording handler shared by the lifecycle tests.

#![allow(dead_code)]

use async_trait::async_trait;
use instance_queue::{
    Broker, BrokerError, CorrelationContext, Handler, IqConfig, Message, QueueSettings,
    ReceiveRequest, ReceivedMessage,
};
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

pub const INSTANCE: &str = "api-7d9f8-x2kqp";
pub const QUEUE_URL: &str = "https://sqs.local/123/billing_srv-api-7d9f8-x2kqp";
pub const QUEUE_ARN: &str = "arn:aws:sqs:us-east-1:123:billing_srv-api-7d9f8-x2kqp";

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    CreateQueue {
        name: String,
        tags: HashMap<String, String>,
    },
    Subscribe(String),
    Policy(String),
    ReceiveStart,
    ReceiveDone,
    Delete(String),
    DeleteFailed(String),
    Unsubscribe(String),
    DeleteQueue(String),
    HandlerStart {
        id: String,
        req_id: String,
        body_keys: usize,
    },
    HandlerDone(String),
}

/// Shared, ordered record of broker calls and handler activity
#[derive(Clone, Default)]
pub struct Log(Arc<Mutex<Vec<Event>>>);

impl Log {
    pub fn push(&self, event: Event) {
        self.0.lock().unwrap().push(event);
    }

    pub fn events(&self) -> Vec<Event> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self, pred: impl Fn(&Event) -> bool) -> usize {
        self.events().iter().filter(|e| pred(e)).count()
    }

    pub fn position(&self, pred: impl Fn(&Event) -> bool) -> Option<usize> {
        self.events().iter().position(pred)
    }

    pub fn deleted(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Delete(receipt) => Some(receipt),
                _ => None,
            })
            .collect()
    }
}

/// One scripted answer to a receive call
pub enum Step {
    Batch(Vec<ReceivedMessage>),
    Fail(&'static str),
    /// Block until notified, then fail
    Block(Arc<Notify>),
}

/// Broker that records every call; receive answers follow a script, then idle.
pub struct RecordingBroker {
    pub log: Log,
    steps: Mutex<VecDeque<Step>>,
    failing_topics: Vec<String>,
    failing_receipts: Vec<String>,
}

impl RecordingBroker {
    pub fn new(log: Log) -> Self {
        Self {
            log,
            steps: Mutex::new(VecDeque::new()),
            failing_topics: Vec::new(),
            failing_receipts: Vec::new(),
        }
    }

    pub fn failing_topic(mut self, topic: &str) -> Self {
        self.failing_topics.push(topic.to_string());
        self
    }

    /// Deleting `receipt_handle` fails; the attempt is still recorded
    pub fn failing_receipt(mut self, receipt_handle: &str) -> Self {
        self.failing_receipts.push(receipt_handle.to_string());
        self
    }

    pub fn then(self, step: Step) -> Self {
        self.steps.lock().unwrap().push_back(step);
        self
    }
}

#[async_trait]
impl Broker for RecordingBroker {
    async fn create_queue(
        &self,
        name: &str,
        _settings: QueueSettings,
        tags: HashMap<String, String>,
    ) -> Result<String, BrokerError> {
        self.log.push(Event::CreateQueue {
            name: name.to_string(),
            tags,
        });
        Ok(QUEUE_URL.to_string())
    }

    async fn queue_arn(&self, _queue_url: &str) -> Result<String, BrokerError> {
        Ok(QUEUE_ARN.to_string())
    }

    async fn subscribe(&self, topic_arn: &str, _endpoint_arn: &str) -> Result<String, BrokerError> {
        if self.failing_topics.iter().any(|t| t == topic_arn) {
            return Err(BrokerError::request("Subscribe", "NotFound: Topic does not exist"));
        }
        self.log.push(Event::Subscribe(topic_arn.to_string()));
        Ok(format!("{topic_arn}:sub"))
    }

    async fn set_queue_policy(&self, _queue_url: &str, policy: &str) -> Result<(), BrokerError> {
        self.log.push(Event::Policy(policy.to_string()));
        Ok(())
    }

    async fn receive(
        &self,
        _queue_url: &str,
        _request: ReceiveRequest,
    ) -> Result<Vec<ReceivedMessage>, BrokerError> {
        self.log.push(Event::ReceiveStart);
        let step = self.steps.lock().unwrap().pop_front();

        let result = match step {
            Some(Step::Batch(batch)) => Ok(batch),
            Some(Step::Fail(message)) => Err(BrokerError::request("ReceiveMessage", message)),
            Some(Step::Block(gate)) => {
                gate.notified().await;
                Err(BrokerError::request("ReceiveMessage", "connection reset"))
            }
            None => {
                tokio::time::sleep(Duration::from_millis(10)).await;
                Ok(Vec::new())
            }
        };

        self.log.push(Event::ReceiveDone);
        result
    }

    async fn delete_message(
        &self,
        _queue_url: &str,
        receipt_handle: &str,
    ) -> Result<(), BrokerError> {
        if self.failing_receipts.iter().any(|r| r == receipt_handle) {
            self.log.push(Event::DeleteFailed(receipt_handle.to_string()));
            return Err(BrokerError::request("DeleteMessage", "ReceiptHandleIsInvalid"));
        }
        self.log.push(Event::Delete(receipt_handle.to_string()));
        Ok(())
    }

    async fn unsubscribe(&self, subscription_arn: &str) -> Result<(), BrokerError> {
        self.log.push(Event::Unsubscribe(subscription_arn.to_string()));
        Ok(())
    }

    async fn delete_queue(&self, queue_url: &str) -> Result<(), BrokerError> {
        self.log.push(Event::DeleteQueue(queue_url.to_string()));
        Ok(())
    }
}

/// Handler driven by the `action` field of the message body:
/// `fail`, `panic`, `sleep` (for `ms` milliseconds), `hang`, anything else succeeds.
pub struct Recorder {
    pub log: Log,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl Recorder {
    pub fn new(log: Log) -> Arc<Self> {
        Arc::new(Self {
            log,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl Handler for Recorder {
    async fn handle_message(&self, ctx: &CorrelationContext, msg: &Message) -> eyre::Result<()> {
        self.log.push(Event::HandlerStart {
            id: msg.id.clone(),
            req_id: ctx.req_id().to_string(),
            body_keys: msg.body.len(),
        });
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let action = msg
            .body_field("action")
            .and_then(Value::as_str)
            .unwrap_or("ok");
        let result = match action {
            "fail" => Err(eyre::eyre!("refusing message {}", msg.id)),
            "panic" => panic!("handler exploded"),
            "sleep" => {
                let ms = msg.body_field("ms").and_then(Value::as_u64).unwrap_or(50);
                tokio::time::sleep(Duration::from_millis(ms)).await;
                Ok(())
            }
            "hang" => {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(())
            }
            _ => Ok(()),
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.log.push(Event::HandlerDone(msg.id.clone()));
        result
    }

    fn name(&self) -> &'static str {
        "Recorder"
    }
}

/// A queue item wrapping `body` in a notification envelope
pub fn notification(id: &str, body: Value, req_id: Option<&str>) -> ReceivedMessage {
    raw_notification(id, &body.to_string(), req_id)
}

/// Like [`notification`], with the body passed through verbatim
pub fn raw_notification(id: &str, body: &str, req_id: Option<&str>) -> ReceivedMessage {
    let attributes = match req_id {
        Some(req_id) => json!({ "x_req_id": { "Type": "String", "Value": req_id } }),
        None => json!({}),
    };
    let envelope = json!({
        "Type": "Notification",
        "MessageId": format!("sns-{id}"),
        "TopicArn": "arn:aws:sns:us-east-1:123:billing",
        "Message": body,
        "Timestamp": "2024-05-01T12:30:00.000Z",
        "MessageAttributes": attributes,
    });

    ReceivedMessage {
        message_id: id.to_string(),
        receipt_handle: format!("rh-{id}"),
        body: envelope.to_string(),
    }
}

pub fn config(topics: &[&str]) -> IqConfig {
    IqConfig::new("billing", topics.iter().map(|t| t.to_string()).collect())
        .with_wait_time_seconds(0)
        .with_handler_timeout(5)
}

/// Poll `cond` until it holds; panics after five seconds.
pub async fn wait_for(what: &str, cond: impl Fn() -> bool) {
    let waited = tokio::time::timeout(Duration::from_secs(5), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "timed out waiting for {what}");
}
