//! Queue access policy
//!
//! SNS can only deliver into an SQS queue whose policy allows it. One
//! statement is emitted per subscribed topic, each restricted to that topic
//! through an `aws:SourceArn` condition.

use serde::Serialize;

const POLICY_VERSION: &str = "2012-10-17";
const STATEMENT_SID: &str = "Allow-SNS-SendMessage";
const SNS_SERVICE_PRINCIPAL: &str = "sns.amazonaws.com";
const SEND_MESSAGE_ACTION: &str = "sqs:SendMessage";

/// Access policy document installed on the instance queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct QueuePolicy {
    pub version: &'static str,
    pub statement: Vec<PolicyStatement>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct PolicyStatement {
    pub sid: &'static str,
    pub effect: &'static str,
    pub principal: Principal,
    pub action: Vec<&'static str>,
    pub resource: String,
    pub condition: Condition,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Principal {
    pub service: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Condition {
    #[serde(rename = "ArnEquals")]
    pub arn_equals: SourceArn,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceArn {
    #[serde(rename = "aws:SourceArn")]
    pub source_arn: String,
}

impl QueuePolicy {
    /// Allow each of `topic_arns` to send messages to `queue_arn`
    pub fn for_topics<I, S>(queue_arn: &str, topic_arns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let statement = topic_arns
            .into_iter()
            .map(|topic| PolicyStatement {
                sid: STATEMENT_SID,
                effect: "Allow",
                principal: Principal {
                    service: SNS_SERVICE_PRINCIPAL,
                },
                action: vec![SEND_MESSAGE_ACTION],
                resource: queue_arn.to_string(),
                condition: Condition {
                    arn_equals: SourceArn {
                        source_arn: topic.into(),
                    },
                },
            })
            .collect();

        Self {
            version: POLICY_VERSION,
            statement,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.statement.is_empty()
    }

    /// Serialize to the JSON document expected by the queue's `Policy` attribute
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
