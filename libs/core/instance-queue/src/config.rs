//! Instance queue configuration
//!
//! `IqConfig` is immutable once handed to [`crate::InstanceQueue::provision`].
//! All durations are whole seconds and unsigned, so they can never be negative.

use core_config::{env_list, env_parse, env_required, ConfigError, FromEnv};
use std::time::Duration;

/// Default environment variable prefix for [`IqConfig::from_env`].
pub const DEFAULT_ENV_PREFIX: &str = "IQ";

/// Configuration for an instance queue worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IqConfig {
    /// Name prefix for the provisioned queue and its `Prefix` tag
    pub prefix: String,

    /// Topics the instance queue subscribes to (must not be empty)
    pub topic_arns: Vec<String>,

    /// Maximum messages requested per receive call
    pub max_number_of_messages: u32,

    /// Long-poll wait per receive call, in seconds
    pub wait_time_seconds: u32,

    /// Visibility/lease duration of a received message, in seconds
    pub visibility_timeout: u32,

    /// Delivery delay applied by the queue, in seconds
    pub delivery_delay: u32,

    /// How long the queue retains undeleted messages, in seconds
    pub message_retention_period: u32,

    /// Per-message handler deadline, in seconds
    pub handler_timeout: u32,
}

impl IqConfig {
    /// Create a config with default tunables for the given prefix and topics
    pub fn new(prefix: impl Into<String>, topic_arns: Vec<String>) -> Self {
        Self {
            prefix: prefix.into(),
            topic_arns,
            max_number_of_messages: 10,
            wait_time_seconds: 20,
            visibility_timeout: 3600,
            delivery_delay: 0,
            message_retention_period: 3600,
            handler_timeout: 60,
        }
    }

    /// Load configuration from `<prefix>_*` environment variables.
    ///
    /// `<prefix>_PREFIX` and `<prefix>_TOPIC_ARNS` (comma separated) are required;
    /// everything else falls back to the defaults of [`IqConfig::new`].
    pub fn from_env_with_prefix(env_prefix: &str) -> Result<Self, ConfigError> {
        let key = |name: &str| format!("{}_{}", env_prefix, name);
        let defaults = Self::new(String::new(), Vec::new());

        let config = Self {
            prefix: env_required(&key("PREFIX"))?,
            topic_arns: env_list(&key("TOPIC_ARNS"))?,
            max_number_of_messages: env_parse(
                &key("MAX_NUMBER_OF_MESSAGES"),
                defaults.max_number_of_messages,
            )?,
            wait_time_seconds: env_parse(&key("WAIT_TIME_SECONDS"), defaults.wait_time_seconds)?,
            visibility_timeout: env_parse(
                &key("VISIBILITY_TIMEOUT"),
                defaults.visibility_timeout,
            )?,
            delivery_delay: env_parse(&key("DELIVERY_DELAY"), defaults.delivery_delay)?,
            message_retention_period: env_parse(
                &key("MESSAGE_RETENTION_PERIOD"),
                defaults.message_retention_period,
            )?,
            handler_timeout: env_parse(&key("HANDLER_TIMEOUT"), defaults.handler_timeout)?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Check the invariants the worker relies on
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.prefix.trim().is_empty() {
            return Err(ConfigError::Invalid("queue name prefix is empty".to_string()));
        }
        if self.topic_arns.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one topic ARN is required".to_string(),
            ));
        }
        if self.max_number_of_messages == 0 {
            return Err(ConfigError::Invalid(
                "max_number_of_messages must be at least 1".to_string(),
            ));
        }
        // A zero deadline expires every handler at its first await.
        if self.handler_timeout == 0 {
            return Err(ConfigError::Invalid(
                "handler_timeout must be at least 1 second".to_string(),
            ));
        }
        Ok(())
    }

    /// Per-message handler deadline
    pub fn handler_timeout(&self) -> Duration {
        Duration::from_secs(u64::from(self.handler_timeout))
    }

    /// Name of the queue provisioned for `instance_name`
    pub fn queue_name(&self, instance_name: &str) -> String {
        format!("{}_srv-{}", self.prefix, instance_name)
    }

    pub fn with_max_number_of_messages(mut self, count: u32) -> Self {
        self.max_number_of_messages = count;
        self
    }

    pub fn with_wait_time_seconds(mut self, seconds: u32) -> Self {
        self.wait_time_seconds = seconds;
        self
    }

    pub fn with_visibility_timeout(mut self, seconds: u32) -> Self {
        self.visibility_timeout = seconds;
        self
    }

    pub fn with_delivery_delay(mut self, seconds: u32) -> Self {
        self.delivery_delay = seconds;
        self
    }

    pub fn with_message_retention_period(mut self, seconds: u32) -> Self {
        self.message_retention_period = seconds;
        self
    }

    pub fn with_handler_timeout(mut self, seconds: u32) -> Self {
        self.handler_timeout = seconds;
        self
    }
}

impl FromEnv for IqConfig {
    /// Reads `IQ_*` variables; see [`IqConfig::from_env_with_prefix`]
    fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_with_prefix(DEFAULT_ENV_PREFIX)
    }
}
