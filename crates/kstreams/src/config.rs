//! Configuration for stream topologies
//!
//! Configuration is layered: defaults, then an optional YAML file, then
//! environment variables prefixed with `KSTREAMS_` (nested keys separated
//! by `__`, e.g. `KSTREAMS_KAFKA__BROKERS`).

use figment::providers::{Env, Format, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use crate::client::ProduceType;
use crate::error::{Result, StreamsError};

/// Top level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamsConfig {
    /// Kafka client settings
    #[serde(default)]
    pub kafka: KafkaConfig,

    /// Pipeline defaults
    #[serde(default)]
    pub pipeline: PipelineOptions,
}

impl StreamsConfig {
    /// Load configuration from an optional YAML file and the environment
    pub fn load<P: AsRef<Path>>(path: Option<P>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(path) = path {
            figment = figment.merge(Yaml::file(path.as_ref()));
        }

        figment = figment.merge(Env::prefixed("KSTREAMS_").split("__"));

        let config: StreamsConfig = figment
            .extract()
            .map_err(|e| StreamsError::Configuration { source: Box::new(e) })?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.kafka.brokers.trim().is_empty() {
            return Err(StreamsError::configuration("kafka.brokers must not be empty"));
        }

        if self.kafka.group_id.trim().is_empty() {
            return Err(StreamsError::configuration("kafka.group_id must not be empty"));
        }

        if self.kafka.send_timeout_ms == 0 {
            return Err(StreamsError::configuration(
                "kafka.send_timeout_ms must be greater than 0",
            ));
        }

        if self.pipeline.default_partitions <= 0 {
            return Err(StreamsError::configuration(
                "pipeline.default_partitions must be greater than 0",
            ));
        }

        Ok(())
    }
}

/// Kafka client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KafkaConfig {
    /// Comma separated bootstrap servers
    #[serde(default = "default_brokers")]
    pub brokers: String,

    /// Consumer group id
    #[serde(default = "default_group_id")]
    pub group_id: String,

    /// Client id reported to the brokers
    #[serde(default = "default_client_id")]
    pub client_id: String,

    /// Where to start when the group has no committed offset
    #[serde(default = "default_offset_reset")]
    pub auto_offset_reset: String,

    /// Let the consumer commit offsets in the background
    #[serde(default = "default_true")]
    pub enable_auto_commit: bool,

    /// Consumer session timeout
    #[serde(default = "default_session_timeout_ms")]
    pub session_timeout_ms: u64,

    /// Upper bound for a single produce request
    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,

    /// Raw librdkafka properties applied after the typed ones
    #[serde(default)]
    pub extra_config: HashMap<String, String>,
}

impl KafkaConfig {
    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            brokers: default_brokers(),
            group_id: default_group_id(),
            client_id: default_client_id(),
            auto_offset_reset: default_offset_reset(),
            enable_auto_commit: true,
            session_timeout_ms: default_session_timeout_ms(),
            send_timeout_ms: default_send_timeout_ms(),
            extra_config: HashMap::new(),
        }
    }
}

/// Defaults applied to streams created by the factory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineOptions {
    /// Partition count used by `to(topic)`
    #[serde(default = "default_partitions")]
    pub default_partitions: i32,

    /// Produce mode used by `to(topic)`
    #[serde(default)]
    pub produce_type: ProduceType,

    /// Version stamped into buffer-formatted envelopes
    #[serde(default = "default_version")]
    pub message_version: i64,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            default_partitions: default_partitions(),
            produce_type: ProduceType::default(),
            message_version: default_version(),
        }
    }
}

fn default_brokers() -> String {
    "localhost:9092".to_string()
}

fn default_group_id() -> String {
    "kstreams".to_string()
}

fn default_client_id() -> String {
    "kstreams-client".to_string()
}

fn default_offset_reset() -> String {
    "earliest".to_string()
}

fn default_true() -> bool {
    true
}

fn default_session_timeout_ms() -> u64 {
    30_000
}

fn default_send_timeout_ms() -> u64 {
    5_000
}

fn default_partitions() -> i32 {
    1
}

fn default_version() -> i64 {
    1
}
