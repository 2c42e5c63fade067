// SPDX-License-Identifier: AGPL-3.0-or-later

use serde::Deserialize;
use thiserror::Error;

/// Configuration object holding all important variables throughout the
/// application.
///
/// Both daemons receive this object at startup; it is validated once before
/// any service enters its run loop so that missing connection parameters
/// fail fast instead of being retried silently.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Configuration {
    /// URL / connection string to PostgreSQL or SQLite database.
    pub database_url: String,

    /// Maximum number of connections that the database pool should maintain.
    ///
    /// Be mindful of the connection limits for the database as well as other
    /// applications which may want to connect to the same database (for
    /// example multiple persistence workers in horizontally scaled
    /// deployments).
    pub database_max_connections: u32,

    /// Only commits in collections starting with this prefix are mapped onto
    /// the posts table. Commits outside of it still reach the raw archive.
    pub post_collection_prefix: String,

    /// Upstream feed configuration.
    pub stream: StreamConfiguration,

    /// Durable buffer configuration.
    pub buffer: BufferConfiguration,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            database_url: "sqlite::memory:".into(),
            database_max_connections: 32,
            post_collection_prefix: "app.bsky.feed.".into(),
            stream: StreamConfiguration::default(),
            buffer: BufferConfiguration::default(),
        }
    }
}

impl Configuration {
    /// Checks that all required connection parameters are present.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.database_url.is_empty() {
            return Err(ConfigurationError::MissingValue("database_url"));
        }

        if self.stream.endpoint.is_empty() {
            return Err(ConfigurationError::MissingValue("stream.endpoint"));
        }

        if self.buffer.brokers.is_empty() {
            return Err(ConfigurationError::MissingValue("buffer.brokers"));
        }

        if self.buffer.topic.is_empty() {
            return Err(ConfigurationError::MissingValue("buffer.topic"));
        }

        if self.buffer.consumer_group.is_empty() {
            return Err(ConfigurationError::MissingValue("buffer.consumer_group"));
        }

        Ok(())
    }
}

/// Configuration of the connection to the upstream feed.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StreamConfiguration {
    /// WebSocket endpoint of the feed, without query parameters.
    pub endpoint: String,

    /// Collections to subscribe to. An empty list subscribes to all.
    pub wanted_collections: Vec<String>,

    /// Actor identifiers to subscribe to. An empty list subscribes to all.
    pub wanted_dids: Vec<String>,

    /// Maximum accepted message size in bytes, unlimited when zero.
    pub max_message_size_bytes: u64,

    /// Microsecond cursor to resume consumption from. `None` starts at the
    /// live tail of the feed.
    pub cursor: Option<u64>,
}

impl Default for StreamConfiguration {
    fn default() -> Self {
        Self {
            endpoint: "wss://jetstream1.us-east.bsky.network/subscribe".into(),
            wanted_collections: vec!["app.bsky.feed.post".into()],
            wanted_dids: Vec::new(),
            max_message_size_bytes: 0,
            cursor: None,
        }
    }
}

/// Configuration of the durable buffer between the two daemons.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BufferConfiguration {
    /// Bootstrap servers of the message broker.
    pub brokers: String,

    /// Topic holding the raw event log, partitioned by actor identifier.
    pub topic: String,

    /// Consumer group of the persistence worker. Independent groups keep
    /// independent, replayable offsets.
    pub consumer_group: String,
}

impl Default for BufferConfiguration {
    fn default() -> Self {
        Self {
            brokers: "localhost:9092".into(),
            topic: "firehose-raw".into(),
            consumer_group: "jetsink-persister".into(),
        }
    }
}

/// Startup-time configuration failures. These are fatal and never retried.
#[derive(Error, Debug)]
pub enum ConfigurationError {
    /// A required connection parameter was left empty.
    #[error("Missing required configuration value: {0}")]
    MissingValue(&'static str),
}

#[cfg(test)]
mod tests {
    use super::Configuration;

    #[test]
    fn default_configuration_is_valid() {
        assert!(Configuration::default().validate().is_ok());
    }

    #[test]
    fn missing_connection_parameters_fail_fast() {
        let mut config = Configuration::default();
        config.buffer.brokers = "".into();
        assert!(config.validate().is_err());

        let mut config = Configuration::default();
        config.database_url = "".into();
        assert!(config.validate().is_err());
    }
}
