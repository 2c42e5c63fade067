// SPDX-License-Identifier: AGPL-3.0-or-later

use log::debug;
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;

use crate::buffer::BufferError;
use crate::config::BufferConfiguration;

/// Publishes raw events into the partitioned log.
pub struct EventPublisher {
    producer: FutureProducer,
    topic: String,
}

impl EventPublisher {
    /// Returns a new publisher for the configured topic.
    pub fn new(config: &BufferConfiguration) -> Result<Self, BufferError> {
        let producer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("message.timeout.ms", "30000")
            .create()
            .map_err(BufferError::Create)?;

        Ok(Self {
            producer,
            topic: config.topic.clone(),
        })
    }

    /// Publishes one event keyed by actor identifier and awaits the broker
    /// acknowledgment.
    ///
    /// Waits without timeout for local queue space when the client buffers
    /// faster than the broker accepts, which is how backpressure reaches the
    /// stream client: an unacknowledged event blocks the cursor.
    pub async fn publish(&self, key: &str, payload: &str) -> Result<(), BufferError> {
        let record = FutureRecord::to(&self.topic).key(key).payload(payload);

        self.producer
            .send(record, Timeout::Never)
            .await
            .map_err(|(err, _message)| BufferError::Publish(err))?;

        debug!("Published event with key {} to {}", key, self.topic);

        Ok(())
    }
}

impl std::fmt::Debug for EventPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventPublisher")
            .field("topic", &self.topic)
            .finish()
    }
}
