// SPDX-License-Identifier: AGPL-3.0-or-later

use log::debug;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::Message;
use rdkafka::{Offset, TopicPartitionList};

use crate::buffer::BufferError;
use crate::config::BufferConfiguration;

/// One event read from the buffer, still uncommitted.
///
/// The offset is the durable ordering key of the pipeline. It only becomes
/// part of the consumer group's committed position once the persistence
/// transaction for this event succeeded.
#[derive(Clone, Debug)]
pub struct BufferedEvent {
    /// Partition the event was read from.
    pub partition: i32,

    /// Offset of the event within its partition.
    pub offset: i64,

    /// Partition key, the actor identifier. Empty for events published
    /// without an extractable actor.
    pub key: String,

    /// Raw payload text as published by the stream client.
    pub payload: String,
}

/// Reads raw events from the partitioned log on behalf of one consumer
/// group.
pub struct EventConsumer {
    consumer: StreamConsumer,
    topic: String,
}

impl EventConsumer {
    /// Returns a new consumer subscribed to the configured topic.
    ///
    /// Auto-commit is disabled: offsets only advance through an explicit
    /// [`EventConsumer::commit`] after successful persistence, so a crash
    /// mid-unit causes redelivery instead of loss.
    pub fn new(config: &BufferConfiguration) -> Result<Self, BufferError> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("group.id", &config.consumer_group)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest")
            .set("enable.partition.eof", "false")
            .create()
            .map_err(BufferError::Create)?;

        consumer
            .subscribe(&[config.topic.as_str()])
            .map_err(BufferError::Create)?;

        Ok(Self {
            consumer,
            topic: config.topic.clone(),
        })
    }

    /// Awaits the next buffered event.
    pub async fn recv(&self) -> Result<BufferedEvent, BufferError> {
        let message = self.consumer.recv().await.map_err(BufferError::Consume)?;

        let key = message
            .key()
            .map(|key| String::from_utf8_lossy(key).into_owned())
            .unwrap_or_default();

        let payload = message
            .payload()
            .map(|payload| String::from_utf8_lossy(payload).into_owned())
            .unwrap_or_default();

        Ok(BufferedEvent {
            partition: message.partition(),
            offset: message.offset(),
            key,
            payload,
        })
    }

    /// Commits the offset of a processed event synchronously.
    ///
    /// Committing marks the position _after_ the event so a restart resumes
    /// with the next one, neither redelivering it nor skipping its
    /// successor.
    pub fn commit(&self, event: &BufferedEvent) -> Result<(), BufferError> {
        let mut offsets = TopicPartitionList::new();
        offsets
            .add_partition_offset(&self.topic, event.partition, Offset::Offset(event.offset + 1))
            .map_err(BufferError::Commit)?;

        self.consumer
            .commit(&offsets, CommitMode::Sync)
            .map_err(BufferError::Commit)?;

        debug!(
            "Committed offset {} on partition {} of {}",
            event.offset + 1,
            event.partition,
            self.topic
        );

        Ok(())
    }
}

impl std::fmt::Debug for EventConsumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventConsumer")
            .field("topic", &self.topic)
            .finish()
    }
}
