// SPDX-License-Identifier: AGPL-3.0-or-later

//! Adapter onto the durable buffer between the two pipeline stages.
//!
//! The buffer is a partitioned, append-only log keyed by actor identifier:
//! all events of one actor land in the same partition and stay strictly
//! ordered relative to each other, while the consumer group keeps an
//! independent, replayable offset. The adapter only handles key selection,
//! delivery and error mapping; payloads travel as the unmodified wire text.
mod consumer;
mod publisher;

pub use consumer::{BufferedEvent, EventConsumer};
pub use publisher::EventPublisher;

use rdkafka::error::KafkaError;

/// Failures of the buffer adapter.
///
/// Everything except `Create` is transient by taxonomy: publishing and
/// consuming are retried with backoff by the owning service, while client
/// creation failures surface at startup and stop the node.
#[derive(thiserror::Error, Debug)]
pub enum BufferError {
    /// The broker client could not be created or subscribed.
    #[error("Could not set up buffer client: {0}")]
    Create(KafkaError),

    /// Publishing an event was rejected or timed out.
    #[error("Could not publish event to buffer: {0}")]
    Publish(KafkaError),

    /// Polling the next buffered event failed.
    #[error("Could not consume event from buffer: {0}")]
    Consume(KafkaError),

    /// Committing a consumer offset failed.
    #[error("Could not commit buffer offset: {0}")]
    Commit(KafkaError),
}
