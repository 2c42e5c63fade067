// SPDX-License-Identifier: AGPL-3.0-or-later

use std::time::Duration;

use anyhow::Result;
use futures::StreamExt;
use log::{info, warn};

use crate::buffer::EventPublisher;
use crate::bus::{ServiceMessage, ServiceSender};
use crate::context::Context;
use crate::manager::Shutdown;
use crate::stream::{Cursor, JetstreamClient, StreamFrame};

/// First retry delay for a failed publish into the buffer.
const PUBLISH_RETRY_MIN: Duration = Duration::from_secs(1);

/// Upper bound for the exponential publish retry backoff.
const PUBLISH_RETRY_MAX: Duration = Duration::from_secs(30);

/// Ingest daemon: reads frames from the upstream feed and hands them off to
/// the durable buffer.
///
/// The service pulls the next frame only after the previous one has been
/// acknowledged by the buffer, so a full or unavailable buffer stalls the
/// feed subscription instead of dropping events. On shutdown an in-flight,
/// unacknowledged frame is abandoned without advancing the cursor; the next
/// start redelivers it.
pub async fn stream_service(
    context: Context,
    shutdown: Shutdown,
    tx: ServiceSender,
) -> Result<()> {
    let publisher = EventPublisher::new(&context.config.buffer)?;
    let client = JetstreamClient::new(context.config.stream.clone());
    let cursor = Cursor::new(context.config.stream.cursor);

    let ingest = async {
        let mut frames = Box::pin(client.frames(cursor.clone()));

        while let Some(frame) = frames.next().await {
            publish_frame(&publisher, &tx, &cursor, frame).await;
        }
    };

    tokio::select! {
        _ = shutdown => {
            info!("Stream service received shutdown signal");
        }
        _ = ingest => (),
    }

    Ok(())
}

/// Publishes one frame, retrying transient buffer failures forever, and
/// advances the cursor once the frame is durably buffered.
async fn publish_frame(
    publisher: &EventPublisher,
    tx: &ServiceSender,
    cursor: &Cursor,
    frame: StreamFrame,
) {
    let key = frame
        .envelope
        .as_ref()
        .map(|envelope| envelope.did.as_str())
        .unwrap_or_default();

    let mut delay = PUBLISH_RETRY_MIN;
    loop {
        match publisher.publish(key, &frame.payload).await {
            Ok(()) => break,
            Err(err) => {
                warn!("{}, retrying in {:?}", err, delay);
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(PUBLISH_RETRY_MAX);
            }
        }
    }

    // Only a durably buffered frame moves the resume position. Malformed
    // frames carry no envelope and leave the cursor untouched.
    if let Some(envelope) = &frame.envelope {
        cursor.advance(envelope.time_us);
        let _ = tx.send(ServiceMessage::EventBuffered {
            actor: envelope.did.clone(),
            cursor: envelope.time_us,
        });
    }
}
