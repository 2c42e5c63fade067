// SPDX-License-Identifier: AGPL-3.0-or-later

use std::time::Duration;

use anyhow::Result;
use log::{info, warn};

use crate::buffer::{BufferedEvent, EventConsumer};
use crate::bus::{ServiceMessage, ServiceSender};
use crate::context::Context;
use crate::manager::Shutdown;
use crate::persister::{Outcome, Persister};

/// First retry delay for transient consume and storage failures.
const RETRY_DELAY_MIN: Duration = Duration::from_secs(1);

/// Upper bound for the exponential retry backoff.
const RETRY_DELAY_MAX: Duration = Duration::from_secs(60);

/// Persistence daemon: consumes buffered events and applies them to the
/// relational store.
///
/// The consumer offset is committed only after the persistence transaction
/// succeeded. On shutdown the in-flight unit of work finishes or is
/// abandoned uncommitted; either way the next start resumes from the last
/// committed offset and idempotent persistence absorbs the redelivery.
pub async fn persister_service(
    context: Context,
    shutdown: Shutdown,
    tx: ServiceSender,
) -> Result<()> {
    let consumer = EventConsumer::new(&context.config.buffer)?;
    let persister = Persister::new(context.store.clone(), &context.config);

    let consume = async {
        loop {
            let event = match consumer.recv().await {
                Ok(event) => event,
                Err(err) => {
                    warn!("{}, retrying in {:?}", err, RETRY_DELAY_MIN);
                    tokio::time::sleep(RETRY_DELAY_MIN).await;
                    continue;
                }
            };

            let outcome = process_with_retry(&persister, &event).await;

            // The offset advances past malformed events as well. A failed
            // commit is only logged: redelivery is safe since persistence is
            // idempotent.
            if let Err(err) = consumer.commit(&event) {
                warn!("{}", err);
            }

            if let Outcome::Persisted { actor } = outcome {
                let _ = tx.send(ServiceMessage::EventPersisted { actor });
            }
        }
    };

    tokio::select! {
        _ = shutdown => {
            info!("Persister service received shutdown signal");
        }
        _ = consume => (),
    }

    Ok(())
}

/// Applies one event, retrying transient storage failures forever with
/// bounded exponential backoff. The offset of the event stays uncommitted
/// until this returns.
async fn process_with_retry(persister: &Persister, event: &BufferedEvent) -> Outcome {
    let mut delay = RETRY_DELAY_MIN;

    loop {
        match persister.process(event.offset, &event.payload).await {
            Ok(outcome) => return outcome,
            Err(err) => {
                warn!(
                    "Persisting event at offset {} failed: {}, retrying in {:?}",
                    event.offset, err, delay
                );
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(RETRY_DELAY_MAX);
            }
        }
    }
}
