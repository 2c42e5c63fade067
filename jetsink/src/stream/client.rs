// SPDX-License-Identifier: AGPL-3.0-or-later

use std::time::Duration;

use async_stream::stream;
use futures::{Stream, StreamExt};
use log::{debug, info, warn};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use crate::config::StreamConfiguration;
use crate::event::RawEventEnvelope;
use crate::stream::{Cursor, StreamFrame};

/// First reconnect delay after a connection loss.
const RECONNECT_DELAY_MIN: Duration = Duration::from_secs(1);

/// Upper bound for the exponential reconnect backoff.
const RECONNECT_DELAY_MAX: Duration = Duration::from_secs(60);

/// Client holding a long-lived subscription to the upstream feed.
///
/// The client retries transient connection failures forever with bounded
/// exponential backoff, this is a daemon designed to run indefinitely. Every
/// (re)connect builds its subscription URL from the shared [`Cursor`] so no
/// acknowledged event is delivered twice and no unacknowledged one skipped.
#[derive(Debug)]
pub struct JetstreamClient {
    config: StreamConfiguration,
}

impl JetstreamClient {
    /// Returns a new client for the configured feed endpoint.
    pub fn new(config: StreamConfiguration) -> Self {
        Self { config }
    }

    /// Full subscription URL for one connection attempt.
    ///
    /// Query parameters are assembled by hand since the feed expects
    /// duplicate keys for collection and actor filters.
    fn subscribe_url(&self, cursor: Option<i64>) -> String {
        let mut params: Vec<String> = Vec::new();

        if let Some(cursor) = cursor {
            params.push(format!("cursor={}", cursor));
        }

        if self.config.max_message_size_bytes > 0 {
            params.push(format!(
                "maxMessageSizeBytes={}",
                self.config.max_message_size_bytes
            ));
        }

        for collection in &self.config.wanted_collections {
            params.push(format!("wantedCollections={}", collection));
        }

        for did in &self.config.wanted_dids {
            params.push(format!("wantedDids={}", did));
        }

        if params.is_empty() {
            self.config.endpoint.clone()
        } else {
            format!("{}?{}", self.config.endpoint, params.join("&"))
        }
    }

    /// Lazy, effectively infinite sequence of frames from the feed.
    ///
    /// The stream never ends on its own; it reconnects on every connection
    /// loss and resumes from the shared cursor. Dropping it closes the
    /// connection.
    pub fn frames(&self, cursor: Cursor) -> impl Stream<Item = StreamFrame> + '_ {
        stream! {
            let mut delay = RECONNECT_DELAY_MIN;

            loop {
                let url = self.subscribe_url(cursor.get());
                info!("Connecting to feed at {}", self.config.endpoint);

                match connect_async(url.as_str()).await {
                    Ok((mut connection, _response)) => {
                        info!("Connected to feed");

                        // Connection established, start over with short delays
                        delay = RECONNECT_DELAY_MIN;

                        while let Some(message) = connection.next().await {
                            match message {
                                Ok(Message::Text(payload)) => {
                                    yield to_frame(payload);
                                }
                                Ok(Message::Binary(payload)) => {
                                    let payload =
                                        String::from_utf8_lossy(&payload).into_owned();
                                    yield to_frame(payload);
                                }
                                // Keepalive traffic, answered by the socket
                                // implementation
                                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => (),
                                Ok(Message::Close(frame)) => {
                                    info!("Feed closed the connection: {:?}", frame);
                                    break;
                                }
                                Ok(other) => {
                                    debug!("Ignoring unexpected frame: {:?}", other);
                                }
                                Err(err) => {
                                    warn!("Feed connection failed: {}", err);
                                    break;
                                }
                            }
                        }
                    }
                    Err(err) => {
                        warn!("Could not connect to feed: {}", err);
                    }
                }

                info!("Reconnecting to feed in {:?}", delay);
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(RECONNECT_DELAY_MAX);
            }
        }
    }
}

/// Wraps a payload into a frame with its best-effort envelope.
fn to_frame(payload: String) -> StreamFrame {
    let envelope = match serde_json::from_str::<RawEventEnvelope>(&payload) {
        Ok(envelope) => Some(envelope),
        Err(err) => {
            // Forwarded anyway: the persistence worker archives it with
            // processed = false for later inspection
            warn!("Received malformed frame from feed: {}", err);
            None
        }
    };

    StreamFrame { payload, envelope }
}

#[cfg(test)]
mod tests {
    use crate::config::StreamConfiguration;

    use super::{to_frame, JetstreamClient};

    fn test_client() -> JetstreamClient {
        JetstreamClient::new(StreamConfiguration {
            endpoint: "wss://feed.example/subscribe".into(),
            wanted_collections: vec![
                "app.bsky.feed.post".into(),
                "app.bsky.feed.repost".into(),
            ],
            wanted_dids: Vec::new(),
            max_message_size_bytes: 0,
            cursor: None,
        })
    }

    #[test]
    fn subscribe_url_repeats_collection_params() {
        let client = test_client();

        assert_eq!(
            client.subscribe_url(None),
            "wss://feed.example/subscribe\
                ?wantedCollections=app.bsky.feed.post\
                &wantedCollections=app.bsky.feed.repost"
        );
    }

    #[test]
    fn subscribe_url_resumes_from_cursor() {
        let client = test_client();

        assert!(client
            .subscribe_url(Some(1725911162329308))
            .starts_with("wss://feed.example/subscribe?cursor=1725911162329308&"));
    }

    #[test]
    fn subscribe_url_without_parameters_is_plain_endpoint() {
        let client = JetstreamClient::new(StreamConfiguration {
            endpoint: "wss://feed.example/subscribe".into(),
            wanted_collections: Vec::new(),
            wanted_dids: Vec::new(),
            max_message_size_bytes: 0,
            cursor: None,
        });

        assert_eq!(client.subscribe_url(None), "wss://feed.example/subscribe");
    }

    #[test]
    fn malformed_payloads_keep_flowing_without_envelope() {
        let frame = to_frame("{ not json".into());
        assert!(frame.envelope.is_none());
        assert_eq!(frame.payload, "{ not json");

        let frame = to_frame(
            r#"{ "did": "did:plc:abc", "time_us": 42, "kind": "commit" }"#.into(),
        );
        let envelope = frame.envelope.unwrap();
        assert_eq!(envelope.did, "did:plc:abc");
        assert_eq!(envelope.time_us, 42);
    }
}
