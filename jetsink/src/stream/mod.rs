// SPDX-License-Identifier: AGPL-3.0-or-later

//! Client for the upstream feed and the ingest service publishing its
//! frames into the durable buffer.
mod client;
mod service;

pub use client::JetstreamClient;
pub use service::stream_service;

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use crate::event::RawEventEnvelope;

/// One frame received from the feed.
///
/// The payload is the unmodified wire text; it travels through the buffer
/// and into the raw archive as-is. The envelope is a best-effort extraction
/// used for the partition key and the resume cursor. Frames which fail even
/// the envelope parse are still emitted so they reach the archive instead of
/// being silently dropped.
#[derive(Clone, Debug)]
pub struct StreamFrame {
    /// Raw payload text as delivered by the feed.
    pub payload: String,

    /// Best-effort envelope, `None` for malformed payloads.
    pub envelope: Option<RawEventEnvelope>,
}

/// Shared resume position of the feed subscription.
///
/// The ingest service advances the cursor only after a frame has been
/// durably handed off to the buffer; reconnects therefore always resume from
/// the last acknowledged position and never from an unacknowledged one.
#[derive(Clone, Debug)]
pub struct Cursor(Arc<AtomicI64>);

impl Cursor {
    /// Returns a new cursor, optionally starting from a configured position.
    pub fn new(start: Option<u64>) -> Self {
        let start = start.map(|cursor| cursor as i64).unwrap_or(-1);
        Self(Arc::new(AtomicI64::new(start)))
    }

    /// Current resume position, `None` when nothing was acknowledged yet.
    pub fn get(&self) -> Option<i64> {
        let position = self.0.load(Ordering::SeqCst);
        if position < 0 {
            None
        } else {
            Some(position)
        }
    }

    /// Moves the cursor forward. Positions never move backwards, late calls
    /// with smaller values are ignored.
    pub fn advance(&self, position: i64) {
        self.0.fetch_max(position, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::Cursor;

    #[test]
    fn cursor_only_moves_forward() {
        let cursor = Cursor::new(None);
        assert_eq!(cursor.get(), None);

        cursor.advance(100);
        cursor.advance(50);
        assert_eq!(cursor.get(), Some(100));

        let resumed = Cursor::new(Some(1725911162329308));
        assert_eq!(resumed.get(), Some(1725911162329308));
    }
}
