// SPDX-License-Identifier: AGPL-3.0-or-later

use serde::Serialize;
use sqlx::FromRow;

/// Struct representing the actual SQL row of `raw_messages`.
///
/// Append-only audit trail of everything the feed delivered, identified by
/// the natural key `(actor_id, time_us, kind)`. Nothing in a row is ever
/// mutated except the `processed` flag.
#[derive(FromRow, Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct RawMessageRow {
    /// Actor the event belongs to. Empty for payloads from which no actor
    /// could be extracted.
    pub actor_id: String,

    /// Microsecond timestamp from the source.
    pub time_us: i64,

    /// Event kind, `unknown` for undecodable payloads.
    pub kind: String,

    /// Full original payload, unmodified.
    pub raw_data: String,

    /// Flips to true once the derived rows were committed successfully.
    pub processed: bool,
}
