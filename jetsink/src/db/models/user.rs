// SPDX-License-Identifier: AGPL-3.0-or-later

use serde::Serialize;
use sqlx::FromRow;

/// Struct representing the actual SQL row of `users`.
///
/// One row per actor. The row reflects the latest state the pipeline has
/// seen for this actor, guarded by `last_seq` so that late redeliveries can
/// never roll the row back.
#[derive(FromRow, Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct UserRow {
    /// Decentralized identifier, stable identity key of the actor.
    pub actor_id: String,

    /// Mutable display handle.
    pub handle: String,

    /// Whether the account is currently active on the network.
    pub active: bool,

    /// Highest buffer offset that produced this row's current state.
    pub last_seq: i64,

    /// Source-side timestamp of the event that produced this state.
    pub source_timestamp: Option<String>,
}
