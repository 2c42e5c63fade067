// SPDX-License-Identifier: AGPL-3.0-or-later

use sqlx::{query, query_as, AnyConnection};

use crate::db::errors::SqlStoreError;
use crate::db::models::UserRow;
use crate::db::SqlStore;

/// Applies an identity change: insert the actor or update handle and status.
///
/// The update is gated on `last_seq` so that a redelivered or late event can
/// never overwrite newer state (last-writer-wins by sequence, not by arrival
/// order). A gated-out update affects zero rows which is a regular outcome,
/// not an error.
pub(crate) async fn upsert_identity(
    conn: &mut AnyConnection,
    actor_id: &str,
    handle: &str,
    seq: i64,
    source_timestamp: Option<&str>,
) -> Result<(), SqlStoreError> {
    query(
        "
        INSERT INTO
            users (
                actor_id,
                handle,
                active,
                last_seq,
                source_timestamp
            )
        VALUES
            ($1, $2, $3, $4, $5)
        ON CONFLICT (actor_id) DO UPDATE SET
            handle = excluded.handle,
            active = excluded.active,
            last_seq = excluded.last_seq,
            source_timestamp = excluded.source_timestamp
        WHERE
            users.last_seq < excluded.last_seq
        ",
    )
    .bind(actor_id)
    .bind(handle)
    .bind(true)
    .bind(seq)
    .bind(source_timestamp)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Applies an account status change, sequence-gated like `upsert_identity`.
///
/// The handle is only used when the actor has never been seen before; an
/// existing row keeps its current handle.
pub(crate) async fn upsert_account(
    conn: &mut AnyConnection,
    actor_id: &str,
    placeholder_handle: &str,
    active: bool,
    seq: i64,
    source_timestamp: Option<&str>,
) -> Result<(), SqlStoreError> {
    query(
        "
        INSERT INTO
            users (
                actor_id,
                handle,
                active,
                last_seq,
                source_timestamp
            )
        VALUES
            ($1, $2, $3, $4, $5)
        ON CONFLICT (actor_id) DO UPDATE SET
            active = excluded.active,
            last_seq = excluded.last_seq,
            source_timestamp = excluded.source_timestamp
        WHERE
            users.last_seq < excluded.last_seq
        ",
    )
    .bind(actor_id)
    .bind(placeholder_handle)
    .bind(active)
    .bind(seq)
    .bind(source_timestamp)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Makes sure a row for this actor exists so that posts can reference it.
///
/// Inserts a placeholder with sequence zero which any later account or
/// identity event overwrites. A no-op when the actor is already known.
pub(crate) async fn ensure_exists(
    conn: &mut AnyConnection,
    actor_id: &str,
    placeholder_handle: &str,
) -> Result<(), SqlStoreError> {
    query(
        "
        INSERT INTO
            users (
                actor_id,
                handle,
                active,
                last_seq
            )
        VALUES
            ($1, $2, $3, $4)
        ON CONFLICT (actor_id) DO NOTHING
        ",
    )
    .bind(actor_id)
    .bind(placeholder_handle)
    .bind(true)
    .bind(0_i64)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

impl SqlStore {
    /// Get a user from the database by its actor id.
    pub async fn get_user(&self, actor_id: &str) -> Result<Option<UserRow>, SqlStoreError> {
        let user = query_as::<_, UserRow>(
            "
            SELECT
                actor_id,
                handle,
                active,
                last_seq,
                source_timestamp
            FROM
                users
            WHERE
                actor_id = $1
            ",
        )
        .bind(actor_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }
}
