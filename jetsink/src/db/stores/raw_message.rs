// SPDX-License-Identifier: AGPL-3.0-or-later

use sqlx::{query, query_as, query_scalar, AnyConnection};

use crate::db::errors::SqlStoreError;
use crate::db::models::RawMessageRow;
use crate::db::SqlStore;

/// Appends an event to the raw archive with `processed = false`.
///
/// Idempotent on the natural key `(actor_id, time_us, kind)`: redelivering
/// the same event leaves the existing row (and its `processed` flag)
/// untouched.
pub(crate) async fn archive(
    conn: &mut AnyConnection,
    actor_id: &str,
    time_us: i64,
    kind: &str,
    raw_data: &str,
) -> Result<(), SqlStoreError> {
    query(
        "
        INSERT INTO
            raw_messages (
                actor_id,
                time_us,
                kind,
                raw_data,
                processed
            )
        VALUES
            ($1, $2, $3, $4, $5)
        ON CONFLICT (actor_id, time_us, kind) DO NOTHING
        ",
    )
    .bind(actor_id)
    .bind(time_us)
    .bind(kind)
    .bind(raw_data)
    .bind(false)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Flips the `processed` flag of an archived event.
pub(crate) async fn mark_processed(
    conn: &mut AnyConnection,
    actor_id: &str,
    time_us: i64,
    kind: &str,
) -> Result<(), SqlStoreError> {
    let result = query(
        "
        UPDATE
            raw_messages
        SET
            processed = $4
        WHERE
            actor_id = $1
            AND time_us = $2
            AND kind = $3
        ",
    )
    .bind(actor_id)
    .bind(time_us)
    .bind(kind)
    .bind(true)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() != 1 {
        return Err(SqlStoreError::WriteFailed("raw_messages"));
    }

    Ok(())
}

impl SqlStore {
    /// Get an archived event by its natural key.
    pub async fn get_raw_message(
        &self,
        actor_id: &str,
        time_us: i64,
        kind: &str,
    ) -> Result<Option<RawMessageRow>, SqlStoreError> {
        let raw_message = query_as::<_, RawMessageRow>(
            "
            SELECT
                actor_id,
                time_us,
                kind,
                raw_data,
                processed
            FROM
                raw_messages
            WHERE
                actor_id = $1
                AND time_us = $2
                AND kind = $3
            ",
        )
        .bind(actor_id)
        .bind(time_us)
        .bind(kind)
        .fetch_optional(&self.pool)
        .await?;

        Ok(raw_message)
    }

    /// Number of archived events which have not produced derived rows yet.
    pub async fn count_unprocessed(&self) -> Result<i64, SqlStoreError> {
        let count = query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM raw_messages WHERE processed = $1",
        )
        .bind(false)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use crate::test_helpers::initialize_store;

    use super::{archive, mark_processed};

    #[tokio::test]
    async fn archive_is_idempotent_on_natural_key() {
        let store = initialize_store().await;
        let mut conn = store.pool.acquire().await.unwrap();

        archive(&mut conn, "did:plc:abc", 10, "commit", "{\"a\":1}")
            .await
            .unwrap();
        mark_processed(&mut conn, "did:plc:abc", 10, "commit")
            .await
            .unwrap();

        // Redelivery of the already processed event leaves the row untouched
        archive(&mut conn, "did:plc:abc", 10, "commit", "{\"a\":1}")
            .await
            .unwrap();
        drop(conn);

        let row = store
            .get_raw_message("did:plc:abc", 10, "commit")
            .await
            .unwrap()
            .unwrap();
        assert!(row.processed);
        assert_eq!(store.count_unprocessed().await.unwrap(), 0);
    }
}
