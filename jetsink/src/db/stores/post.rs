// SPDX-License-Identifier: AGPL-3.0-or-later

use serde_json::Value;
use sqlx::{query, query_as, AnyConnection};

use crate::db::errors::SqlStoreError;
use crate::db::models::PostRow;
use crate::db::SqlStore;

const POST_COLUMNS: &str = "
    uri,
    content_id,
    text,
    langs,
    record_type,
    source_created_at,
    revision,
    record_key,
    collection,
    last_operation,
    owner_actor_id,
    parent_content_id,
    parent_uri,
    root_content_id,
    root_uri,
    extra
";

/// Insert a post or replace all its mutable columns when the uri is already
/// known.
///
/// Replaying the same commit is a no-op on final state; the unique `uri`
/// constraint is the schema-level second line of defense against duplicate
/// rows.
pub(crate) async fn upsert(conn: &mut AnyConnection, post: &PostRow) -> Result<(), SqlStoreError> {
    query(
        "
        INSERT INTO
            posts (
                uri,
                content_id,
                text,
                langs,
                record_type,
                source_created_at,
                revision,
                record_key,
                collection,
                last_operation,
                owner_actor_id,
                parent_content_id,
                parent_uri,
                root_content_id,
                root_uri,
                extra
            )
        VALUES
            ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
        ON CONFLICT (uri) DO UPDATE SET
            content_id = excluded.content_id,
            text = excluded.text,
            langs = excluded.langs,
            record_type = excluded.record_type,
            source_created_at = excluded.source_created_at,
            revision = excluded.revision,
            last_operation = excluded.last_operation,
            owner_actor_id = excluded.owner_actor_id,
            parent_content_id = excluded.parent_content_id,
            parent_uri = excluded.parent_uri,
            root_content_id = excluded.root_content_id,
            root_uri = excluded.root_uri,
            extra = excluded.extra
        ",
    )
    .bind(&post.uri)
    .bind(&post.content_id)
    .bind(&post.text)
    .bind(&post.langs)
    .bind(&post.record_type)
    .bind(&post.source_created_at)
    .bind(&post.revision)
    .bind(&post.record_key)
    .bind(&post.collection)
    .bind(&post.last_operation)
    .bind(&post.owner_actor_id)
    .bind(&post.parent_content_id)
    .bind(&post.parent_uri)
    .bind(&post.root_content_id)
    .bind(&post.root_uri)
    .bind(&post.extra)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Marks a post as deleted while retaining the row for the audit trail.
///
/// Flips `last_operation` to `delete` and records the deletion time in the
/// `extra` bag. Returns false when no post with this uri exists, which is a
/// regular outcome since deletes may refer to records ingested before the
/// pipeline started.
pub(crate) async fn soft_delete(
    conn: &mut AnyConnection,
    uri: &str,
    deleted_at_us: i64,
) -> Result<bool, SqlStoreError> {
    let post = query_as::<_, PostRow>(&format!(
        "SELECT {} FROM posts WHERE uri = $1",
        POST_COLUMNS
    ))
    .bind(uri)
    .fetch_optional(&mut *conn)
    .await?;

    let post = match post {
        Some(post) => post,
        None => return Ok(false),
    };

    let mut extra = post.extra_fields().unwrap_or_default();
    extra.insert("deleted_at_us".into(), Value::from(deleted_at_us));
    let extra = serde_json::to_string(&extra).expect("Maps of JSON values always serialize");

    let result = query(
        "
        UPDATE
            posts
        SET
            last_operation = $2,
            extra = $3
        WHERE
            uri = $1
        ",
    )
    .bind(uri)
    .bind("delete")
    .bind(extra)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() != 1 {
        return Err(SqlStoreError::WriteFailed("posts"));
    }

    Ok(true)
}

impl SqlStore {
    /// Get a post from the database by its uri.
    pub async fn get_post(&self, uri: &str) -> Result<Option<PostRow>, SqlStoreError> {
        let post = query_as::<_, PostRow>(&format!(
            "SELECT {} FROM posts WHERE uri = $1",
            POST_COLUMNS
        ))
        .bind(uri)
        .fetch_optional(&self.pool)
        .await?;

        Ok(post)
    }

    /// Get all posts of one actor, newest first.
    pub async fn get_posts_by_owner(
        &self,
        actor_id: &str,
    ) -> Result<Vec<PostRow>, SqlStoreError> {
        let posts = query_as::<_, PostRow>(&format!(
            "
            SELECT {}
            FROM posts
            WHERE owner_actor_id = $1
            ORDER BY source_created_at DESC
            ",
            POST_COLUMNS
        ))
        .bind(actor_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(posts)
    }
}

#[cfg(test)]
mod tests {
    use crate::db::models::PostRow;
    use crate::test_helpers::initialize_store;

    use super::{soft_delete, upsert};

    fn test_post(uri: &str) -> PostRow {
        PostRow {
            uri: uri.to_string(),
            content_id: Some("bafyreidc6sydkkbchcyg62v77wbhzvb2mvytlms".into()),
            text: Some("hello world".into()),
            langs: Some("[\"en\"]".into()),
            record_type: Some("app.bsky.feed.post".into()),
            source_created_at: Some("2024-09-09T19:46:02.102Z".into()),
            revision: Some("3l3qo2vutsw2b".into()),
            record_key: "3l3qo2vuowo2b".into(),
            collection: "app.bsky.feed.post".into(),
            last_operation: "create".into(),
            owner_actor_id: Some("did:plc:abc".into()),
            parent_content_id: None,
            parent_uri: None,
            root_content_id: None,
            root_uri: None,
            extra: None,
        }
    }

    #[tokio::test]
    async fn upsert_replaces_existing_row() {
        let store = initialize_store().await;
        let mut conn = store.pool.acquire().await.unwrap();

        let uri = "at://did:plc:abc/app.bsky.feed.post/3l3qo2vuowo2b";
        upsert(&mut conn, &test_post(uri)).await.unwrap();

        let mut updated = test_post(uri);
        updated.text = Some("edited".into());
        updated.last_operation = "update".into();
        upsert(&mut conn, &updated).await.unwrap();

        // Return the connection, reads acquire their own
        drop(conn);

        let post = store.get_post(uri).await.unwrap().unwrap();
        assert_eq!(post.text.as_deref(), Some("edited"));
        assert_eq!(post.last_operation, "update");
        assert_eq!(post.langs_list(), Some(vec!["en".to_string()]));
    }

    #[tokio::test]
    async fn soft_delete_retains_row() {
        let store = initialize_store().await;
        let mut conn = store.pool.acquire().await.unwrap();

        let uri = "at://did:plc:abc/app.bsky.feed.post/3l3qo2vuowo2b";
        upsert(&mut conn, &test_post(uri)).await.unwrap();

        assert!(soft_delete(&mut conn, uri, 1725911162329308).await.unwrap());
        drop(conn);

        let post = store.get_post(uri).await.unwrap().unwrap();
        assert_eq!(post.last_operation, "delete");
        assert_eq!(post.text.as_deref(), Some("hello world"));

        let extra = post.extra_fields().unwrap();
        assert_eq!(extra.get("deleted_at_us").and_then(|v| v.as_i64()), Some(1725911162329308));
    }

    #[tokio::test]
    async fn soft_delete_of_unknown_uri_is_a_noop() {
        let store = initialize_store().await;
        let mut conn = store.pool.acquire().await.unwrap();

        assert!(!soft_delete(&mut conn, "at://did:plc:abc/app.bsky.feed.post/missing", 0)
            .await
            .unwrap());
    }
}
