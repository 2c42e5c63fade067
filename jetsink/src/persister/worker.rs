// SPDX-License-Identifier: AGPL-3.0-or-later

use std::time::{SystemTime, UNIX_EPOCH};

use log::{debug, warn};
use sqlx::AnyConnection;

use crate::config::Configuration;
use crate::db::errors::SqlStoreError;
use crate::db::models::PostRow;
use crate::db::stores::{post, raw_message, user};
use crate::db::SqlStore;
use crate::event::{
    CommitEvent, CommitOperation, EventKind, RawEvent, RawEventEnvelope, RecordBody,
};

/// Maps one buffered event onto the relational schema.
///
/// Every event is applied as a single transaction: archive the raw payload,
/// derive users and posts rows, flip the archive row to processed. All
/// writes upsert on natural keys and user updates are gated on the buffer
/// offset, so re-processing a redelivered event is a no-op on final state.
#[derive(Clone, Debug)]
pub struct Persister {
    store: SqlStore,
    post_collection_prefix: String,
}

/// What processing one event amounted to.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Outcome {
    /// The event was applied and its archive row marked processed.
    Persisted {
        /// Actor the event belongs to.
        actor: String,
    },

    /// The event could not be interpreted. It is archived with
    /// `processed = false` for later inspection; the consumer offset still
    /// advances past it.
    Malformed,
}

impl Persister {
    /// Returns a new persistence worker on top of the given store.
    pub fn new(store: SqlStore, config: &Configuration) -> Self {
        Self {
            store,
            post_collection_prefix: config.post_collection_prefix.clone(),
        }
    }

    /// Processes one buffered payload.
    ///
    /// `offset` is the buffer offset of the event, the durable ordering key
    /// used for the sequence-gated user updates.
    ///
    /// Returns an error only for transient storage failures which the caller
    /// retries; everything wrong with the payload itself ends up as
    /// [`Outcome::Malformed`] so one poisoned record never blocks the
    /// pipeline.
    pub async fn process(&self, offset: i64, payload: &str) -> Result<Outcome, SqlStoreError> {
        let event = match serde_json::from_str::<RawEvent>(payload) {
            Ok(event) => event,
            Err(err) => {
                warn!("Skipping malformed event at offset {}: {}", offset, err);
                self.archive_malformed(payload).await?;
                return Ok(Outcome::Malformed);
            }
        };

        match self.apply(offset, &event, payload).await {
            Ok(outcome) => Ok(outcome),
            // The schema caught what the upserts did not: treat like any
            // other uninterpretable event instead of retrying it forever
            Err(err) if err.is_constraint_violation() => {
                warn!(
                    "Skipping constraint-violating event at offset {}: {}",
                    offset, err
                );
                self.archive_malformed(payload).await?;
                Ok(Outcome::Malformed)
            }
            Err(err) => Err(err),
        }
    }

    /// Applies a decoded event in one transaction.
    async fn apply(
        &self,
        offset: i64,
        event: &RawEvent,
        payload: &str,
    ) -> Result<Outcome, SqlStoreError> {
        let mut tx = self.store.pool.begin().await?;

        raw_message::archive(
            &mut tx,
            &event.did,
            event.time_us,
            event.kind.as_str(),
            payload,
        )
        .await?;

        let outcome = if self.apply_derived(&mut tx, offset, event).await? {
            raw_message::mark_processed(&mut tx, &event.did, event.time_us, event.kind.as_str())
                .await?;

            Outcome::Persisted {
                actor: event.did.clone(),
            }
        } else {
            // Archived for inspection but left unprocessed
            Outcome::Malformed
        };

        tx.commit().await?;

        Ok(outcome)
    }

    /// Derives users and posts rows from the event body.
    ///
    /// Returns false when the body does not match the announced kind, which
    /// leaves the archived event unprocessed.
    async fn apply_derived(
        &self,
        conn: &mut AnyConnection,
        offset: i64,
        event: &RawEvent,
    ) -> Result<bool, SqlStoreError> {
        match event.kind {
            EventKind::Identity => match &event.identity {
                Some(identity) => {
                    user::upsert_identity(
                        conn,
                        &event.did,
                        &identity.handle,
                        offset,
                        Some(&identity.time),
                    )
                    .await?;

                    Ok(true)
                }
                None => {
                    warn!("Identity event without body from {}", event.did);
                    Ok(false)
                }
            },
            EventKind::Account => match &event.account {
                Some(account) => {
                    user::upsert_account(
                        conn,
                        &event.did,
                        &placeholder_handle("user", &event.did),
                        account.active,
                        offset,
                        Some(&account.time),
                    )
                    .await?;

                    Ok(true)
                }
                None => {
                    warn!("Account event without body from {}", event.did);
                    Ok(false)
                }
            },
            EventKind::Commit => match &event.commit {
                Some(commit) => self.apply_commit(conn, event, commit).await,
                None => {
                    warn!("Commit event without body from {}", event.did);
                    Ok(false)
                }
            },
        }
    }

    /// Applies one commit operation onto the posts table.
    async fn apply_commit(
        &self,
        conn: &mut AnyConnection,
        event: &RawEvent,
        commit: &CommitEvent,
    ) -> Result<bool, SqlStoreError> {
        if !commit.collection.starts_with(&self.post_collection_prefix) {
            // Not mapped onto a derived table, the raw archive has it
            debug!("Ignoring commit in unmapped collection {}", commit.collection);
            return Ok(true);
        }

        match commit.operation {
            CommitOperation::Create | CommitOperation::Update => {
                let record = match &commit.record {
                    Some(record) => record,
                    None => {
                        warn!(
                            "{} commit without record body from {}",
                            commit.operation, event.did
                        );
                        return Ok(false);
                    }
                };

                // The owner may not have been seen yet, posts always
                // reference an existing (possibly placeholder) row
                user::ensure_exists(conn, &event.did, &placeholder_handle("unknown", &event.did))
                    .await?;

                post::upsert(conn, &post_row(event, commit, record)).await?;
            }
            CommitOperation::Delete => {
                post::soft_delete(conn, &commit.uri(&event.did), now_micros()).await?;
            }
        }

        Ok(true)
    }

    /// Archives a payload which failed validation, keeping as much of the
    /// natural key as the payload still yields.
    async fn archive_malformed(&self, payload: &str) -> Result<(), SqlStoreError> {
        let (actor, time_us, kind) = match serde_json::from_str::<RawEventEnvelope>(payload) {
            Ok(envelope) => {
                let kind = match envelope.kind.as_str() {
                    "account" | "identity" | "commit" => envelope.kind,
                    _ => "unknown".to_string(),
                };

                (envelope.did, envelope.time_us, kind)
            }
            Err(_) => (String::new(), 0, "unknown".to_string()),
        };

        let mut conn = self.store.pool.acquire().await?;
        raw_message::archive(&mut conn, &actor, time_us, &kind, payload).await?;

        Ok(())
    }
}

/// Maps a commit and its record body onto a posts row.
fn post_row(event: &RawEvent, commit: &CommitEvent, record: &RecordBody) -> PostRow {
    let (parent, root) = match &record.reply {
        Some(reply) => (Some(&reply.parent), Some(&reply.root)),
        None => (None, None),
    };

    let langs = record
        .langs
        .as_ref()
        .map(|langs| serde_json::to_string(langs).expect("Lists of strings always serialize"));

    let extra = if record.extra.is_empty() {
        None
    } else {
        Some(
            serde_json::to_string(&record.extra)
                .expect("Maps of JSON values always serialize"),
        )
    };

    PostRow {
        uri: commit.uri(&event.did),
        content_id: commit.cid.clone(),
        text: record.text.clone(),
        langs,
        record_type: Some(record.record_type.clone()),
        source_created_at: Some(record.created_at.clone()),
        revision: Some(commit.rev.clone()),
        record_key: commit.rkey.clone(),
        collection: commit.collection.clone(),
        last_operation: commit.operation.as_str().to_string(),
        owner_actor_id: Some(event.did.clone()),
        parent_content_id: parent.map(|subject| subject.cid.clone()),
        parent_uri: parent.map(|subject| subject.uri.clone()),
        root_content_id: root.map(|subject| subject.cid.clone()),
        root_uri: root.map(|subject| subject.uri.clone()),
        extra,
    }
}

/// Temporary handle shown until a real identity event arrives for the actor.
fn placeholder_handle(prefix: &str, did: &str) -> String {
    let offset = did
        .char_indices()
        .rev()
        .nth(7)
        .map(|(index, _)| index)
        .unwrap_or(0);

    format!("{}-{}", prefix, &did[offset..])
}

/// Current wall-clock time in microseconds, used for deletion markers.
fn now_micros() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_micros() as i64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use crate::config::Configuration;
    use crate::test_helpers::initialize_store;

    use super::{placeholder_handle, Outcome, Persister};

    fn identity_payload(did: &str, handle: &str, time_us: i64) -> String {
        serde_json::json!({
            "did": did,
            "time_us": time_us,
            "kind": "identity",
            "identity": {
                "did": did,
                "handle": handle,
                "seq": 1409752997_i64,
                "time": "2024-09-05T06:11:04.870Z"
            }
        })
        .to_string()
    }

    fn post_payload(did: &str, rkey: &str, text: &str, time_us: i64) -> String {
        serde_json::json!({
            "did": did,
            "time_us": time_us,
            "kind": "commit",
            "commit": {
                "rev": "3l3qo2vutsw2b",
                "operation": "create",
                "collection": "app.bsky.feed.post",
                "rkey": rkey,
                "cid": "bafyreidc6sydkkbchcyg62v77wbhzvb2mvytlms",
                "record": {
                    "$type": "app.bsky.feed.post",
                    "createdAt": "2024-09-09T19:46:02.102Z",
                    "text": text,
                    "langs": ["en"]
                }
            }
        })
        .to_string()
    }

    async fn test_persister() -> Persister {
        Persister::new(initialize_store().await, &Configuration::default())
    }

    #[tokio::test]
    async fn replaying_an_event_is_a_noop_on_final_state() {
        let persister = test_persister().await;
        let payload = identity_payload("did:plc:abc", "alice.example", 100);

        // The same event delivered three times, as at-least-once allows
        for _ in 0..3 {
            let outcome = persister.process(5, &payload).await.unwrap();
            assert_eq!(
                outcome,
                Outcome::Persisted {
                    actor: "did:plc:abc".into()
                }
            );
        }

        let store = &persister.store;
        let user = store.get_user("did:plc:abc").await.unwrap().unwrap();
        assert_eq!(user.handle, "alice.example");
        assert_eq!(user.last_seq, 5);
        assert_eq!(store.count_unprocessed().await.unwrap(), 0);
    }

    #[rstest]
    #[case(5, 3)]
    #[case(3, 5)]
    #[case(4, 4)]
    #[tokio::test]
    async fn user_state_follows_sequence_not_arrival_order(
        #[case] first_offset: i64,
        #[case] second_offset: i64,
    ) {
        let persister = test_persister().await;

        persister
            .process(
                first_offset,
                &identity_payload("did:plc:abc", "first.example", 100),
            )
            .await
            .unwrap();
        persister
            .process(
                second_offset,
                &identity_payload("did:plc:abc", "second.example", 200),
            )
            .await
            .unwrap();

        let user = persister
            .store
            .get_user("did:plc:abc")
            .await
            .unwrap()
            .unwrap();

        // Whatever the arrival order was, the higher sequence wins
        let expected = if second_offset > first_offset {
            "second.example"
        } else {
            "first.example"
        };
        assert_eq!(user.handle, expected);
        assert_eq!(user.last_seq, first_offset.max(second_offset));
    }

    #[tokio::test]
    async fn one_poisoned_record_never_blocks_the_batch() {
        let persister = test_persister().await;

        let mut outcomes = Vec::new();
        for offset in 0..10 {
            let payload = if offset == 4 {
                "{ \"did\": \"did:plc:poison\", \"time_us\": 4, ".to_string()
            } else {
                post_payload("did:plc:abc", &format!("rkey-{}", offset), "hello", offset)
            };

            outcomes.push(persister.process(offset, &payload).await.unwrap());
        }

        let persisted = outcomes
            .iter()
            .filter(|outcome| matches!(outcome, Outcome::Persisted { .. }))
            .count();
        assert_eq!(persisted, 9);

        let posts = persister
            .store
            .get_posts_by_owner("did:plc:abc")
            .await
            .unwrap();
        assert_eq!(posts.len(), 9);

        // The poisoned record is archived for inspection, not lost
        assert_eq!(persister.store.count_unprocessed().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn reply_to_unseen_parent_keeps_dangling_reference() {
        let persister = test_persister().await;

        let payload = serde_json::json!({
            "did": "did:plc:abc",
            "time_us": 7,
            "kind": "commit",
            "commit": {
                "rev": "3l3qo2vutsw2b",
                "operation": "create",
                "collection": "app.bsky.feed.post",
                "rkey": "reply-1",
                "cid": "bafyreidc6sydkkbchcyg62v77wbhzvb2mvytlms",
                "record": {
                    "$type": "app.bsky.feed.post",
                    "createdAt": "2024-09-09T19:46:02.102Z",
                    "text": "replying into the void",
                    "reply": {
                        "parent": {
                            "cid": "bafyreiclt44zbz7hu7yfy4mdkdjrkg62uvhdmngz",
                            "uri": "at://did:plc:ghost/app.bsky.feed.post/missing"
                        },
                        "root": {
                            "cid": "bafyreiclt44zbz7hu7yfy4mdkdjrkg62uvhdmngz",
                            "uri": "at://did:plc:ghost/app.bsky.feed.post/missing"
                        }
                    }
                }
            }
        })
        .to_string();

        let outcome = persister.process(1, &payload).await.unwrap();
        assert!(matches!(outcome, Outcome::Persisted { .. }));

        let post = persister
            .store
            .get_post("at://did:plc:abc/app.bsky.feed.post/reply-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            post.parent_uri.as_deref(),
            Some("at://did:plc:ghost/app.bsky.feed.post/missing")
        );

        // The referenced parent still does not exist
        assert!(persister
            .store
            .get_post("at://did:plc:ghost/app.bsky.feed.post/missing")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn identity_then_post_resolves_owner() {
        let persister = test_persister().await;

        persister
            .process(10, &identity_payload("did:plc:abc", "alice.example", 100))
            .await
            .unwrap();
        persister
            .process(11, &post_payload("did:plc:abc", "xyz", "hello world", 200))
            .await
            .unwrap();

        let user = persister
            .store
            .get_user("did:plc:abc")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(user.handle, "alice.example");

        let post = persister
            .store
            .get_post("at://did:plc:abc/app.bsky.feed.post/xyz")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(post.owner_actor_id.as_deref(), Some("did:plc:abc"));
        assert_eq!(post.text.as_deref(), Some("hello world"));
    }

    #[tokio::test]
    async fn post_before_identity_creates_placeholder_owner() {
        let persister = test_persister().await;

        persister
            .process(1, &post_payload("did:plc:abc", "xyz", "first!", 100))
            .await
            .unwrap();

        let user = persister
            .store
            .get_user("did:plc:abc")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(user.handle, "unknown-:plc:abc");
        assert_eq!(user.last_seq, 0);

        // The real identity replaces the placeholder later
        persister
            .process(2, &identity_payload("did:plc:abc", "alice.example", 200))
            .await
            .unwrap();
        let user = persister
            .store
            .get_user("did:plc:abc")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(user.handle, "alice.example");
    }

    #[tokio::test]
    async fn delete_commit_soft_deletes_the_post() {
        let persister = test_persister().await;

        persister
            .process(1, &post_payload("did:plc:abc", "xyz", "delete me", 100))
            .await
            .unwrap();

        let delete = serde_json::json!({
            "did": "did:plc:abc",
            "time_us": 200,
            "kind": "commit",
            "commit": {
                "rev": "3l3qo2vutsw2c",
                "operation": "delete",
                "collection": "app.bsky.feed.post",
                "rkey": "xyz"
            }
        })
        .to_string();
        persister.process(2, &delete).await.unwrap();

        let post = persister
            .store
            .get_post("at://did:plc:abc/app.bsky.feed.post/xyz")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(post.last_operation, "delete");
        assert_eq!(post.text.as_deref(), Some("delete me"));
        assert!(post.extra_fields().unwrap().contains_key("deleted_at_us"));
    }

    #[tokio::test]
    async fn commits_outside_post_collections_are_archive_only() {
        let persister = test_persister().await;

        let payload = serde_json::json!({
            "did": "did:plc:abc",
            "time_us": 50,
            "kind": "commit",
            "commit": {
                "rev": "3l3qo2vutsw2b",
                "operation": "create",
                "collection": "app.bsky.graph.follow",
                "rkey": "3l3qo2vuowo2b",
                "record": {
                    "$type": "app.bsky.graph.follow",
                    "createdAt": "2024-09-09T19:46:02.102Z"
                }
            }
        })
        .to_string();

        let outcome = persister.process(1, &payload).await.unwrap();
        assert!(matches!(outcome, Outcome::Persisted { .. }));

        let archived = persister
            .store
            .get_raw_message("did:plc:abc", 50, "commit")
            .await
            .unwrap()
            .unwrap();
        assert!(archived.processed);

        assert!(persister
            .store
            .get_posts_by_owner("did:plc:abc")
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn undecodable_payload_is_archived_unknown() {
        let persister = test_persister().await;

        let outcome = persister.process(1, "not even json").await.unwrap();
        assert_eq!(outcome, Outcome::Malformed);

        let archived = persister
            .store
            .get_raw_message("", 0, "unknown")
            .await
            .unwrap()
            .unwrap();
        assert!(!archived.processed);
        assert_eq!(archived.raw_data, "not even json");
    }

    #[test]
    fn placeholder_handles_use_the_did_tail() {
        assert_eq!(
            placeholder_handle("unknown", "did:plc:w4es6sfh43zxf3wnxbacmevn"),
            "unknown-xbacmevn"
        );
        assert_eq!(placeholder_handle("user", "short"), "user-short");
    }
}
