// SPDX-License-Identifier: AGPL-3.0-or-later

//! Typed representation of one raw feed event and its sub-operations.
//!
//! These types mirror the JSON shape of the upstream feed. Every struct
//! carries an open `extra` bag collecting fields which are not promoted to
//! typed members, keeping the model forward-compatible with upstream schema
//! additions.
//!
//! Pure data, no behavior: validation happens at the serde boundary, the
//! mapping onto the relational schema lives in the persistence worker.
use std::fmt::Display;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One event on the wire: an account status change, an identity (handle)
/// change or a repository commit of a single actor.
///
/// `time_us` is a microsecond timestamp assigned by the feed. It is only
/// monotonic per actor and serves as resume cursor; the durable ordering key
/// of the pipeline is the buffer offset, not this value.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct RawEvent {
    /// Decentralized identifier of the actor this event belongs to.
    pub did: String,

    /// Microsecond timestamp from the source, used as resume cursor.
    pub time_us: i64,

    /// Discriminator selecting which of the optional bodies is present.
    pub kind: EventKind,

    /// Body of an `account` event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account: Option<AccountEvent>,

    /// Body of an `identity` event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity: Option<IdentityEvent>,

    /// Body of a `commit` event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit: Option<CommitEvent>,

    /// Unknown top-level fields.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Discriminator of the three event families the feed delivers.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    /// Account status changed (activated, deactivated, taken down).
    Account,

    /// Identity changed, carries the current handle of the actor.
    Identity,

    /// One create, update or delete of a record in a repository.
    Commit,
}

impl EventKind {
    /// String representation as used on the wire and in the archive table.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Account => "account",
            EventKind::Identity => "identity",
            EventKind::Commit => "commit",
        }
    }
}

impl Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Body of an `account` event.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct AccountEvent {
    /// Actor the status change applies to.
    pub did: String,

    /// Whether the account is currently active on the network.
    pub active: bool,

    /// Source-side sequence number of this change.
    pub seq: i64,

    /// Source-side timestamp of this change (RFC 3339).
    pub time: String,

    /// Unknown fields.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Body of an `identity` event.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct IdentityEvent {
    /// Actor the identity change applies to.
    pub did: String,

    /// Current display handle of the actor.
    pub handle: String,

    /// Source-side sequence number of this change.
    pub seq: i64,

    /// Source-side timestamp of this change (RFC 3339).
    pub time: String,

    /// Unknown fields.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Body of a `commit` event: one operation on one record of the actor's
/// repository.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct CommitEvent {
    /// Repository revision this operation produced.
    pub rev: String,

    /// Which kind of mutation this commit describes.
    pub operation: CommitOperation,

    /// Record-type namespace, for example `app.bsky.feed.post`.
    pub collection: String,

    /// Record key, unique within the actor's collection.
    pub rkey: String,

    /// Content-addressed hash of the record version. Absent on deletes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cid: Option<String>,

    /// The record body itself. Absent on deletes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record: Option<RecordBody>,

    /// Unknown fields.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl CommitEvent {
    /// Globally unique resource locator of the record this commit touches.
    pub fn uri(&self, did: &str) -> String {
        format!("at://{}/{}/{}", did, self.collection, self.rkey)
    }
}

/// The three mutations a commit can describe.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CommitOperation {
    /// A new record was created.
    Create,

    /// An existing record was replaced.
    Update,

    /// A record was removed from the repository.
    Delete,
}

impl CommitOperation {
    /// String representation as stored in the `last_operation` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            CommitOperation::Create => "create",
            CommitOperation::Update => "update",
            CommitOperation::Delete => "delete",
        }
    }
}

impl Display for CommitOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Decoded record of a create or update commit.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct RecordBody {
    /// Lexicon type of the record, for example `app.bsky.feed.post`.
    #[serde(rename = "$type")]
    pub record_type: String,

    /// Creation timestamp claimed by the source (RFC 3339).
    #[serde(rename = "createdAt")]
    pub created_at: String,

    /// Text content, present on post-like records.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    /// Ordered list of language tags.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub langs: Option<Vec<String>>,

    /// Reply references when this record answers another one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply: Option<ReplyRef>,

    /// Subject reference, present on likes and reposts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<SubjectRef>,

    /// Fields not promoted to columns, kept for the `extra` bag.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Weak reference from one record to another. The referenced record is not
/// guaranteed to exist yet (or ever) in the local store.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct ReplyRef {
    /// Direct parent of the reply.
    pub parent: SubjectRef,

    /// Root of the thread the reply belongs to.
    pub root: SubjectRef,
}

/// Content-addressed pointer to a record version.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct SubjectRef {
    /// Content hash of the referenced record version.
    pub cid: String,

    /// Resource locator of the referenced record.
    pub uri: String,
}

/// Minimal envelope extracted from a payload without validating the whole
/// event.
///
/// The stream client uses it to derive the partition key and resume cursor
/// of a frame, the persistence worker to keep a usable archive key for
/// payloads which fail full validation.
#[derive(Clone, Debug, Deserialize)]
pub struct RawEventEnvelope {
    /// Actor identifier, partition key of the buffer.
    pub did: String,

    /// Microsecond timestamp, resume cursor.
    pub time_us: i64,

    /// Kind as an unvalidated string; unknown values are preserved.
    pub kind: String,
}

#[cfg(test)]
mod tests {
    use super::{CommitOperation, EventKind, RawEvent, RawEventEnvelope};

    const COMMIT_EVENT: &str = r#"{
        "did": "did:plc:w4es6sfh43zxf3wnxbacmevn",
        "time_us": 1725911162329308,
        "kind": "commit",
        "commit": {
            "rev": "3l3qo2vutsw2b",
            "operation": "create",
            "collection": "app.bsky.feed.post",
            "rkey": "3l3qo2vuowo2b",
            "cid": "bafyreidc6sydkkbchcyg62v77wbhzvb2mvytlmsychqgwf2xojjtirmzj4",
            "record": {
                "$type": "app.bsky.feed.post",
                "createdAt": "2024-09-09T19:46:02.102Z",
                "text": "hello world",
                "langs": ["en"],
                "reply": {
                    "parent": {
                        "cid": "bafyreiclt44zbz7hu7yfy4mdkdjrkg62uvhdmngzbfqkh2rj4ihidyw67m",
                        "uri": "at://did:plc:abc/app.bsky.feed.post/3l3qnlal2dw2a"
                    },
                    "root": {
                        "cid": "bafyreiclt44zbz7hu7yfy4mdkdjrkg62uvhdmngzbfqkh2rj4ihidyw67m",
                        "uri": "at://did:plc:abc/app.bsky.feed.post/3l3qnlal2dw2a"
                    }
                },
                "embed": { "$type": "app.bsky.embed.images" }
            }
        }
    }"#;

    #[test]
    fn parses_commit_event() {
        let event: RawEvent = serde_json::from_str(COMMIT_EVENT).unwrap();
        assert_eq!(event.kind, EventKind::Commit);
        assert_eq!(event.did, "did:plc:w4es6sfh43zxf3wnxbacmevn");

        let commit = event.commit.as_ref().unwrap();
        assert_eq!(commit.operation, CommitOperation::Create);
        assert_eq!(
            commit.uri(&event.did),
            "at://did:plc:w4es6sfh43zxf3wnxbacmevn/app.bsky.feed.post/3l3qo2vuowo2b"
        );

        let record = commit.record.as_ref().unwrap();
        assert_eq!(record.text.as_deref(), Some("hello world"));
        assert_eq!(record.langs, Some(vec!["en".to_string()]));
        assert_eq!(
            record.reply.as_ref().unwrap().parent.uri,
            "at://did:plc:abc/app.bsky.feed.post/3l3qnlal2dw2a"
        );

        // Fields without a typed member survive in the open bag
        assert!(record.extra.contains_key("embed"));
    }

    #[test]
    fn parses_identity_and_account_events() {
        let identity: RawEvent = serde_json::from_str(
            r#"{
                "did": "did:plc:abc",
                "time_us": 1725516665234703,
                "kind": "identity",
                "identity": {
                    "did": "did:plc:abc",
                    "handle": "alice.example",
                    "seq": 1409752997,
                    "time": "2024-09-05T06:11:04.870Z"
                }
            }"#,
        )
        .unwrap();
        assert_eq!(identity.kind, EventKind::Identity);
        assert_eq!(
            identity.identity.as_ref().unwrap().handle,
            "alice.example"
        );

        let account: RawEvent = serde_json::from_str(
            r#"{
                "did": "did:plc:abc",
                "time_us": 1725516665333808,
                "kind": "account",
                "account": {
                    "active": false,
                    "did": "did:plc:abc",
                    "seq": 1409753013,
                    "time": "2024-09-05T06:11:04.870Z"
                }
            }"#,
        )
        .unwrap();
        assert_eq!(account.kind, EventKind::Account);
        assert!(!account.account.as_ref().unwrap().active);
    }

    #[test]
    fn parses_delete_commit_without_record() {
        let event: RawEvent = serde_json::from_str(
            r#"{
                "did": "did:plc:abc",
                "time_us": 1725516666000000,
                "kind": "commit",
                "commit": {
                    "rev": "3l3qo2vutsw2b",
                    "operation": "delete",
                    "collection": "app.bsky.feed.post",
                    "rkey": "3l3qo2vuowo2b"
                }
            }"#,
        )
        .unwrap();

        let commit = event.commit.unwrap();
        assert_eq!(commit.operation, CommitOperation::Delete);
        assert!(commit.record.is_none());
        assert!(commit.cid.is_none());
    }

    #[test]
    fn envelope_survives_unknown_kind() {
        let envelope: RawEventEnvelope = serde_json::from_str(
            r#"{ "did": "did:plc:abc", "time_us": 5, "kind": "sync", "payload": {} }"#,
        )
        .unwrap();
        assert_eq!(envelope.kind, "sync");
        assert_eq!(envelope.time_us, 5);
    }

    #[test]
    fn rejects_event_without_required_fields() {
        let result: Result<RawEvent, _> =
            serde_json::from_str(r#"{ "time_us": 5, "kind": "commit" }"#);
        assert!(result.is_err());
    }
}
