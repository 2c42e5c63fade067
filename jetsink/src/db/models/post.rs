// SPDX-License-Identifier: AGPL-3.0-or-later

use serde::Serialize;
use serde_json::{Map, Value};
use sqlx::FromRow;

/// Struct representing the actual SQL row of `posts`.
///
/// The `langs` and `extra` columns hold JSON-encoded text since not all
/// database backends support native array and object columns.
#[derive(FromRow, Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct PostRow {
    /// Globally unique resource locator, derived from actor, collection and
    /// record key.
    pub uri: String,

    /// Content-addressed hash of the record version.
    pub content_id: Option<String>,

    /// Text content of the post.
    pub text: Option<String>,

    /// Ordered list of language tags, JSON-encoded.
    pub langs: Option<String>,

    /// Lexicon type of the record.
    pub record_type: Option<String>,

    /// Creation timestamp claimed by the source.
    pub source_created_at: Option<String>,

    /// Repository revision of the last applied commit.
    pub revision: Option<String>,

    /// Record key, unique within the actor's collection.
    pub record_key: String,

    /// Record-type namespace the post lives in.
    pub collection: String,

    /// Last operation applied to this row: create, update or delete.
    pub last_operation: String,

    /// Weak reference to the owning actor. May point to a placeholder row
    /// when the owner has not been seen yet.
    pub owner_actor_id: Option<String>,

    /// Weak reference to the content hash of the direct parent.
    pub parent_content_id: Option<String>,

    /// Weak reference to the resource locator of the direct parent. The
    /// parent need not exist in the store.
    pub parent_uri: Option<String>,

    /// Weak reference to the content hash of the thread root.
    pub root_content_id: Option<String>,

    /// Weak reference to the resource locator of the thread root.
    pub root_uri: Option<String>,

    /// Open bag for record fields not promoted to columns, JSON-encoded.
    pub extra: Option<String>,
}

impl PostRow {
    /// Decodes the JSON-encoded language list.
    pub fn langs_list(&self) -> Option<Vec<String>> {
        self.langs
            .as_ref()
            .and_then(|langs| serde_json::from_str(langs).ok())
    }

    /// Decodes the JSON-encoded extra bag.
    pub fn extra_fields(&self) -> Option<Map<String, Value>> {
        self.extra
            .as_ref()
            .and_then(|extra| serde_json::from_str(extra).ok())
    }
}
