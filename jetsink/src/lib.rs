// SPDX-License-Identifier: AGPL-3.0-or-later

//! # jetsink
//!
//! Long-running ingestion node which consumes an ordered event stream from a
//! decentralized social network feed, buffers it durably in a partitioned log
//! and persists a normalized snapshot plus a raw audit trail into a relational
//! database.
//!
//! The pipeline consists of two independent services communicating only
//! through the durable buffer:
//!
//! ```text
//! Stream Client → Durable Buffer → Persistence Worker → Relational Store
//! ```
#![warn(
    missing_copy_implementations,
    missing_debug_implementations,
    trivial_casts,
    trivial_numeric_casts,
    unsafe_code,
    unstable_features,
    unused_import_braces,
    unused_qualifications
)]

mod buffer;
mod bus;
mod config;
mod context;
mod db;
mod event;
mod manager;
mod node;
mod persister;
mod stream;

#[cfg(test)]
mod test_helpers;

pub use crate::config::{
    BufferConfiguration, Configuration, ConfigurationError, StreamConfiguration,
};
pub use crate::db::errors::SqlStoreError;
pub use crate::db::models::{PostRow, RawMessageRow, UserRow};
pub use crate::db::SqlStore;
pub use crate::event::{
    AccountEvent, CommitEvent, CommitOperation, EventKind, IdentityEvent, RawEvent,
    RawEventEnvelope, RecordBody, ReplyRef, SubjectRef,
};
pub use node::Node;
