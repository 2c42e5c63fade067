// SPDX-License-Identifier: AGPL-3.0-or-later

//! Write and read access to the three tables.
//!
//! The write functions take a plain connection instead of the pool so that
//! the persistence worker can compose them into one transaction per raw
//! event. Read methods live on [`crate::db::SqlStore`] and are also what the
//! separately deployed query layer consumes.
pub mod post;
pub mod raw_message;
pub mod user;
