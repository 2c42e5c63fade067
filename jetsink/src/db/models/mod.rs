// SPDX-License-Identifier: AGPL-3.0-or-later

//! Structs representing SQL rows of the three tables.
mod post;
mod raw_message;
mod user;

pub use post::PostRow;
pub use raw_message::RawMessageRow;
pub use user::UserRow;
