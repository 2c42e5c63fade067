// SPDX-License-Identifier: AGPL-3.0-or-later

//! Persistence worker consuming buffered events and applying them to the
//! relational store.
mod service;
mod worker;

pub use service::persister_service;
pub use worker::{Outcome, Persister};
