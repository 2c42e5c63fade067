// SPDX-License-Identifier: AGPL-3.0-or-later

use crate::manager::Sender;

/// Sender for cross-service communication bus.
pub type ServiceSender = Sender<ServiceMessage>;

/// Messages which can be sent on the communication bus.
///
/// The two pipeline stages never talk to each other directly; these messages
/// only announce progress so that observers (tests, future health endpoints)
/// can follow the pipeline without touching its state.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ServiceMessage {
    /// A raw event has been durably handed off to the buffer and the resume
    /// cursor advanced to its position.
    EventBuffered {
        /// Actor the event belongs to.
        actor: String,

        /// Microsecond cursor of the buffered event.
        cursor: i64,
    },

    /// A buffered event has been fully applied to the relational store and
    /// its offset committed.
    EventPersisted {
        /// Actor the event belongs to.
        actor: String,
    },
}
