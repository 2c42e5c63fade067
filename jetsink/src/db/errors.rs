// SPDX-License-Identifier: AGPL-3.0-or-later

/// `SqlStore` errors.
#[derive(thiserror::Error, Debug)]
pub enum SqlStoreError {
    /// Error returned from the database.
    #[error(transparent)]
    Database(#[from] sqlx::Error),

    /// Error which occurs when an insert or update did not affect the
    /// expected number of rows.
    #[error("Unexpected number of affected rows when writing into {0} table")]
    WriteFailed(&'static str),
}

impl SqlStoreError {
    /// Returns true when the database rejected a write because of a schema
    /// constraint.
    ///
    /// On a natural key this is the idempotence contract doing its job as
    /// second line of defense; the persistence worker treats such events as
    /// malformed-and-skipped instead of retrying them forever.
    pub fn is_constraint_violation(&self) -> bool {
        match self {
            SqlStoreError::Database(sqlx::Error::Database(err)) => {
                // Class 23 covers all integrity constraint violations on
                // Postgres. SQLite reports them in the message text only.
                err.code().map_or(false, |code| code.starts_with("23"))
                    || err.message().contains("constraint")
            }
            _ => false,
        }
    }
}
