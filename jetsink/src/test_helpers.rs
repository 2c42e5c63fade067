// SPDX-License-Identifier: AGPL-3.0-or-later

use once_cell::sync::Lazy;
use serde::Deserialize;

use crate::db::{connection_pool, create_database, run_pending_migrations, Pool, SqlStore};

/// Configuration used in test helper methods.
#[derive(Deserialize, Debug)]
#[serde(default)]
pub struct TestConfiguration {
    /// Database url (sqlite or postgres)
    pub database_url: String,
}

impl TestConfiguration {
    /// Create a new configuration object for test environments.
    pub fn new() -> Self {
        envy::from_env::<TestConfiguration>()
            .expect("Could not read environment variables for test configuration")
    }
}

impl Default for TestConfiguration {
    fn default() -> Self {
        Self {
            // SQLite database stored in memory
            database_url: "sqlite::memory:".into(),
        }
    }
}

pub static TEST_CONFIG: Lazy<TestConfiguration> = Lazy::new(TestConfiguration::new);

/// Create test database with all migrations applied.
///
/// The pool is limited to one connection: an in-memory SQLite database
/// exists per connection, a larger pool would scatter the tables.
pub async fn initialize_db() -> Pool {
    let url = &TEST_CONFIG.database_url;

    create_database(url).await.unwrap();

    let pool = connection_pool(url, 1).await.unwrap();
    run_pending_migrations(&pool).await.unwrap();

    pool
}

/// Create a store on top of a fresh test database.
pub async fn initialize_store() -> SqlStore {
    SqlStore::new(initialize_db().await)
}
