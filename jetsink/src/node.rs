// SPDX-License-Identifier: AGPL-3.0-or-later

use anyhow::Result;

use crate::bus::ServiceMessage;
use crate::config::Configuration;
use crate::context::Context;
use crate::db::SqlStore;
use crate::db::{connection_pool, create_database, run_pending_migrations, Pool};
use crate::manager::ServiceManager;
use crate::persister::persister_service;
use crate::stream::stream_service;

/// Capacity of the internal broadcast channel used to communicate between
/// services.
const SERVICE_BUS_CAPACITY: usize = 512_000;

/// Makes sure database is created and migrated before returning connection
/// pool.
async fn initialize_db(config: &Configuration) -> Result<Pool> {
    // Create database when not existing
    create_database(&config.database_url).await?;

    // Create connection pool
    let pool = connection_pool(&config.database_url, config.database_max_connections).await?;

    // Run pending migrations
    run_pending_migrations(&pool).await?;

    Ok(pool)
}

/// Main runtime managing the ingestion node process.
#[allow(missing_debug_implementations)]
pub struct Node {
    pool: Pool,
    manager: ServiceManager<Context, ServiceMessage>,
}

impl Node {
    /// Start an ingestion node with your configuration. This method can be
    /// used to run the node within other applications.
    pub async fn start(config: Configuration) -> Self {
        // Missing connection parameters fail fast, before any run loop
        config.validate().expect("Invalid configuration");

        // Initialize database and get connection pool
        let pool = initialize_db(&config)
            .await
            .expect("Could not initialize database");

        // Prepare storage using connection pool
        let store = SqlStore::new(pool.clone());

        // Create service manager with shared data between services
        let context = Context::new(store, config);
        let mut manager =
            ServiceManager::<Context, ServiceMessage>::new(SERVICE_BUS_CAPACITY, context);

        // Start stream service ingesting the feed into the buffer
        manager.add("stream", stream_service);

        // Start persister service applying buffered events to the store
        manager.add("persister", persister_service);

        Self { pool, manager }
    }

    /// This future resolves when at least one system service stopped.
    ///
    /// It can be used to exit the application as a stopped service usually
    /// means that something went wrong.
    pub async fn on_exit(&self) {
        self.manager.on_exit().await;
    }

    /// Close all running concurrent tasks and wait until they are fully shut
    /// down.
    pub async fn shutdown(self) {
        // Wait until all tasks are shut down
        self.manager.shutdown().await;

        // Close connection pool
        self.pool.close().await;
    }
}
