// SPDX-License-Identifier: AGPL-3.0-or-later

use anyhow::Result;
use clap::Parser;
use jetsink::{Configuration, Node};

#[derive(Parser, Debug)]
#[command(name = "jetsink Node", version)]
/// Ingestion node archiving a decentralized social network feed into a
/// relational store.
struct Cli {
    /// URL / connection string to PostgreSQL or SQLite database.
    #[arg(short, long)]
    database_url: Option<String>,

    /// WebSocket endpoint of the upstream feed.
    #[arg(short, long)]
    feed_endpoint: Option<String>,

    /// Microsecond cursor to resume the feed subscription from.
    #[arg(short, long)]
    cursor: Option<u64>,

    /// Collections to subscribe to, all when omitted.
    ///
    /// eg. --wanted-collections "app.bsky.feed.post"
    #[arg(short, long)]
    wanted_collections: Vec<String>,

    /// Actor identifiers to subscribe to, all when omitted.
    #[arg(long)]
    wanted_dids: Vec<String>,

    /// Bootstrap servers of the message broker holding the durable buffer.
    #[arg(short, long)]
    brokers: Option<String>,

    /// Topic of the raw event log.
    #[arg(short, long)]
    topic: Option<String>,

    /// Consumer group of the persistence worker.
    #[arg(short = 'g', long)]
    consumer_group: Option<String>,
}

impl From<Cli> for Configuration {
    fn from(cli: Cli) -> Self {
        let mut config = Configuration::default();

        if let Some(database_url) = cli.database_url {
            config.database_url = database_url;
        }

        if let Some(endpoint) = cli.feed_endpoint {
            config.stream.endpoint = endpoint;
        }

        config.stream.cursor = cli.cursor;

        if !cli.wanted_collections.is_empty() {
            config.stream.wanted_collections = cli.wanted_collections;
        }

        if !cli.wanted_dids.is_empty() {
            config.stream.wanted_dids = cli.wanted_dids;
        }

        if let Some(brokers) = cli.brokers {
            config.buffer.brokers = brokers;
        }

        if let Some(topic) = cli.topic {
            config.buffer.topic = topic;
        }

        if let Some(consumer_group) = cli.consumer_group {
            config.buffer.consumer_group = consumer_group;
        }

        config
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    // Load configuration parameters and apply defaults
    let config: Configuration = Cli::parse().into();

    // Start ingestion node in async runtime
    let node = Node::start(config).await;

    // Run this until [CTRL] + [C] got pressed or something went wrong
    tokio::select! {
        _ = tokio::signal::ctrl_c() => (),
        _ = node.on_exit() => (),
    }

    // Wait until all tasks are gracefully shut down and exit
    node.shutdown().await;

    Ok(())
}
