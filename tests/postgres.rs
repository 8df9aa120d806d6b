// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Archive round trip against a real PostgreSQL server.
//!
//! Runs only when `PANOPTICON_TEST_DSN` points at a scratch database.

use std::sync::Arc;

use async_trait::async_trait;
use panopticon::archive::{Archiver, Store};
use panopticon::config::DatabaseConfig;
use panopticon::db::Database;
use panopticon::gateway::Event;
use panopticon::model::Channel;
use panopticon::rest::ChannelLookup;
use panopticon::{Result, Snowflake};
use serde_json::json;

struct NoLookup;

#[async_trait]
impl ChannelLookup for NoLookup {
    async fn fetch_channel(&self, _id: Snowflake) -> Result<Option<Channel>> {
        Ok(None)
    }
}

async fn database() -> Option<Database> {
    let dsn = std::env::var("PANOPTICON_TEST_DSN").ok()?;
    let config = DatabaseConfig { dsn, max_connections: 2, auto_migrate: true };
    let db = Database::connect(&config).await.expect("connect to test database");
    db.migrate().await.expect("apply schema");
    Some(db)
}

fn event(name: &str, data: serde_json::Value) -> Event {
    Event::parse(name, data).unwrap().unwrap()
}

#[tokio::test]
async fn test_guild_message_lifecycle() {
    let Some(db) = database().await else {
        eprintln!("PANOPTICON_TEST_DSN not set, skipping");
        return;
    };

    // Ids derived from the clock so reruns do not collide
    let base = (chrono::Utc::now().timestamp_millis() as u64 - 1_420_070_400_000) << 22;
    let (me, author, guild, channel, message) = (base + 1, base + 2, base + 3, base + 4, base + 5);

    let before = db.stats().await.unwrap();
    let store: Arc<dyn Store> = Arc::new(db.clone());
    let mut archiver = Archiver::new(store, Arc::new(NoLookup), 10);

    archiver.handle(event("READY", json!({
        "user": { "id": me.to_string(), "username": "panopticon", "bot": true },
        "session_id": "test"
    }))).await.unwrap();
    archiver.handle(event("GUILD_CREATE", json!({
        "id": guild.to_string(),
        "name": "Test Guild",
        "channels": [{ "id": channel.to_string(), "type": 0, "name": "general" }]
    }))).await.unwrap();
    archiver.handle(event("MESSAGE_CREATE", json!({
        "id": message.to_string(),
        "channel_id": channel.to_string(),
        "guild_id": guild.to_string(),
        "author": { "id": author.to_string(), "username": "alice", "discriminator": "0" },
        "content": "hello",
        "embeds": [{ "type": "rich", "title": "card" }],
        "attachments": [{ "id": (base + 6).to_string(), "filename": "a.txt", "size": 1, "url": "https://cdn.example/a.txt" }]
    }))).await.unwrap();
    archiver.handle(event("MESSAGE_UPDATE", json!({
        "id": message.to_string(),
        "channel_id": channel.to_string(),
        "content": "hello, edited"
    }))).await.unwrap();
    archiver.handle(event("MESSAGE_DELETE", json!({
        "id": message.to_string(),
        "channel_id": channel.to_string(),
        "guild_id": guild.to_string()
    }))).await.unwrap();

    let after = db.stats().await.unwrap();
    let grew = |table: &str| after.count(table).unwrap() - before.count(table).unwrap();
    assert_eq!(grew("users"), 2);
    assert_eq!(grew("guild_messages"), 1);
    assert_eq!(grew("guild_attachments"), 1);
    assert_eq!(grew("guild_edits"), 1);
    assert_eq!(grew("guild_deletions"), 1);

    db.close().await;
}
