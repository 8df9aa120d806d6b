// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! PostgreSQL archive

use async_trait::async_trait;
use serde::Serialize;
use sqlx::postgres::{PgConnection, PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::{debug, info};

use crate::archive::{Record, Scope, Store};
use crate::config::DatabaseConfig;
use crate::{PanopticonError, Result};

/// Schema applied by `migrate`
pub const SCHEMA: &str = include_str!("../../migrations/001_schema.sql");

/// Every archive table, parents first
pub const TABLES: &[&str] = &[
    "users",
    "guilds",
    "private_channels",
    "guild_channels",
    "private_messages",
    "guild_messages",
    "private_attachments",
    "guild_attachments",
    "private_edits",
    "guild_edits",
    "private_deletions",
    "guild_deletions",
];

const USER_SQL: &str = r#"INSERT INTO users (user_id, created_at, name, discriminator, is_bot)
    VALUES ($1, $2, $3, $4, $5)
    ON CONFLICT (user_id) DO UPDATE
    SET name = EXCLUDED.name,
        discriminator = EXCLUDED.discriminator,
        last_updated = NOW()"#;

const GUILD_SQL: &str = r#"INSERT INTO guilds (guild_id, name)
    VALUES ($1, $2)
    ON CONFLICT (guild_id) DO UPDATE
    SET name = EXCLUDED.name,
        last_updated = NOW()"#;

const PRIVATE_CHANNEL_SQL: &str = r#"INSERT INTO private_channels (channel_id, user_1, user_2)
    VALUES ($1, $2, $3)
    ON CONFLICT (channel_id) DO NOTHING"#;

const GUILD_CHANNEL_SQL: &str = r#"INSERT INTO guild_channels (channel_id, guild_id, name)
    VALUES ($1, $2, $3)
    ON CONFLICT (channel_id) DO UPDATE
    SET name = EXCLUDED.name,
        last_updated = NOW()"#;

const PRIVATE_MESSAGE_SQL: &str = r#"INSERT INTO private_messages (message_id, created_at, channel_id, author_id, content, embed)
    VALUES ($1, $2, $3, $4, $5, $6::jsonb)
    ON CONFLICT (message_id) DO NOTHING"#;

const GUILD_MESSAGE_SQL: &str = r#"INSERT INTO guild_messages (message_id, created_at, channel_id, author_id, content, embed)
    VALUES ($1, $2, $3, $4, $5, $6::jsonb)
    ON CONFLICT (message_id) DO NOTHING"#;

const PRIVATE_ATTACHMENT_SQL: &str = r#"INSERT INTO private_attachments (attachment_id, message_id, size, filename, url)
    VALUES ($1, $2, $3, $4, $5)
    ON CONFLICT (attachment_id) DO NOTHING"#;

const GUILD_ATTACHMENT_SQL: &str = r#"INSERT INTO guild_attachments (attachment_id, message_id, size, filename, url)
    VALUES ($1, $2, $3, $4, $5)
    ON CONFLICT (attachment_id) DO NOTHING"#;

const PRIVATE_EDIT_SQL: &str = r#"INSERT INTO private_edits (message_id, edited_at, content, embed)
    VALUES ($1, $2, $3, $4::jsonb)"#;

const GUILD_EDIT_SQL: &str = r#"INSERT INTO guild_edits (message_id, edited_at, content, embed)
    VALUES ($1, $2, $3, $4::jsonb)"#;

const PRIVATE_DELETION_SQL: &str = "INSERT INTO private_deletions (message_id) VALUES ($1)";
const GUILD_DELETION_SQL: &str = "INSERT INTO guild_deletions (message_id) VALUES ($1)";

/// Row counts per table
#[derive(Debug, Clone, Serialize)]
pub struct DbStats {
    pub tables: Vec<(String, i64)>,
}

impl DbStats {
    pub fn count(&self, table: &str) -> Option<i64> {
        self.tables.iter().find(|(t, _)| t == table).map(|(_, n)| *n)
    }
}

/// Connection pool to the archive database
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Connect using the configured DSN
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .connect(&config.dsn)
            .await?;
        Ok(Self { pool })
    }

    /// Create any missing tables and indexes
    pub async fn migrate(&self) -> Result<()> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(|e| PanopticonError::Migration(e.to_string()))?;
        info!("Database schema is up to date");
        Ok(())
    }

    /// Round-trip check
    pub async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Get row counts of every archive table
    pub async fn stats(&self) -> Result<DbStats> {
        let mut tables = Vec::with_capacity(TABLES.len());
        for table in TABLES {
            let sql = format!("SELECT COUNT(*) FROM {}", table);
            let count: i64 = sqlx::query_scalar(&sql).fetch_one(&self.pool).await?;
            tables.push((table.to_string(), count));
        }
        Ok(DbStats { tables })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

async fn write_record(conn: &mut PgConnection, record: &Record) -> Result<()> {
    match record {
        Record::User { id, created_at, name, discriminator, bot } => {
            sqlx::query(USER_SQL)
                .bind(id.as_i64())
                .bind(created_at)
                .bind(name)
                .bind(discriminator)
                .bind(bot)
                .execute(conn)
                .await?;
        }
        Record::Guild { id, name } => {
            sqlx::query(GUILD_SQL)
                .bind(id.as_i64())
                .bind(name)
                .execute(conn)
                .await?;
        }
        Record::PrivateChannel { id, user_low, user_high } => {
            sqlx::query(PRIVATE_CHANNEL_SQL)
                .bind(id.as_i64())
                .bind(user_low.as_i64())
                .bind(user_high.as_i64())
                .execute(conn)
                .await?;
        }
        Record::GuildChannel { id, guild_id, name } => {
            sqlx::query(GUILD_CHANNEL_SQL)
                .bind(id.as_i64())
                .bind(guild_id.as_i64())
                .bind(name)
                .execute(conn)
                .await?;
        }
        Record::Message { scope, id, created_at, channel_id, author_id, content, embed } => {
            let sql = match scope {
                Scope::Private => PRIVATE_MESSAGE_SQL,
                Scope::Guild => GUILD_MESSAGE_SQL,
            };
            sqlx::query(sql)
                .bind(id.as_i64())
                .bind(created_at)
                .bind(channel_id.as_i64())
                .bind(author_id.as_i64())
                .bind(content)
                .bind(embed)
                .execute(conn)
                .await?;
        }
        Record::Attachment { scope, id, message_id, size, filename, url } => {
            let sql = match scope {
                Scope::Private => PRIVATE_ATTACHMENT_SQL,
                Scope::Guild => GUILD_ATTACHMENT_SQL,
            };
            sqlx::query(sql)
                .bind(id.as_i64())
                .bind(message_id.as_i64())
                .bind(size)
                .bind(filename)
                .bind(url)
                .execute(conn)
                .await?;
        }
        Record::Edit { scope, message_id, edited_at, content, embed } => {
            let sql = match scope {
                Scope::Private => PRIVATE_EDIT_SQL,
                Scope::Guild => GUILD_EDIT_SQL,
            };
            sqlx::query(sql)
                .bind(message_id.as_i64())
                .bind(edited_at)
                .bind(content)
                .bind(embed)
                .execute(conn)
                .await?;
        }
        Record::Deletion { scope, message_id } => {
            let sql = match scope {
                Scope::Private => PRIVATE_DELETION_SQL,
                Scope::Guild => GUILD_DELETION_SQL,
            };
            sqlx::query(sql)
                .bind(message_id.as_i64())
                .execute(conn)
                .await?;
        }
    }
    Ok(())
}

#[async_trait]
impl Store for Database {
    async fn apply(&self, records: &[Record]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for record in records {
            write_record(&mut *tx, record).await?;
        }
        tx.commit().await?;

        debug!("Wrote {} records", records.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_creates_every_table() {
        for table in TABLES {
            let create = format!("CREATE TABLE IF NOT EXISTS {} (", table);
            assert!(SCHEMA.contains(&create), "schema is missing {}", table);
        }
    }

    #[test]
    fn test_record_tables_are_known() {
        use crate::model::User;
        use crate::Snowflake;

        let user = User { id: Snowflake(1), username: "a".into(), discriminator: "0".into(), bot: false };
        let records = [
            Record::user(&user),
            Record::Guild { id: Snowflake(2), name: "g".into() },
            Record::Deletion { scope: Scope::Guild, message_id: Snowflake(3) },
            Record::Deletion { scope: Scope::Private, message_id: Snowflake(3) },
        ];
        for record in &records {
            assert!(TABLES.contains(&record.table()));
        }
    }

    #[test]
    fn test_stats_lookup() {
        let stats = DbStats { tables: vec![("users".to_string(), 4)] };
        assert_eq!(stats.count("users"), Some(4));
        assert_eq!(stats.count("guilds"), None);
    }
}
