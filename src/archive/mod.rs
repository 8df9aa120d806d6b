// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Turns gateway events into archive records
//!
//! The [`Archiver`] keeps the gateway [`Cache`] up to date and, for every
//! message, edit or deletion worth keeping, builds an ordered batch of
//! [`Record`]s that a [`Store`] writes in one go. Parents come before
//! children in a batch (user and channel before message, message before
//! attachments).

mod record;

pub use record::{Record, Scope};

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::cache::Cache;
use crate::gateway::Event;
use crate::model::{ChannelKind, Message, MessageDelete, MessageUpdate, User};
use crate::rest::ChannelLookup;
use crate::Result;

/// Destination for archive records
#[async_trait]
pub trait Store: Send + Sync {
    /// Write a batch atomically, in order
    async fn apply(&self, records: &[Record]) -> Result<()>;
}

/// Counters reported at shutdown
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArchiveStats {
    pub messages: u64,
    pub edits: u64,
    pub deletions: u64,
    pub failures: u64,
}

/// Event handler that feeds the store
pub struct Archiver {
    store: Arc<dyn Store>,
    lookup: Arc<dyn ChannelLookup>,
    cache: Cache,
    /// Own user is written on the first READY only
    connected: bool,
    stats: ArchiveStats,
}

impl Archiver {
    pub fn new(store: Arc<dyn Store>, lookup: Arc<dyn ChannelLookup>, max_messages: usize) -> Self {
        Self {
            store,
            lookup,
            cache: Cache::new(max_messages),
            connected: false,
            stats: ArchiveStats::default(),
        }
    }

    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    pub fn stats(&self) -> ArchiveStats {
        self.stats
    }

    /// Handle events until the gateway side hangs up
    pub async fn run(mut self, mut events: mpsc::Receiver<Event>) -> ArchiveStats {
        while let Some(event) = events.recv().await {
            let name = event.name();
            if let Err(e) = self.handle(event).await {
                self.stats.failures += 1;
                error!("Failed to archive {}: {}", name, e);
            }
        }
        self.stats
    }

    /// Apply one gateway event
    pub async fn handle(&mut self, event: Event) -> Result<()> {
        match event {
            Event::Ready(ready) => {
                info!(
                    "Ready as {} ({} guilds pending)",
                    ready.user.username,
                    self.cache.guild_count()
                );
                self.cache.set_current_user(ready.user.clone());
                if !self.connected {
                    self.store.apply(&[Record::user(&ready.user)]).await?;
                    self.connected = true;
                }
            }
            Event::Resumed => info!("Session resumed"),
            Event::GuildCreate(guild) | Event::GuildUpdate(guild) => {
                debug!("Guild {} ({} channels)", guild.id, guild.channels.len());
                self.cache.upsert_guild(&guild);
            }
            Event::GuildDelete(guild) => {
                if !guild.unavailable {
                    info!("Removed from guild {}", guild.id);
                    self.cache.remove_guild(guild.id);
                }
            }
            Event::ChannelCreate(channel) | Event::ChannelUpdate(channel) => {
                self.cache.upsert_channel(&channel);
            }
            Event::ChannelDelete(channel) => self.cache.remove_channel(channel.id),
            Event::MessageCreate(message) => self.on_message(*message).await?,
            Event::MessageUpdate(update) => self.on_message_edit(&update).await?,
            Event::MessageDelete(deletion) => self.on_message_delete(&deletion).await?,
        }
        Ok(())
    }

    async fn on_message(&mut self, message: Message) -> Result<()> {
        let mut records = match message.guild_id {
            None => match self.private_records(&message).await? {
                Some(records) => records,
                None => return Ok(()),
            },
            Some(guild_id) => {
                let Some(channel) = self.cache.channel(message.channel_id) else {
                    debug!("Message {} in unknown channel {}", message.id, message.channel_id);
                    return Ok(());
                };
                if !channel.kind.is_archived_text() {
                    return Ok(());
                }
                let guild_name = self.cache.guild(guild_id)
                    .map(|g| g.name.clone())
                    .unwrap_or_default();

                vec![
                    Record::user(&message.author),
                    Record::Guild { id: guild_id, name: guild_name },
                    Record::GuildChannel {
                        id: channel.id,
                        guild_id,
                        name: channel.name.clone().unwrap_or_default(),
                    },
                ]
            }
        };

        let scope = Scope::of(&message);
        records.push(Record::message(scope, &message));
        records.extend(message.attachments.iter().map(|a| Record::attachment(scope, message.id, a)));

        self.cache.messages_mut().insert(message);
        self.store.apply(&records).await?;
        self.stats.messages += 1;
        Ok(())
    }

    /// Recipient user and DM channel rows, or `None` if the DM cannot be resolved
    async fn private_records(&mut self, message: &Message) -> Result<Option<Vec<Record>>> {
        let Some(me) = self.cache.current_user().map(|u| u.id) else {
            warn!("Direct message {} before READY, skipping", message.id);
            return Ok(None);
        };
        let Some(recipient) = self.resolve_recipient(message, me).await else {
            debug!("No recipient for DM channel {}", message.channel_id);
            return Ok(None);
        };

        let (low, high) = if recipient.id < me { (recipient.id, me) } else { (me, recipient.id) };
        Ok(Some(vec![
            Record::user(&recipient),
            Record::PrivateChannel { id: message.channel_id, user_low: low, user_high: high },
        ]))
    }

    async fn resolve_recipient(&mut self, message: &Message, me: crate::Snowflake) -> Option<User> {
        if let Some(channel) = self.cache.channel(message.channel_id) {
            if channel.kind != ChannelKind::Dm {
                return None;
            }
            if let Some(ref recipient) = channel.recipient {
                return Some(recipient.clone());
            }
        }

        if message.author.id != me {
            self.cache.insert_dm(message.channel_id, message.author.clone());
            return Some(message.author.clone());
        }

        match self.lookup.fetch_channel(message.channel_id).await {
            Ok(Some(channel)) if channel.kind == ChannelKind::Dm => {
                self.cache.upsert_channel(&channel);
                self.cache.channel(channel.id).and_then(|c| c.recipient.clone())
            }
            Ok(_) => None,
            Err(e) => {
                warn!("Could not look up DM channel {}: {}", message.channel_id, e);
                None
            }
        }
    }

    async fn on_message_edit(&mut self, update: &MessageUpdate) -> Result<()> {
        let Some(cached) = self.cache.messages_mut().get_mut(update.id) else {
            return Ok(());
        };

        let before_content = cached.content.clone();
        let before_embed = cached.rich_embed();
        cached.apply_update(update);
        let after_embed = cached.rich_embed();

        if cached.content == before_content && after_embed == before_embed {
            return Ok(());
        }

        let record = Record::Edit {
            scope: Scope::of(cached),
            message_id: cached.id,
            edited_at: cached.edited_timestamp.unwrap_or_else(Utc::now),
            content: cached.content.clone(),
            embed: after_embed,
        };
        self.store.apply(&[record]).await?;
        self.stats.edits += 1;
        Ok(())
    }

    async fn on_message_delete(&mut self, deletion: &MessageDelete) -> Result<()> {
        let Some(message) = self.cache.messages_mut().remove(deletion.id) else {
            return Ok(());
        };

        let record = Record::Deletion { scope: Scope::of(&message), message_id: message.id };
        match self.store.apply(&[record]).await {
            Ok(()) => {
                self.stats.deletions += 1;
                Ok(())
            }
            Err(e) if e.is_foreign_key_violation() => {
                // the message row was never written
                debug!("Deletion of unarchived message {}", message.id);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}
