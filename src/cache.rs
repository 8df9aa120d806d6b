// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! In-memory view of guilds, channels and recent messages

use std::collections::{HashMap, VecDeque};

use crate::model::{Channel, ChannelKind, Guild, Message, User};
use crate::Snowflake;

#[derive(Debug, Clone, PartialEq)]
pub struct CachedGuild {
    pub id: Snowflake,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CachedChannel {
    pub id: Snowflake,
    pub kind: ChannelKind,
    pub guild_id: Option<Snowflake>,
    pub name: Option<String>,
    /// The other party of a DM
    pub recipient: Option<User>,
}

/// Gateway state needed to archive messages
pub struct Cache {
    current_user: Option<User>,
    guilds: HashMap<Snowflake, CachedGuild>,
    channels: HashMap<Snowflake, CachedChannel>,
    messages: MessageCache,
}

impl Cache {
    pub fn new(max_messages: usize) -> Self {
        Self {
            current_user: None,
            guilds: HashMap::new(),
            channels: HashMap::new(),
            messages: MessageCache::new(max_messages),
        }
    }

    pub fn current_user(&self) -> Option<&User> {
        self.current_user.as_ref()
    }

    pub fn set_current_user(&mut self, user: User) {
        self.current_user = Some(user);
    }

    pub fn guild(&self, id: Snowflake) -> Option<&CachedGuild> {
        self.guilds.get(&id)
    }

    pub fn channel(&self, id: Snowflake) -> Option<&CachedChannel> {
        self.channels.get(&id)
    }

    /// Store a guild and its channel list (GUILD_CREATE / GUILD_UPDATE)
    pub fn upsert_guild(&mut self, guild: &Guild) {
        if guild.unavailable {
            return;
        }
        let name = guild.name.clone()
            .or_else(|| self.guilds.get(&guild.id).map(|g| g.name.clone()))
            .unwrap_or_default();
        self.guilds.insert(guild.id, CachedGuild { id: guild.id, name });

        for channel in &guild.channels {
            let mut channel = channel.clone();
            channel.guild_id.get_or_insert(guild.id);
            self.upsert_channel(&channel);
        }
    }

    /// Forget a guild and every channel in it
    pub fn remove_guild(&mut self, id: Snowflake) {
        self.guilds.remove(&id);
        self.channels.retain(|_, c| c.guild_id != Some(id));
    }

    pub fn upsert_channel(&mut self, channel: &Channel) {
        let recipient = self.dm_recipient(channel);
        self.channels.insert(channel.id, CachedChannel {
            id: channel.id,
            kind: channel.kind,
            guild_id: channel.guild_id,
            name: channel.name.clone(),
            recipient,
        });
    }

    pub fn remove_channel(&mut self, id: Snowflake) {
        self.channels.remove(&id);
    }

    /// Record a DM channel whose recipient was worked out from a message
    pub fn insert_dm(&mut self, id: Snowflake, recipient: User) {
        self.channels.insert(id, CachedChannel {
            id,
            kind: ChannelKind::Dm,
            guild_id: None,
            name: None,
            recipient: Some(recipient),
        });
    }

    fn dm_recipient(&self, channel: &Channel) -> Option<User> {
        if channel.kind != ChannelKind::Dm {
            return None;
        }
        let me = self.current_user.as_ref().map(|u| u.id);
        channel.recipients.iter()
            .find(|u| Some(u.id) != me)
            .or_else(|| channel.recipients.first())
            .cloned()
    }

    pub fn messages(&self) -> &MessageCache {
        &self.messages
    }

    pub fn messages_mut(&mut self) -> &mut MessageCache {
        &mut self.messages
    }

    pub fn guild_count(&self) -> usize {
        self.guilds.len()
    }
}

/// Bounded message store, oldest evicted first
pub struct MessageCache {
    capacity: usize,
    order: VecDeque<Snowflake>,
    messages: HashMap<Snowflake, Message>,
}

impl MessageCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity.min(4096)),
            messages: HashMap::new(),
        }
    }

    pub fn insert(&mut self, message: Message) {
        if self.capacity == 0 {
            return;
        }
        let id = message.id;
        if self.messages.insert(id, message).is_some() {
            return;
        }
        self.order.push_back(id);

        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.messages.remove(&oldest);
            }
        }
    }

    pub fn get(&self, id: Snowflake) -> Option<&Message> {
        self.messages.get(&id)
    }

    pub fn get_mut(&mut self, id: Snowflake) -> Option<&mut Message> {
        self.messages.get_mut(&id)
    }

    pub fn remove(&mut self, id: Snowflake) -> Option<Message> {
        let message = self.messages.remove(&id)?;
        self.order.retain(|m| *m != id);
        Some(message)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
