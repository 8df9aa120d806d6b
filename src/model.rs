// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Discord payload types
//!
//! Only the fields the archive needs are modelled; everything else in the
//! gateway payloads is skipped during deserialization.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Snowflake;

/// A Discord user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: Snowflake,
    pub username: String,
    /// "0" for accounts migrated to unique usernames
    #[serde(default = "default_discriminator")]
    pub discriminator: String,
    #[serde(default)]
    pub bot: bool,
}

fn default_discriminator() -> String {
    "0".to_string()
}

/// Channel types as numbered by the API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub enum ChannelKind {
    GuildText,
    Dm,
    GuildVoice,
    GroupDm,
    GuildCategory,
    GuildNews,
    NewsThread,
    PublicThread,
    PrivateThread,
    GuildStageVoice,
    GuildForum,
    Other(u8),
}

impl From<u8> for ChannelKind {
    fn from(value: u8) -> Self {
        match value {
            0 => ChannelKind::GuildText,
            1 => ChannelKind::Dm,
            2 => ChannelKind::GuildVoice,
            3 => ChannelKind::GroupDm,
            4 => ChannelKind::GuildCategory,
            5 => ChannelKind::GuildNews,
            10 => ChannelKind::NewsThread,
            11 => ChannelKind::PublicThread,
            12 => ChannelKind::PrivateThread,
            13 => ChannelKind::GuildStageVoice,
            15 => ChannelKind::GuildForum,
            other => ChannelKind::Other(other),
        }
    }
}

impl From<ChannelKind> for u8 {
    fn from(kind: ChannelKind) -> Self {
        match kind {
            ChannelKind::GuildText => 0,
            ChannelKind::Dm => 1,
            ChannelKind::GuildVoice => 2,
            ChannelKind::GroupDm => 3,
            ChannelKind::GuildCategory => 4,
            ChannelKind::GuildNews => 5,
            ChannelKind::NewsThread => 10,
            ChannelKind::PublicThread => 11,
            ChannelKind::PrivateThread => 12,
            ChannelKind::GuildStageVoice => 13,
            ChannelKind::GuildForum => 15,
            ChannelKind::Other(n) => n,
        }
    }
}

impl ChannelKind {
    /// Guild channels whose messages are archived (plain text and announcements)
    pub fn is_archived_text(self) -> bool {
        matches!(self, ChannelKind::GuildText | ChannelKind::GuildNews)
    }
}

/// A guild or DM channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    pub id: Snowflake,
    #[serde(rename = "type")]
    pub kind: ChannelKind,
    /// Absent inside GUILD_CREATE's channel list and for DMs
    #[serde(default)]
    pub guild_id: Option<Snowflake>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub recipients: Vec<User>,
}

/// A guild, as sent in GUILD_CREATE / GUILD_UPDATE
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Guild {
    pub id: Snowflake,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub channels: Vec<Channel>,
    #[serde(default)]
    pub unavailable: bool,
}

/// GUILD_DELETE payload
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct UnavailableGuild {
    pub id: Snowflake,
    #[serde(default)]
    pub unavailable: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub id: Snowflake,
    pub filename: String,
    pub size: i64,
    pub url: String,
}

/// A message as sent in MESSAGE_CREATE
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Snowflake,
    pub channel_id: Snowflake,
    #[serde(default)]
    pub guild_id: Option<Snowflake>,
    pub author: User,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub edited_timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub embeds: Vec<serde_json::Value>,
}

/// MESSAGE_UPDATE payload; every field but the ids may be missing
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MessageUpdate {
    pub id: Snowflake,
    pub channel_id: Snowflake,
    #[serde(default)]
    pub guild_id: Option<Snowflake>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub edited_timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub attachments: Option<Vec<Attachment>>,
    #[serde(default)]
    pub embeds: Option<Vec<serde_json::Value>>,
}

/// MESSAGE_DELETE payload
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MessageDelete {
    pub id: Snowflake,
    pub channel_id: Snowflake,
    #[serde(default)]
    pub guild_id: Option<Snowflake>,
}

impl Message {
    /// DMs carry no guild id
    pub fn is_private(&self) -> bool {
        self.guild_id.is_none()
    }

    /// First rich embed of this message, as JSON
    pub fn rich_embed(&self) -> Option<String> {
        rich_embed(&self.embeds)
    }

    /// Merge a partial update into this (cached) copy
    pub fn apply_update(&mut self, update: &MessageUpdate) {
        if let Some(ref content) = update.content {
            self.content = content.clone();
        }
        if update.edited_timestamp.is_some() {
            self.edited_timestamp = update.edited_timestamp;
        }
        if let Some(ref attachments) = update.attachments {
            self.attachments = attachments.clone();
        }
        if let Some(ref embeds) = update.embeds {
            self.embeds = embeds.clone();
        }
    }
}

/// Serialize the first embed of type `rich`, if any
pub fn rich_embed(embeds: &[serde_json::Value]) -> Option<String> {
    embeds
        .iter()
        .find(|e| e.get("type").and_then(|t| t.as_str()) == Some("rich"))
        .map(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn message_json() -> serde_json::Value {
        json!({
            "id": "1100000000000000001",
            "channel_id": "1100000000000000002",
            "guild_id": "1100000000000000003",
            "author": {
                "id": "1100000000000000004",
                "username": "ada",
                "discriminator": "0",
                "global_name": "Ada",
                "avatar": null
            },
            "content": "hello",
            "timestamp": "2024-01-01T00:00:00.000000+00:00",
            "edited_timestamp": null,
            "tts": false,
            "attachments": [{
                "id": "1100000000000000005",
                "filename": "cat.png",
                "size": 2048,
                "url": "https://cdn.discordapp.com/attachments/1/2/cat.png",
                "proxy_url": "https://media.discordapp.net/attachments/1/2/cat.png"
            }],
            "embeds": [
                { "type": "image", "url": "https://example.com/x.png" },
                { "type": "rich", "title": "Card" }
            ]
        })
    }

    #[test]
    fn test_parse_message() {
        let msg: Message = serde_json::from_value(message_json()).unwrap();
        assert_eq!(msg.id, Snowflake(1100000000000000001));
        assert_eq!(msg.author.username, "ada");
        assert!(!msg.author.bot);
        assert!(!msg.is_private());
        assert_eq!(msg.attachments.len(), 1);
        assert_eq!(msg.attachments[0].size, 2048);
    }

    #[test]
    fn test_rich_embed_picks_first_rich() {
        let msg: Message = serde_json::from_value(message_json()).unwrap();
        let embed = msg.rich_embed().unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&embed).unwrap();
        assert_eq!(parsed["title"], "Card");
    }

    #[test]
    fn test_rich_embed_none_without_rich() {
        assert_eq!(rich_embed(&[]), None);
        assert_eq!(rich_embed(&[json!({ "type": "video" })]), None);
    }

    #[test]
    fn test_apply_partial_update() {
        let mut msg: Message = serde_json::from_value(message_json()).unwrap();
        let update: MessageUpdate = serde_json::from_value(json!({
            "id": "1100000000000000001",
            "channel_id": "1100000000000000002",
            "embeds": []
        }))
        .unwrap();

        msg.apply_update(&update);
        assert_eq!(msg.content, "hello");
        assert!(msg.embeds.is_empty());
        assert_eq!(msg.attachments.len(), 1);
    }

    #[test]
    fn test_channel_kinds() {
        let ch: Channel = serde_json::from_value(json!({ "id": "1", "type": 5, "name": "news" })).unwrap();
        assert_eq!(ch.kind, ChannelKind::GuildNews);
        assert!(ch.kind.is_archived_text());
        assert!(!ChannelKind::PublicThread.is_archived_text());
        assert_eq!(ChannelKind::from(99), ChannelKind::Other(99));
        assert_eq!(u8::from(ChannelKind::Dm), 1);
    }
}
