// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

use chrono::{DateTime, Utc};

use crate::model::{Attachment, Message, User};
use crate::Snowflake;

/// Which family of tables a message lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Private,
    Guild,
}

impl Scope {
    pub fn of(message: &Message) -> Self {
        if message.is_private() { Scope::Private } else { Scope::Guild }
    }
}

/// One row to write
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    User {
        id: Snowflake,
        created_at: DateTime<Utc>,
        name: String,
        discriminator: String,
        bot: bool,
    },
    Guild {
        id: Snowflake,
        name: String,
    },
    /// Participants are stored in ascending id order
    PrivateChannel {
        id: Snowflake,
        user_low: Snowflake,
        user_high: Snowflake,
    },
    GuildChannel {
        id: Snowflake,
        guild_id: Snowflake,
        name: String,
    },
    Message {
        scope: Scope,
        id: Snowflake,
        created_at: DateTime<Utc>,
        channel_id: Snowflake,
        author_id: Snowflake,
        content: String,
        embed: Option<String>,
    },
    Attachment {
        scope: Scope,
        id: Snowflake,
        message_id: Snowflake,
        size: i64,
        filename: String,
        url: String,
    },
    Edit {
        scope: Scope,
        message_id: Snowflake,
        edited_at: DateTime<Utc>,
        content: String,
        embed: Option<String>,
    },
    Deletion {
        scope: Scope,
        message_id: Snowflake,
    },
}

impl Record {
    pub fn user(user: &User) -> Self {
        Record::User {
            id: user.id,
            created_at: user.id.created_at(),
            name: user.username.clone(),
            discriminator: user.discriminator.clone(),
            bot: user.bot,
        }
    }

    pub fn message(scope: Scope, message: &Message) -> Self {
        Record::Message {
            scope,
            id: message.id,
            created_at: message.id.created_at(),
            channel_id: message.channel_id,
            author_id: message.author.id,
            content: message.content.clone(),
            embed: message.rich_embed(),
        }
    }

    pub fn attachment(scope: Scope, message_id: Snowflake, attachment: &Attachment) -> Self {
        Record::Attachment {
            scope,
            id: attachment.id,
            message_id,
            size: attachment.size,
            filename: attachment.filename.clone(),
            url: attachment.url.clone(),
        }
    }

    /// Destination table
    pub fn table(&self) -> &'static str {
        match self {
            Record::User { .. } => "users",
            Record::Guild { .. } => "guilds",
            Record::PrivateChannel { .. } => "private_channels",
            Record::GuildChannel { .. } => "guild_channels",
            Record::Message { scope: Scope::Private, .. } => "private_messages",
            Record::Message { scope: Scope::Guild, .. } => "guild_messages",
            Record::Attachment { scope: Scope::Private, .. } => "private_attachments",
            Record::Attachment { scope: Scope::Guild, .. } => "guild_attachments",
            Record::Edit { scope: Scope::Private, .. } => "private_edits",
            Record::Edit { scope: Scope::Guild, .. } => "guild_edits",
            Record::Deletion { scope: Scope::Private, .. } => "private_deletions",
            Record::Deletion { scope: Scope::Guild, .. } => "guild_deletions",
        }
    }
}
