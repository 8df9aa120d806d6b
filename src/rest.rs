// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Discord REST API client

use async_trait::async_trait;
use reqwest::{header, Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use crate::model::{Channel, User};
use crate::{PanopticonError, Result, Snowflake};

const USER_AGENT: &str = concat!(
    "DiscordBot (https://gitlab.com/hyperpolymath/panopticon, ",
    env!("CARGO_PKG_VERSION"),
    ")"
);

/// Something that can look a channel up by id
#[async_trait]
pub trait ChannelLookup: Send + Sync {
    async fn fetch_channel(&self, id: Snowflake) -> Result<Option<Channel>>;
}

/// Discord REST client authenticated with a bot token
pub struct RestClient {
    client: Client,
    base_url: String,
    token: String,
}

#[derive(Deserialize)]
struct GatewayBotResponse {
    url: String,
}

impl RestClient {
    /// Create a new REST client
    pub fn new(base_url: &str, token: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>> {
        let url = format!("{}{}", self.base_url, path);
        debug!("GET {}", url);

        let response = self.client
            .get(&url)
            .header(header::AUTHORIZATION, format!("Bot {}", self.token))
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if status == StatusCode::UNAUTHORIZED {
            return Err(PanopticonError::Unauthorized(
                "Discord rejected the bot token".to_string(),
            ));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PanopticonError::Discord { status: status.as_u16(), body });
        }

        Ok(Some(response.json().await?))
    }

    /// Gateway websocket URL for this bot
    pub async fn gateway_url(&self) -> Result<String> {
        let info: GatewayBotResponse = self.get("/gateway/bot").await?
            .ok_or_else(|| PanopticonError::Gateway("/gateway/bot not found".to_string()))?;
        Ok(info.url)
    }

    /// The bot's own account
    pub async fn current_user(&self) -> Result<User> {
        self.get("/users/@me").await?
            .ok_or_else(|| PanopticonError::Unauthorized("/users/@me not found".to_string()))
    }

    /// A channel, or `None` if it does not exist or is not visible
    pub async fn channel(&self, id: Snowflake) -> Result<Option<Channel>> {
        self.get(&format!("/channels/{}", id)).await
    }
}

#[async_trait]
impl ChannelLookup for RestClient {
    async fn fetch_channel(&self, id: Snowflake) -> Result<Option<Channel>> {
        self.channel(id).await
    }
}
