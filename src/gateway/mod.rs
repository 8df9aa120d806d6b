// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Discord gateway protocol
//!
//! [`Session`] holds the protocol state (sequence number, session id,
//! heartbeat bookkeeping) and turns incoming payloads into [`Action`]s.
//! It does no IO; [`shard::Shard`] owns the websocket and carries the
//! actions out.

pub mod shard;

use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::model::{Channel, Guild, Message, MessageDelete, MessageUpdate, UnavailableGuild, User};
use crate::{PanopticonError, Result};

pub const GATEWAY_VERSION: u8 = 10;

/// Gateway opcodes
pub mod opcode {
    pub const DISPATCH: u8 = 0;
    pub const HEARTBEAT: u8 = 1;
    pub const IDENTIFY: u8 = 2;
    pub const RESUME: u8 = 6;
    pub const RECONNECT: u8 = 7;
    pub const INVALID_SESSION: u8 = 9;
    pub const HELLO: u8 = 10;
    pub const HEARTBEAT_ACK: u8 = 11;
}

/// Gateway intents
pub mod intents {
    pub const GUILDS: u64 = 1 << 0;
    pub const GUILD_MESSAGES: u64 = 1 << 9;
    pub const DIRECT_MESSAGES: u64 = 1 << 12;
    pub const MESSAGE_CONTENT: u64 = 1 << 15;

    /// Everything the archive listens to
    pub const ARCHIVE: u64 = GUILDS | GUILD_MESSAGES | DIRECT_MESSAGES | MESSAGE_CONTENT;
}

/// A raw gateway frame
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayPayload {
    pub op: u8,
    #[serde(default)]
    pub d: Value,
    #[serde(default)]
    pub s: Option<u64>,
    #[serde(default)]
    pub t: Option<String>,
}

impl GatewayPayload {
    pub fn parse(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Ready {
    pub user: User,
    pub session_id: String,
    #[serde(default)]
    pub resume_gateway_url: Option<String>,
}

/// Dispatch events the archive consumes
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Ready(Ready),
    Resumed,
    GuildCreate(Guild),
    GuildUpdate(Guild),
    GuildDelete(UnavailableGuild),
    ChannelCreate(Channel),
    ChannelUpdate(Channel),
    ChannelDelete(Channel),
    MessageCreate(Box<Message>),
    MessageUpdate(Box<MessageUpdate>),
    MessageDelete(MessageDelete),
}

impl Event {
    /// Decode a dispatch by name; unknown names yield `None`
    pub fn parse(name: &str, data: Value) -> Result<Option<Self>> {
        let event = match name {
            "READY" => Event::Ready(serde_json::from_value(data)?),
            "RESUMED" => Event::Resumed,
            "GUILD_CREATE" => Event::GuildCreate(serde_json::from_value(data)?),
            "GUILD_UPDATE" => Event::GuildUpdate(serde_json::from_value(data)?),
            "GUILD_DELETE" => Event::GuildDelete(serde_json::from_value(data)?),
            "CHANNEL_CREATE" => Event::ChannelCreate(serde_json::from_value(data)?),
            "CHANNEL_UPDATE" => Event::ChannelUpdate(serde_json::from_value(data)?),
            "CHANNEL_DELETE" => Event::ChannelDelete(serde_json::from_value(data)?),
            "MESSAGE_CREATE" => Event::MessageCreate(Box::new(serde_json::from_value(data)?)),
            "MESSAGE_UPDATE" => Event::MessageUpdate(Box::new(serde_json::from_value(data)?)),
            "MESSAGE_DELETE" => Event::MessageDelete(serde_json::from_value(data)?),
            _ => return Ok(None),
        };
        Ok(Some(event))
    }

    pub fn name(&self) -> &'static str {
        match self {
            Event::Ready(_) => "READY",
            Event::Resumed => "RESUMED",
            Event::GuildCreate(_) => "GUILD_CREATE",
            Event::GuildUpdate(_) => "GUILD_UPDATE",
            Event::GuildDelete(_) => "GUILD_DELETE",
            Event::ChannelCreate(_) => "CHANNEL_CREATE",
            Event::ChannelUpdate(_) => "CHANNEL_UPDATE",
            Event::ChannelDelete(_) => "CHANNEL_DELETE",
            Event::MessageCreate(_) => "MESSAGE_CREATE",
            Event::MessageUpdate(_) => "MESSAGE_UPDATE",
            Event::MessageDelete(_) => "MESSAGE_DELETE",
        }
    }
}

/// What the connection should do next
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Send this payload
    Send(Value),
    /// Start heartbeating at this interval
    StartHeartbeat(Duration),
    /// Hand an event to the archive
    Dispatch(Event),
    /// Drop the socket and resume on a new one
    Reconnect,
    /// Drop the socket, wait a little, and identify from scratch
    Reidentify,
}

/// How to react to a close frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseAction {
    Resume,
    Reidentify,
    Fatal,
}

/// Map a gateway close code to a reaction
pub fn classify_close(code: Option<u16>) -> CloseAction {
    match code {
        // Authentication failed, invalid shard, sharding required,
        // invalid API version, invalid intents, disallowed intents
        Some(4004) | Some(4010) | Some(4011) | Some(4012) | Some(4013) | Some(4014) => {
            CloseAction::Fatal
        }
        // Invalid seq, session timed out
        Some(4007) | Some(4009) => CloseAction::Reidentify,
        _ => CloseAction::Resume,
    }
}

/// Protocol state for one gateway session
#[derive(Debug, Clone)]
pub struct Session {
    token: String,
    intents: u64,
    seq: Option<u64>,
    session_id: Option<String>,
    resume_url: Option<String>,
    awaiting_ack: bool,
}

impl Session {
    pub fn new(token: &str, intents: u64) -> Self {
        Self {
            token: token.to_string(),
            intents,
            seq: None,
            session_id: None,
            resume_url: None,
            awaiting_ack: false,
        }
    }

    pub fn seq(&self) -> Option<u64> {
        self.seq
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// URL to reconnect to when resuming
    pub fn resume_url(&self) -> Option<&str> {
        self.session_id.as_ref().and(self.resume_url.as_deref())
    }

    pub fn can_resume(&self) -> bool {
        self.session_id.is_some() && self.seq.is_some()
    }

    /// Forget the session so the next connection identifies
    pub fn reset(&mut self) {
        self.seq = None;
        self.session_id = None;
        self.resume_url = None;
    }

    /// Called when a new socket opens
    pub fn on_connect(&mut self) {
        self.awaiting_ack = false;
    }

    /// Heartbeat payload for the timer, or `None` if the last one was never
    /// acknowledged (zombied connection)
    pub fn heartbeat(&mut self) -> Option<Value> {
        if self.awaiting_ack {
            return None;
        }
        self.awaiting_ack = true;
        Some(self.heartbeat_payload())
    }

    fn heartbeat_payload(&self) -> Value {
        json!({ "op": opcode::HEARTBEAT, "d": self.seq })
    }

    fn identify_payload(&self) -> Value {
        json!({
            "op": opcode::IDENTIFY,
            "d": {
                "token": self.token,
                "intents": self.intents,
                "properties": {
                    "os": std::env::consts::OS,
                    "browser": "panopticon",
                    "device": "panopticon"
                }
            }
        })
    }

    fn resume_payload(&self) -> Value {
        json!({
            "op": opcode::RESUME,
            "d": {
                "token": self.token,
                "session_id": self.session_id,
                "seq": self.seq
            }
        })
    }

    /// React to one incoming payload
    pub fn handle(&mut self, payload: GatewayPayload) -> Result<Vec<Action>> {
        match payload.op {
            opcode::HELLO => {
                let interval = payload.d.get("heartbeat_interval")
                    .and_then(Value::as_u64)
                    .filter(|ms| *ms > 0)
                    .ok_or_else(|| PanopticonError::Gateway("HELLO without heartbeat_interval".to_string()))?;
                let login = if self.can_resume() {
                    info!("Resuming session (seq {:?})", self.seq);
                    self.resume_payload()
                } else {
                    info!("Identifying");
                    self.identify_payload()
                };
                Ok(vec![
                    Action::StartHeartbeat(Duration::from_millis(interval)),
                    Action::Send(login),
                ])
            }
            opcode::HEARTBEAT_ACK => {
                self.awaiting_ack = false;
                Ok(vec![])
            }
            opcode::HEARTBEAT => {
                debug!("Gateway requested a heartbeat");
                Ok(vec![Action::Send(self.heartbeat_payload())])
            }
            opcode::RECONNECT => {
                info!("Gateway requested reconnect");
                Ok(vec![Action::Reconnect])
            }
            opcode::INVALID_SESSION => {
                if payload.d.as_bool().unwrap_or(false) {
                    warn!("Session invalidated, resumable");
                    Ok(vec![Action::Reconnect])
                } else {
                    warn!("Session invalidated, identifying again");
                    self.reset();
                    Ok(vec![Action::Reidentify])
                }
            }
            opcode::DISPATCH => {
                if let Some(seq) = payload.s {
                    self.seq = Some(seq);
                }
                let Some(name) = payload.t else {
                    return Ok(vec![]);
                };
                match Event::parse(&name, payload.d)? {
                    Some(event) => {
                        if let Event::Ready(ref ready) = event {
                            self.session_id = Some(ready.session_id.clone());
                            self.resume_url = ready.resume_gateway_url.clone();
                        }
                        Ok(vec![Action::Dispatch(event)])
                    }
                    None => {
                        debug!("Ignoring dispatch {}", name);
                        Ok(vec![])
                    }
                }
            }
            other => {
                debug!("Ignoring opcode {}", other);
                Ok(vec![])
            }
        }
    }

    /// React to a close frame
    pub fn on_close(&mut self, code: Option<u16>) -> CloseAction {
        let action = classify_close(code);
        if action != CloseAction::Resume {
            self.reset();
        }
        action
    }
}
