// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Panopticon: Discord Message Archiver
//!
//! Watches guild text channels and direct messages over the Discord gateway
//! and records users, channels, messages, edits and deletions in PostgreSQL.

pub mod archive;
pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod gateway;
pub mod model;
pub mod rest;
pub mod snowflake;

pub use config::AppConfig;
pub use error::{PanopticonError, Result};
pub use snowflake::Snowflake;
