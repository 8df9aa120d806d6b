// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Error types for Panopticon

use thiserror::Error;

/// Result type alias for Panopticon operations
pub type Result<T> = std::result::Result<T, PanopticonError>;

/// Panopticon error types
#[derive(Error, Debug)]
pub enum PanopticonError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("File system error: {0}")]
    FileSystem(#[from] std::io::Error),

    #[error("API error: {0}")]
    Api(#[from] reqwest::Error),

    #[error("Discord returned status {status}: {body}")]
    Discord { status: u16, body: String },

    #[error("Authentication failed: {0}")]
    Unauthorized(String),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Gateway error: {0}")]
    Gateway(String),

    #[error("Gateway closed with fatal code {code}: {reason}")]
    FatalClose { code: u16, reason: String },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PanopticonError {
    /// True when the database rejected a row because a referenced row is missing
    pub fn is_foreign_key_violation(&self) -> bool {
        match self {
            PanopticonError::Database(sqlx::Error::Database(db)) => {
                db.is_foreign_key_violation()
            }
            _ => false,
        }
    }
}
