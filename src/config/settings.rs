//! Application settings and Telegram configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::store::UserId;

/// Telegram API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    /// Telegram API ID (obtain from <https://my.telegram.org>).
    pub api_id: i32,

    /// Telegram API hash (obtain from <https://my.telegram.org>).
    pub api_hash: String,

    /// Bot token from `@BotFather`.
    pub bot_token: String,

    /// Path to the session file.
    #[serde(default = "default_session_path")]
    pub session_path: PathBuf,

    /// Minimum gap between raw API calls in milliseconds.
    #[serde(default = "default_min_send_gap_ms")]
    pub min_send_gap_ms: u64,
}

fn default_session_path() -> PathBuf {
    PathBuf::from("session.db")
}

fn default_min_send_gap_ms() -> u64 {
    100
}

impl TelegramConfig {
    /// Creates configuration from environment variables.
    ///
    /// Expects `TG_API_ID`, `TG_API_HASH` and `BOT_TOKEN` to be set.
    ///
    /// # Errors
    ///
    /// Returns an error if environment variables are missing or invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_id: i32 = std::env::var("TG_API_ID")
            .map_err(|_| ConfigError::MissingEnvVar("TG_API_ID"))?
            .parse()
            .map_err(|_| ConfigError::InvalidApiId)?;

        let api_hash = std::env::var("TG_API_HASH")
            .map_err(|_| ConfigError::MissingEnvVar("TG_API_HASH"))?;

        let bot_token = std::env::var("BOT_TOKEN")
            .map_err(|_| ConfigError::MissingEnvVar("BOT_TOKEN"))?;

        let session_path = std::env::var("TG_SESSION_PATH")
            .map_or_else(|_| default_session_path(), PathBuf::from);

        let min_send_gap_ms = std::env::var("MIN_SEND_GAP_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or_else(default_min_send_gap_ms);

        Ok(Self {
            api_id,
            api_hash,
            bot_token,
            session_path,
            min_send_gap_ms,
        })
    }
}

/// Bot-specific settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotSettings {
    /// Owner user id; the owner is implicitly sudo and the only
    /// operator allowed to broadcast.
    pub owner_id: UserId,

    /// Path to the JSON store file.
    #[serde(default = "default_store_path")]
    pub store_path: PathBuf,

    /// Pause between broadcast recipients in milliseconds.
    #[serde(default = "default_broadcast_pace_ms")]
    pub broadcast_pace_ms: u64,

    /// Log level for the application.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_store_path() -> PathBuf {
    PathBuf::from("quiz_bot_store.json")
}

fn default_broadcast_pace_ms() -> u64 {
    500
}

fn default_log_level() -> String {
    "info".to_owned()
}

impl BotSettings {
    /// Creates bot settings from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if `OWNER_ID` is missing or not numeric.
    pub fn from_env() -> Result<Self, ConfigError> {
        let owner_id: UserId = std::env::var("OWNER_ID")
            .map_err(|_| ConfigError::MissingEnvVar("OWNER_ID"))?
            .parse()
            .map_err(|_| ConfigError::InvalidOwnerId)?;

        Ok(Self {
            owner_id,
            store_path: std::env::var("STORE_PATH")
                .map_or_else(|_| default_store_path(), PathBuf::from),
            broadcast_pace_ms: std::env::var("BROADCAST_PACE_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or_else(default_broadcast_pace_ms),
            log_level: std::env::var("RUST_LOG").unwrap_or_else(|_| default_log_level()),
        })
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(&'static str),

    #[error("Invalid API ID format (must be a positive integer)")]
    InvalidApiId,

    #[error("Invalid OWNER_ID format (must be a numeric user id)")]
    InvalidOwnerId,
}
