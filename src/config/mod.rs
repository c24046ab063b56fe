//! Configuration module for the quiz bot.
//!
//! Handles Telegram API credentials, owner identity, store location
//! and pacing knobs, all sourced from environment variables.

mod settings;

pub use settings::{BotSettings, ConfigError, TelegramConfig};
