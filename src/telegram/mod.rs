//! Telegram client wrapper module.
//!
//! Provides the live implementation of the bot's send primitive on
//! top of grammers, including bot-token authentication, quiz poll
//! dispatch and outbound pacing.

mod client;
mod rate_limiter;
mod updates;

pub use client::{RawUpdatesReceiver, TelegramError, TelegramGate};
pub use rate_limiter::SendPacer;
pub use updates::{DocumentRef, InboundMessage};
