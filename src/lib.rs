//! Quiz Bot Library
//!
//! A Telegram bot that turns uploaded text files into quiz polls.
//!
//! This crate provides the core functionality for:
//! - Parsing quiz documents into questions with per-block error isolation
//! - Resolving user entitlements (sudo, premium, 24-hour tokens) with caching
//! - Broadcasting a message to every known user with rate-limit backoff
//! - Connecting to Telegram via `MTProto` and sending quiz polls

pub mod access;
pub mod broadcast;
pub mod commands;
pub mod config;
pub mod quiz;
pub mod store;
pub mod telegram;
