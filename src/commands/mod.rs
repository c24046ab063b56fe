//! Bot command surface.
//!
//! `types` parses message text into [`BotCommand`] values; `handler`
//! executes them against the store, the access resolver and the
//! broadcast engine, producing a [`CommandResult`] reply.

mod handler;
mod types;

pub use handler::CommandHandler;
pub use types::{BotCommand, CommandResult, GrantPremiumArgs};

/// How many quiz block errors a reply lists before eliding the rest.
pub const MAX_ERRORS_SHOWN: usize = 5;
