//! Command types and definitions.

use std::fmt;

use crate::store::UserId;

/// Arguments for granting premium access.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrantPremiumArgs {
    pub user_id: UserId,
    pub duration: String,
    pub plan: String,
}

/// Available bot commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BotCommand {
    /// Greet the user and register them.
    Start,

    /// Show help information.
    Help,

    /// Show the quiz file format.
    CreateQuiz,

    /// Stage a broadcast from a replied-to message (owner only).
    Broadcast,

    /// Send the staged broadcast (owner only).
    ConfirmBroadcast,

    /// Discard the staged broadcast or stop a running one.
    Cancel,

    /// Add a user to the sudo list (owner only).
    AddSudo(UserId),

    /// Remove a user from the sudo list (owner only).
    RemoveSudo(UserId),

    /// Grant premium access for a duration (sudo only).
    GrantPremium(GrantPremiumArgs),

    /// Revoke premium access (sudo only).
    RevokePremium(UserId),

    /// List premium grants (sudo only).
    PremiumUsers,

    /// Request a 24-hour access token.
    GetToken,

    /// Complete token verification by presenting the token back.
    Verify(String),

    /// Show the caller's resolved access tier.
    MyAccess,
}

impl BotCommand {
    /// Parses a command from a message text.
    ///
    /// Returns `None` if the message is not a valid command. A
    /// `@botname` suffix on the command word is tolerated.
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        if !text.starts_with('/') {
            return None;
        }

        let (word, args) = match text[1..].split_once(char::is_whitespace) {
            Some((word, args)) => (word, Some(args.trim())),
            None => (&text[1..], None),
        };

        // "/help@quiz_bot" addresses this bot in a group.
        let cmd = word
            .split('@')
            .next()
            .unwrap_or(word)
            .to_lowercase();

        match cmd.as_str() {
            "start" => Some(Self::Start),
            "help" => Some(Self::Help),
            "createquiz" => Some(Self::CreateQuiz),
            "broadcast" => Some(Self::Broadcast),
            "confirm_broadcast" => Some(Self::ConfirmBroadcast),
            "cancel" => Some(Self::Cancel),
            "addsudo" => parse_user_id(args).map(Self::AddSudo),
            "rmsudo" => parse_user_id(args).map(Self::RemoveSudo),
            "addpremium" => Self::parse_grant_premium(args?),
            "rmpremium" => parse_user_id(args).map(Self::RevokePremium),
            "premiumusers" => Some(Self::PremiumUsers),
            "gettoken" => Some(Self::GetToken),
            "verify" => args
                .filter(|a| !a.is_empty())
                .map(|a| Self::Verify(a.to_owned())),
            "myaccess" => Some(Self::MyAccess),
            _ => None,
        }
    }

    /// Parses grant arguments: `<user_id> <duration> [plan]`
    fn parse_grant_premium(args: &str) -> Option<Self> {
        let mut parts = args.split_whitespace();
        let user_id = parts.next()?.parse().ok()?;
        let duration = parts.next()?.to_owned();
        let plan = parts.next().unwrap_or("premium").to_owned();

        Some(Self::GrantPremium(GrantPremiumArgs {
            user_id,
            duration,
            plan,
        }))
    }

    /// Returns the command name as it appears in help.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Help => "help",
            Self::CreateQuiz => "createquiz",
            Self::Broadcast => "broadcast",
            Self::ConfirmBroadcast => "confirm_broadcast",
            Self::Cancel => "cancel",
            Self::AddSudo(_) => "addsudo",
            Self::RemoveSudo(_) => "rmsudo",
            Self::GrantPremium(_) => "addpremium",
            Self::RevokePremium(_) => "rmpremium",
            Self::PremiumUsers => "premiumusers",
            Self::GetToken => "gettoken",
            Self::Verify(_) => "verify",
            Self::MyAccess => "myaccess",
        }
    }

    /// Returns all user-facing commands with their descriptions.
    #[must_use]
    pub fn all_commands() -> Vec<(&'static str, &'static str)> {
        vec![
            ("start", "Register and greet"),
            ("help", "Show this help message"),
            ("createquiz", "Show the quiz file format"),
            ("gettoken", "Request 24-hour access"),
            ("verify <token>", "Complete token verification"),
            ("myaccess", "Show your access tier"),
            ("broadcast", "Stage a broadcast (reply to a message)"),
            ("confirm_broadcast", "Send the staged broadcast"),
            ("cancel", "Discard or stop a broadcast"),
            ("addsudo <id>", "Add an administrator"),
            ("rmsudo <id>", "Remove an administrator"),
            ("addpremium <id> <duration> [plan]", "Grant premium"),
            ("rmpremium <id>", "Revoke premium"),
            ("premiumusers", "List premium grants"),
        ]
    }
}

fn parse_user_id(args: Option<&str>) -> Option<UserId> {
    args?.split_whitespace().next()?.parse().ok()
}

impl fmt::Display for BotCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AddSudo(id) => write!(f, "addsudo {id}"),
            Self::RemoveSudo(id) => write!(f, "rmsudo {id}"),
            Self::GrantPremium(args) => {
                write!(f, "addpremium {} {} {}", args.user_id, args.duration, args.plan)
            }
            Self::RevokePremium(id) => write!(f, "rmpremium {id}"),
            Self::Verify(_) => write!(f, "verify <token>"),
            _ => write!(f, "{}", self.name()),
        }
    }
}

/// Result of command execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    /// Whether the command did what was asked.
    pub success: bool,

    /// Response message to show the user.
    pub message: String,
}

impl CommandResult {
    /// Creates a successful result.
    #[must_use]
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    /// Creates an informational failure result.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_commands() {
        assert_eq!(BotCommand::parse("/start"), Some(BotCommand::Start));
        assert_eq!(BotCommand::parse("/help"), Some(BotCommand::Help));
        assert_eq!(
            BotCommand::parse("/confirm_broadcast"),
            Some(BotCommand::ConfirmBroadcast)
        );
    }

    #[test]
    fn test_parse_with_bot_suffix() {
        assert_eq!(
            BotCommand::parse("/help@my_quiz_bot"),
            Some(BotCommand::Help)
        );
    }

    #[test]
    fn test_parse_case_insensitive() {
        assert_eq!(BotCommand::parse("/START"), Some(BotCommand::Start));
    }

    #[test]
    fn test_parse_addsudo() {
        assert_eq!(
            BotCommand::parse("/addsudo 12345"),
            Some(BotCommand::AddSudo(12345))
        );
        assert_eq!(BotCommand::parse("/addsudo"), None);
        assert_eq!(BotCommand::parse("/addsudo abc"), None);
    }

    #[test]
    fn test_parse_addpremium() {
        assert_eq!(
            BotCommand::parse("/addpremium 42 1month gold"),
            Some(BotCommand::GrantPremium(GrantPremiumArgs {
                user_id: 42,
                duration: "1month".to_owned(),
                plan: "gold".to_owned(),
            }))
        );
    }

    #[test]
    fn test_parse_addpremium_default_plan() {
        assert_eq!(
            BotCommand::parse("/addpremium 42 7days"),
            Some(BotCommand::GrantPremium(GrantPremiumArgs {
                user_id: 42,
                duration: "7days".to_owned(),
                plan: "premium".to_owned(),
            }))
        );
    }

    #[test]
    fn test_parse_verify() {
        assert_eq!(
            BotCommand::parse("/verify deadbeef"),
            Some(BotCommand::Verify("deadbeef".to_owned()))
        );
        assert_eq!(BotCommand::parse("/verify"), None);
    }

    #[test]
    fn test_non_commands_ignored() {
        assert_eq!(BotCommand::parse("hello"), None);
        assert_eq!(BotCommand::parse("/unknown"), None);
        assert_eq!(BotCommand::parse(""), None);
    }
}
