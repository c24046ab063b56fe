//! Command handler implementation.
//!
//! Thin glue between inbound messages and the core: every handler
//! records the interaction, consults the access resolver where the
//! operation is gated, and delegates the real work to the parser, the
//! resolver or the broadcast engine.

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use super::types::{BotCommand, CommandResult, GrantPremiumArgs};
use super::MAX_ERRORS_SHOWN;
use crate::access::{AccessError, AccessResolver};
use crate::broadcast::{
    BroadcastEngine, BroadcastPayload, CancelFlag, DeliveryReport, JobBoard, Progress, SendOutcome,
    SendPort, Sleeper, BACKOFF_MARGIN,
};
use crate::quiz;
use crate::store::{all_user_ids, note_quiz_created, record_interaction, Store, UserId};

/// Handles bot commands and document uploads.
pub struct CommandHandler {
    resolver: Arc<AccessResolver>,
    store: Arc<dyn Store>,
    port: Arc<dyn SendPort>,
    sleeper: Arc<dyn Sleeper>,
    engine: BroadcastEngine,
    jobs: JobBoard,
    owner_id: UserId,

    /// Cancel flag of the broadcast currently running, if any.
    active_cancel: Mutex<Option<CancelFlag>>,
}

impl CommandHandler {
    /// Creates a new command handler.
    #[must_use]
    pub fn new(
        resolver: Arc<AccessResolver>,
        store: Arc<dyn Store>,
        port: Arc<dyn SendPort>,
        sleeper: Arc<dyn Sleeper>,
        engine: BroadcastEngine,
        owner_id: UserId,
    ) -> Self {
        Self {
            resolver,
            store,
            port,
            sleeper,
            engine,
            jobs: JobBoard::new(),
            owner_id,
            active_cancel: Mutex::new(None),
        }
    }

    /// Tries to parse and execute a command from a message.
    ///
    /// `reply` carries the payload staged from a replied-to message,
    /// used by `/broadcast`. Returns `None` if the message is not a
    /// command.
    pub async fn try_handle(
        &self,
        from: UserId,
        username: Option<&str>,
        first_name: Option<&str>,
        text: &str,
        reply: Option<BroadcastPayload>,
    ) -> Option<CommandResult> {
        let command = BotCommand::parse(text)?;

        self.track(from, username, first_name).await;
        debug!("handling command {} from {}", command, from);

        let result = self.execute(from, command, reply).await;
        info!("command result for {}: success={}", from, result.success);
        Some(result)
    }

    /// Executes a parsed command.
    async fn execute(
        &self,
        from: UserId,
        command: BotCommand,
        reply: Option<BroadcastPayload>,
    ) -> CommandResult {
        match command {
            BotCommand::Start => Self::handle_start(),
            BotCommand::Help => Self::handle_help(),
            BotCommand::CreateQuiz => Self::handle_create_quiz(),
            BotCommand::Broadcast => self.handle_broadcast(from, reply).await,
            BotCommand::ConfirmBroadcast => self.handle_confirm(from).await,
            BotCommand::Cancel => self.handle_cancel(from).await,
            BotCommand::AddSudo(user_id) => self.handle_add_sudo(from, user_id).await,
            BotCommand::RemoveSudo(user_id) => self.handle_remove_sudo(from, user_id).await,
            BotCommand::GrantPremium(args) => self.handle_grant_premium(from, args).await,
            BotCommand::RevokePremium(user_id) => self.handle_revoke_premium(from, user_id).await,
            BotCommand::PremiumUsers => self.handle_premium_users(from).await,
            BotCommand::GetToken => self.handle_get_token(from).await,
            BotCommand::Verify(token) => self.handle_verify(from, &token).await,
            BotCommand::MyAccess => self.handle_my_access(from).await,
        }
    }

    /// Handles an uploaded quiz document for `from`.
    ///
    /// Access-gated: the uploader needs any entitlement tier. Parsed
    /// questions go out as quiz polls one by one; block errors are
    /// reported back without aborting the upload.
    pub async fn handle_document(
        &self,
        from: UserId,
        username: Option<&str>,
        first_name: Option<&str>,
        content: &str,
    ) -> CommandResult {
        self.track(from, username, first_name).await;

        if !self.resolver.has_valid_token(from).await {
            return CommandResult::error(
                "You need access to create quizzes. Use /gettoken for a free 24-hour pass.",
            );
        }

        let (questions, errors) = quiz::parse(content);

        if questions.is_empty() {
            let mut lines = vec!["No valid questions found in the file.".to_owned()];
            lines.extend(format_block_errors(&errors));
            return CommandResult::error(lines.join("\n"));
        }

        let mut sent = 0usize;
        let mut send_failures = 0usize;
        for question in &questions {
            if self.send_quiz_with_retry(from, question).await {
                sent += 1;
            } else {
                send_failures += 1;
            }
        }

        if let Err(e) = note_quiz_created(self.store.as_ref(), from).await {
            warn!("failed to record quiz creation for {}: {}", from, e);
        }

        let mut lines = vec![format!(
            "Quiz created: {sent} question(s) sent{}.",
            if send_failures > 0 {
                format!(", {send_failures} failed to send")
            } else {
                String::new()
            }
        )];
        lines.extend(format_block_errors(&errors));

        if sent > 0 {
            CommandResult::success(lines.join("\n"))
        } else {
            CommandResult::error(lines.join("\n"))
        }
    }

    /// Sends one quiz poll, retrying in place on rate limits.
    async fn send_quiz_with_retry(&self, recipient: UserId, question: &quiz::Question) -> bool {
        loop {
            match self.port.send_quiz(recipient, question).await {
                SendOutcome::Delivered => return true,
                SendOutcome::RateLimited { retry_after } => {
                    self.sleeper.sleep(retry_after + BACKOFF_MARGIN).await;
                }
                SendOutcome::Failed { reason } => {
                    warn!("quiz poll to {} failed: {}", recipient, reason);
                    return false;
                }
            }
        }
    }

    fn handle_start() -> CommandResult {
        CommandResult::success(
            "Welcome to the quiz bot!\n\
             Upload a text file to turn it into a quiz, or use /createquiz \
             to see the expected format. /help lists all commands.",
        )
    }

    fn handle_help() -> CommandResult {
        let mut lines = vec!["Available commands:".to_owned()];
        for (cmd, desc) in BotCommand::all_commands() {
            lines.push(format!("  /{cmd} - {desc}"));
        }
        CommandResult::success(lines.join("\n"))
    }

    fn handle_create_quiz() -> CommandResult {
        CommandResult::success(
            "Upload a .txt file with one question per block, blocks \
             separated by a blank line:\n\n\
             What is the capital of France?\n\
             A) London\n\
             B) Paris\n\
             C) Berlin\n\
             D) Madrid\n\
             Answer: 2\n\
             Optional explanation on a 7th line.",
        )
    }

    async fn handle_broadcast(
        &self,
        from: UserId,
        reply: Option<BroadcastPayload>,
    ) -> CommandResult {
        if from != self.owner_id {
            return CommandResult::error("Owner only command.");
        }

        let Some(payload) = reply else {
            return CommandResult::error(
                "Reply to a message with /broadcast to send it to all users, \
                 then confirm with /confirm_broadcast.",
            );
        };

        if payload.text.trim().is_empty() {
            return CommandResult::error("Only text messages can be broadcast.");
        }

        let recipients = match all_user_ids(self.store.as_ref()).await {
            Ok(ids) => ids,
            Err(e) => {
                warn!("cannot enumerate broadcast recipients: {}", e);
                return CommandResult::error("Store unavailable, broadcast not staged.");
            }
        };

        if recipients.is_empty() {
            return CommandResult::error("No users to broadcast to.");
        }

        let count = recipients.len();
        let preview = truncate(&payload.text, 200);
        let replaced = self.jobs.pending(from).await.is_some();
        self.jobs.prepare(from, payload, recipients).await;

        let mut reply = String::new();
        if replaced {
            reply.push_str("Replaced the previously staged broadcast.\n");
        }
        reply.push_str(&format!(
            "Confirm broadcast to {count} user(s)?\n\
             Message: {preview}\n\n\
             /confirm_broadcast to send, /cancel to abort."
        ));
        CommandResult::success(reply)
    }

    async fn handle_confirm(&self, from: UserId) -> CommandResult {
        if from != self.owner_id {
            return CommandResult::error("Owner only command.");
        }

        // One outbound stream at a time: while a run is in flight the
        // lock is held non-empty, and a second confirm is refused
        // without consuming the staged job.
        let cancel = CancelFlag::new();
        let job = {
            let mut active = self.active_cancel.lock().await;
            if active.is_some() {
                return CommandResult::error(
                    "A broadcast is already running. /cancel it first.",
                );
            }

            let Some(job) = self.jobs.take(from).await else {
                return CommandResult::error("No pending broadcast.");
            };

            *active = Some(cancel.clone());
            job
        };

        // Progress observations go back to the operator as status
        // notices while the run is in flight.
        let (tx, mut rx) = mpsc::channel::<Progress>(8);
        let port = Arc::clone(&self.port);
        let operator = from;
        let progress_task = tokio::spawn(async move {
            while let Some(p) = rx.recv().await {
                let _ = port
                    .send_text(
                        operator,
                        &format!(
                            "Broadcasting... {}/{} ({} sent, {} failed)",
                            p.attempted, p.total, p.succeeded, p.failed
                        ),
                    )
                    .await;
            }
        });

        let report = self
            .engine
            .deliver(&job.payload, &job.recipients, &cancel, Some(&tx))
            .await;
        drop(tx);
        let _ = progress_task.await;

        {
            let mut active = self.active_cancel.lock().await;
            *active = None;
        }

        CommandResult::success(summarize_report(&report))
    }

    async fn handle_cancel(&self, from: UserId) -> CommandResult {
        if from != self.owner_id {
            return CommandResult::error("Owner only command.");
        }

        {
            let active = self.active_cancel.lock().await;
            if let Some(flag) = active.as_ref() {
                flag.cancel();
                return CommandResult::success(
                    "Stopping the running broadcast after the current recipient.",
                );
            }
        }

        if self.jobs.cancel(from).await {
            CommandResult::success("Staged broadcast discarded.")
        } else {
            CommandResult::error("Nothing to cancel.")
        }
    }

    async fn handle_add_sudo(&self, from: UserId, user_id: UserId) -> CommandResult {
        if from != self.owner_id {
            return CommandResult::error("Owner only command.");
        }

        match self.resolver.add_sudo(user_id).await {
            Ok(()) => CommandResult::success(format!("User {user_id} is now sudo.")),
            Err(e) => CommandResult::error(format!("Failed to add sudo: {e}")),
        }
    }

    async fn handle_remove_sudo(&self, from: UserId, user_id: UserId) -> CommandResult {
        if from != self.owner_id {
            return CommandResult::error("Owner only command.");
        }

        match self.resolver.remove_sudo(user_id).await {
            Ok(true) => CommandResult::success(format!("User {user_id} is no longer sudo.")),
            Ok(false) => CommandResult::error(format!("User {user_id} was not sudo.")),
            Err(e) => CommandResult::error(format!("Failed to remove sudo: {e}")),
        }
    }

    async fn handle_grant_premium(&self, from: UserId, args: GrantPremiumArgs) -> CommandResult {
        if !self.resolver.is_sudo(from).await {
            return CommandResult::error("Sudo only command.");
        }

        match self
            .resolver
            .grant_premium(args.user_id, &args.duration, &args.plan)
            .await
        {
            Ok(record) => CommandResult::success(format!(
                "Premium ({}) granted to {} until {}.",
                record.plan,
                record.user_id,
                record.expiry_date.format("%Y-%m-%d %H:%M UTC")
            )),
            Err(AccessError::BadDuration(e)) => CommandResult::error(format!("{e}")),
            Err(e) => CommandResult::error(format!("Failed to grant premium: {e}")),
        }
    }

    async fn handle_revoke_premium(&self, from: UserId, user_id: UserId) -> CommandResult {
        if !self.resolver.is_sudo(from).await {
            return CommandResult::error("Sudo only command.");
        }

        match self.resolver.revoke_premium(user_id).await {
            Ok(true) => CommandResult::success(format!("Premium revoked from {user_id}.")),
            Ok(false) => CommandResult::error(format!("User {user_id} has no premium grant.")),
            Err(e) => CommandResult::error(format!("Failed to revoke premium: {e}")),
        }
    }

    async fn handle_premium_users(&self, from: UserId) -> CommandResult {
        if !self.resolver.is_sudo(from).await {
            return CommandResult::error("Sudo only command.");
        }

        match self.resolver.premium_users().await {
            Ok(grants) if grants.is_empty() => {
                CommandResult::success("No premium users.".to_owned())
            }
            Ok(grants) => {
                let mut lines = vec![format!("{} premium user(s):", grants.len())];
                for g in grants {
                    lines.push(format!(
                        "  {} ({}) until {}",
                        g.user_id,
                        g.plan,
                        g.expiry_date.format("%Y-%m-%d")
                    ));
                }
                CommandResult::success(lines.join("\n"))
            }
            Err(e) => CommandResult::error(format!("Failed to list premium users: {e}")),
        }
    }

    async fn handle_get_token(&self, from: UserId) -> CommandResult {
        let token = self.resolver.issue_verification(from).await;
        CommandResult::success(format!(
            "Your verification token: {token}\n\
             Complete verification with /verify {token} to unlock \
             24 hours of access."
        ))
    }

    async fn handle_verify(&self, from: UserId, token: &str) -> CommandResult {
        match self.resolver.complete_verification(from, token).await {
            Ok(record) => CommandResult::success(format!(
                "Verified! You have access until {}.",
                record.expires_at.format("%Y-%m-%d %H:%M UTC")
            )),
            Err(AccessError::NoPendingVerification) => {
                CommandResult::error("No pending verification. Use /gettoken first.")
            }
            Err(AccessError::TokenMismatch) => {
                CommandResult::error("That token does not match. Use /gettoken to start over.")
            }
            Err(e) => CommandResult::error(format!("Verification failed: {e}")),
        }
    }

    async fn handle_my_access(&self, from: UserId) -> CommandResult {
        let tier = self.resolver.resolve_tier(from).await;
        CommandResult::success(format!("Your access tier: {tier}"))
    }

    /// Records the interaction, tolerating store trouble.
    async fn track(&self, from: UserId, username: Option<&str>, first_name: Option<&str>) {
        if let Err(e) = record_interaction(self.store.as_ref(), from, username, first_name).await {
            warn!("failed to record interaction for {}: {}", from, e);
        }
    }
}

/// Formats the first few block errors for a reply message.
fn format_block_errors(errors: &[quiz::ParseError]) -> Vec<String> {
    let mut lines = Vec::new();
    if errors.is_empty() {
        return lines;
    }

    lines.push(format!("{} block(s) could not be parsed:", errors.len()));
    for error in errors.iter().take(MAX_ERRORS_SHOWN) {
        lines.push(format!("  {error}"));
    }
    if errors.len() > MAX_ERRORS_SHOWN {
        lines.push(format!("  ... and {} more", errors.len() - MAX_ERRORS_SHOWN));
    }
    lines
}

/// Builds the final broadcast summary shown to the operator.
fn summarize_report(report: &DeliveryReport) -> String {
    let mut lines = vec![
        if report.cancelled {
            "Broadcast cancelled.".to_owned()
        } else {
            "Broadcast complete!".to_owned()
        },
        format!("  Attempted: {}", report.attempted),
        format!("  Success: {}", report.succeeded),
        format!("  Failed: {}", report.failed),
    ];

    if !report.sample_failures.is_empty() {
        lines.push("Failures:".to_owned());
        for (user_id, reason) in &report.sample_failures {
            lines.push(format!("  {user_id}: {}", truncate(reason, 60)));
        }
    }

    lines.join("\n")
}

/// Truncates a string to a maximum length, adding "..." if truncated.
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_owned()
    } else {
        format!("{}...", s.chars().take(max_len).collect::<String>())
    }
}
