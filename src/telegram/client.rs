//! Telegram client wrapper: the live send primitive.

use std::sync::Arc;

use async_trait::async_trait;
use grammers_client::{sender, Client, InvocationError, SenderPool};
use grammers_session::storages::SqliteSession;
use grammers_tl_types as tl;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::updates::{self, DocumentRef, InboundMessage};
use super::SendPacer;
use crate::broadcast::{BroadcastPayload, SendOutcome, SendPort};
use crate::config::TelegramConfig;
use crate::quiz::Question;
use crate::store::UserId;

/// Raw update batches coming off the sender pool.
pub type RawUpdatesReceiver =
    tokio::sync::mpsc::UnboundedReceiver<grammers_session::updates::UpdatesLike>;

/// Chunk size for document downloads; must stay 4 KiB aligned.
const DOWNLOAD_CHUNK: i32 = 128 * 1024;

/// Errors that can occur during Telegram operations.
#[derive(Debug, Error)]
pub enum TelegramError {
    #[error("Not authorized. Check the bot token.")]
    NotAuthorized,

    #[error("Bot sign in failed: {0}")]
    SignInFailed(String),

    #[error("Flood wait required: {0} seconds")]
    FloodWait(u32),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Session error: {0}")]
    Session(String),

    #[error("API invocation error: {0}")]
    Invocation(String),
}

impl From<InvocationError> for TelegramError {
    fn from(err: InvocationError) -> Self {
        let err_str = err.to_string();

        if (err_str.contains("FLOOD_WAIT") || err_str.contains("flood"))
            && let Some(seconds) = extract_flood_wait_seconds(&err_str)
        {
            return Self::FloodWait(seconds);
        }

        Self::Invocation(err_str)
    }
}

/// Extracts flood wait seconds from an error message.
fn extract_flood_wait_seconds(err_msg: &str) -> Option<u32> {
    let patterns = ["FLOOD_WAIT_", "flood wait "];

    for pattern in patterns {
        if let Some(idx) = err_msg.to_lowercase().find(&pattern.to_lowercase()) {
            let start = idx + pattern.len();
            let num_str: String = err_msg[start..]
                .chars()
                .take_while(char::is_ascii_digit)
                .collect();
            if let Ok(seconds) = num_str.parse() {
                return Some(seconds);
            }
        }
    }
    None
}

/// Error codes that mean a recipient is gone for good.
const PERMANENT_SEND_ERRORS: &[&str] = &[
    "USER_IS_BLOCKED",
    "USER_DEACTIVATED",
    "INPUT_USER_DEACTIVATED",
    "PEER_ID_INVALID",
    "USER_ID_INVALID",
    "CHAT_WRITE_FORBIDDEN",
];

/// High-level Telegram gateway for the quiz bot.
pub struct TelegramGate {
    /// The underlying grammers client.
    client: Client,

    /// Handle to the sender pool for disconnection.
    handle: sender::SenderPoolHandle,

    /// Pacer guarding every raw API call.
    pacer: SendPacer,

    /// Inbound private messages flattened from the raw update stream.
    inbound: tokio::sync::Mutex<tokio::sync::mpsc::Receiver<InboundMessage>>,

    /// Background task running the sender pool.
    _pool_task: JoinHandle<()>,

    /// Background task translating raw updates.
    _update_task: JoinHandle<()>,
}

impl TelegramGate {
    /// Connects to Telegram and signs in as a bot if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if connection or bot sign-in fails.
    pub async fn connect(config: &TelegramConfig) -> Result<Self, TelegramError> {
        info!("Connecting to Telegram...");

        let session = Arc::new(
            SqliteSession::open(&config.session_path)
                .await
                .map_err(|e| TelegramError::Session(e.to_string()))?,
        );

        let SenderPool {
            runner,
            mut updates,
            handle,
        } = SenderPool::new(Arc::clone(&session), config.api_id);

        let client = Client::new(handle.clone());

        let pool_task = tokio::spawn(async move {
            runner.run().await;
        });

        let (inbound_tx, inbound_rx) = tokio::sync::mpsc::channel(64);
        let update_task = tokio::spawn(async move {
            while let Some(batch) = updates.recv().await {
                let grammers_session::updates::UpdatesLike::Updates(batch) = batch else {
                    continue;
                };
                for message in updates::extract_inbound(batch) {
                    if inbound_tx.send(message).await.is_err() {
                        return;
                    }
                }
            }
            debug!("raw update stream closed");
        });

        let gate = Self {
            client,
            handle: handle.thin,
            pacer: SendPacer::from_millis(config.min_send_gap_ms),
            inbound: tokio::sync::Mutex::new(inbound_rx),
            _pool_task: pool_task,
            _update_task: update_task,
        };

        if !gate.is_authorized().await? {
            info!("Not authorized yet, signing in with bot token...");
            gate.client
                .bot_sign_in(&config.bot_token, &config.api_hash)
                .await
                .map_err(|e| TelegramError::SignInFailed(e.to_string()))?;

            if !gate.is_authorized().await? {
                return Err(TelegramError::NotAuthorized);
            }
        }

        info!("Connected to Telegram");
        Ok(gate)
    }

    /// Checks if the client is authorized.
    ///
    /// # Errors
    ///
    /// Returns an error if the check fails.
    pub async fn is_authorized(&self) -> Result<bool, TelegramError> {
        self.client
            .is_authorized()
            .await
            .map_err(|e| TelegramError::Connection(e.to_string()))
    }

    /// Sends a plain text message, pacing and serving flood waits.
    ///
    /// # Errors
    ///
    /// Returns an error if the invocation fails.
    pub async fn send_message(&self, recipient: UserId, text: &str) -> Result<(), TelegramError> {
        self.pacer.acquire().await;

        let request = tl::functions::messages::SendMessage {
            no_webpage: true,
            silent: false,
            background: false,
            clear_draft: false,
            noforwards: false,
            update_stickersets_order: false,
            invert_media: false,
            allow_paid_floodskip: false,
            peer: user_peer(recipient),
            reply_to: None,
            message: text.to_owned(),
            random_id: rand::random(),
            reply_markup: None,
            entities: None,
            schedule_date: None,
            schedule_repeat_period: None,
            send_as: None,
            quick_reply_shortcut: None,
            effect: None,
            allow_paid_stars: None,
            suggested_post: None,
            rich_message: None,
        };

        match self.client.invoke(&request).await {
            Ok(_) => Ok(()),
            Err(e) => {
                let err: TelegramError = e.into();
                if let TelegramError::FloodWait(seconds) = &err {
                    self.pacer.hold_for(*seconds).await;
                }
                Err(err)
            }
        }
    }

    /// Sends a question as a Telegram quiz poll.
    ///
    /// # Errors
    ///
    /// Returns an error if the invocation fails.
    pub async fn send_quiz_poll(
        &self,
        recipient: UserId,
        question: &Question,
    ) -> Result<(), TelegramError> {
        self.pacer.acquire().await;

        let answers = question
            .options
            .iter()
            .enumerate()
            .map(|(i, option)| {
                tl::enums::PollAnswer::Answer(tl::types::PollAnswer {
                    text: plain_text(option),
                    option: vec![i as u8],
                    media: None,
                    added_by: None,
                    date: None,
                })
            })
            .collect();

        let poll = tl::types::Poll {
            id: rand::random(),
            closed: false,
            public_voters: false,
            multiple_choice: false,
            quiz: true,
            open_answers: false,
            revoting_disabled: false,
            shuffle_answers: false,
            hide_results_until_close: false,
            creator: false,
            subscribers_only: false,
            question: plain_text(&question.prompt),
            answers,
            close_period: None,
            close_date: None,
            countries_iso2: None,
            hash: 0,
        };

        let media = tl::enums::InputMedia::Poll(Box::new(tl::types::InputMediaPoll {
            poll: tl::enums::Poll::Poll(poll),
            correct_answers: Some(vec![question.correct_index as i32]),
            attached_media: None,
            solution: question.explanation.clone(),
            solution_entities: question.explanation.as_ref().map(|_| vec![]),
            solution_media: None,
        }));

        let request = tl::functions::messages::SendMedia {
            silent: false,
            background: false,
            clear_draft: false,
            noforwards: false,
            update_stickersets_order: false,
            invert_media: false,
            allow_paid_floodskip: false,
            peer: user_peer(recipient),
            reply_to: None,
            media,
            message: String::new(),
            random_id: rand::random(),
            reply_markup: None,
            entities: None,
            schedule_date: None,
            schedule_repeat_period: None,
            send_as: None,
            quick_reply_shortcut: None,
            effect: None,
            allow_paid_stars: None,
            suggested_post: None,
        };

        match self.client.invoke(&request).await {
            Ok(_) => {
                debug!("sent quiz poll to {}", recipient);
                Ok(())
            }
            Err(e) => {
                let err: TelegramError = e.into();
                if let TelegramError::FloodWait(seconds) = &err {
                    self.pacer.hold_for(*seconds).await;
                }
                Err(err)
            }
        }
    }

    /// Waits for the next inbound private message.
    ///
    /// Returns `None` once the update stream has closed.
    pub async fn next_inbound(&self) -> Option<InboundMessage> {
        self.inbound.lock().await.recv().await
    }

    /// Downloads a document attachment in full.
    ///
    /// # Errors
    ///
    /// Returns an error if any chunk fetch fails or the file is served
    /// from a CDN.
    pub async fn download_document(&self, document: &DocumentRef) -> Result<Vec<u8>, TelegramError> {
        let mut bytes = Vec::new();
        let mut offset = 0i64;

        loop {
            self.pacer.acquire().await;

            let request = tl::functions::upload::GetFile {
                precise: true,
                cdn_supported: false,
                location: tl::enums::InputFileLocation::InputDocumentFileLocation(
                    tl::types::InputDocumentFileLocation {
                        id: document.id,
                        access_hash: document.access_hash,
                        file_reference: document.file_reference.clone(),
                        thumb_size: String::new(),
                    },
                ),
                offset,
                limit: DOWNLOAD_CHUNK,
            };

            match self.client.invoke(&request).await {
                Ok(tl::enums::upload::File::File(part)) => {
                    let chunk_len = part.bytes.len();
                    bytes.extend(part.bytes);
                    if chunk_len < DOWNLOAD_CHUNK as usize {
                        debug!("downloaded document {} ({} bytes)", document.id, bytes.len());
                        return Ok(bytes);
                    }
                    offset += i64::from(DOWNLOAD_CHUNK);
                }
                Ok(tl::enums::upload::File::CdnRedirect(_)) => {
                    return Err(TelegramError::Invocation(
                        "document is served from a CDN".to_owned(),
                    ));
                }
                Err(e) => {
                    let err: TelegramError = e.into();
                    if let TelegramError::FloodWait(seconds) = &err {
                        self.pacer.hold_for(*seconds).await;
                    }
                    return Err(err);
                }
            }
        }
    }

    /// Fetches the text of a message by id, for staging a broadcast
    /// from a replied-to message.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup invocation fails.
    pub async fn fetch_message_text(
        &self,
        message_id: i32,
    ) -> Result<Option<(i32, String)>, TelegramError> {
        self.pacer.acquire().await;

        let request = tl::functions::messages::GetMessages {
            id: vec![tl::enums::InputMessage::Id(tl::types::InputMessageId {
                id: message_id,
            })],
        };

        let messages = match self.client.invoke(&request).await? {
            tl::enums::messages::Messages::Messages(m) => m.messages,
            tl::enums::messages::Messages::Slice(m) => m.messages,
            _ => return Ok(None),
        };

        Ok(messages.into_iter().find_map(|message| match message {
            tl::enums::Message::Message(m) => Some((m.id, m.message)),
            _ => None,
        }))
    }

    /// Disconnects from Telegram.
    pub fn disconnect(&self) {
        info!("Disconnecting from Telegram...");
        self.handle.quit();
    }
}

/// Classifies a send error into the broadcast outcome taxonomy.
fn classify_send_error(err: &TelegramError) -> SendOutcome {
    match err {
        TelegramError::FloodWait(seconds) => SendOutcome::RateLimited {
            retry_after: std::time::Duration::from_secs(u64::from(*seconds)),
        },
        TelegramError::Invocation(msg)
            if PERMANENT_SEND_ERRORS.iter().any(|code| msg.contains(code)) =>
        {
            SendOutcome::Failed {
                reason: msg.clone(),
            }
        }
        other => SendOutcome::Failed {
            reason: other.to_string(),
        },
    }
}

#[async_trait]
impl SendPort for TelegramGate {
    async fn send(&self, recipient: UserId, payload: &BroadcastPayload) -> SendOutcome {
        match self.send_message(recipient, &payload.text).await {
            Ok(()) => SendOutcome::Delivered,
            Err(e) => {
                warn!("send to {} failed: {}", recipient, e);
                classify_send_error(&e)
            }
        }
    }

    async fn send_quiz(&self, recipient: UserId, question: &Question) -> SendOutcome {
        match self.send_quiz_poll(recipient, question).await {
            Ok(()) => SendOutcome::Delivered,
            Err(e) => {
                warn!("quiz poll to {} failed: {}", recipient, e);
                classify_send_error(&e)
            }
        }
    }

    async fn send_text(&self, recipient: UserId, text: &str) -> SendOutcome {
        match self.send_message(recipient, text).await {
            Ok(()) => SendOutcome::Delivered,
            Err(e) => classify_send_error(&e),
        }
    }
}

/// Builds an input peer for a private chat with `user_id`.
fn user_peer(user_id: UserId) -> tl::enums::InputPeer {
    tl::enums::InputPeer::User(tl::types::InputPeerUser {
        user_id,
        access_hash: 0,
    })
}

/// Wraps plain text in the TL text-with-entities shape.
fn plain_text(text: &str) -> tl::enums::TextWithEntities {
    tl::enums::TextWithEntities::Entities(tl::types::TextWithEntities {
        text: text.to_owned(),
        entities: vec![],
    })
}

impl std::fmt::Debug for TelegramGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramGate")
            .field("pacer", &self.pacer)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_flood_wait() {
        assert_eq!(extract_flood_wait_seconds("FLOOD_WAIT_120"), Some(120));
        assert_eq!(extract_flood_wait_seconds("flood wait 60 seconds"), Some(60));
        assert_eq!(extract_flood_wait_seconds("some other error"), None);
    }

    #[test]
    fn test_classify_flood_wait_as_rate_limited() {
        let outcome = classify_send_error(&TelegramError::FloodWait(30));
        assert_eq!(
            outcome,
            SendOutcome::RateLimited {
                retry_after: std::time::Duration::from_secs(30)
            }
        );
    }

    #[test]
    fn test_not_authorized_points_at_the_token() {
        assert_eq!(
            TelegramError::NotAuthorized.to_string(),
            "Not authorized. Check the bot token."
        );
    }

    #[test]
    fn test_classify_blocked_as_permanent() {
        let err = TelegramError::Invocation("RPC error: USER_IS_BLOCKED".to_owned());
        assert!(matches!(
            classify_send_error(&err),
            SendOutcome::Failed { .. }
        ));
    }
}
