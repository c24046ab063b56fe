//! Raw update translation.
//!
//! The sender pool hands over raw TL update batches; this module picks
//! out inbound private messages and flattens them into
//! [`InboundMessage`] values the rest of the bot can route on. Group
//! and channel traffic is ignored.

use grammers_tl_types as tl;

use crate::store::UserId;

/// One inbound private message, flattened from the TL update shapes.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    /// Sender of the message.
    pub from: UserId,

    /// Sender's username, when the update batch carried it.
    pub username: Option<String>,

    /// Sender's first name, when the update batch carried it.
    pub first_name: Option<String>,

    /// Message id within the private chat.
    pub message_id: i32,

    /// Plain message text (empty for bare media messages).
    pub text: String,

    /// Id of the message this one replies to, if any.
    pub reply_to: Option<i32>,

    /// Attached document, if any.
    pub document: Option<DocumentRef>,
}

/// Enough of a TL document to download it later.
#[derive(Debug, Clone)]
pub struct DocumentRef {
    pub id: i64,
    pub access_hash: i64,
    pub file_reference: Vec<u8>,
    pub size: i64,
    pub mime_type: String,
}

/// Flattens one raw update batch into inbound private messages.
pub(super) fn extract_inbound(batch: tl::enums::Updates) -> Vec<InboundMessage> {
    match batch {
        tl::enums::Updates::UpdateShortMessage(short) if !short.out => {
            vec![InboundMessage {
                from: short.user_id,
                username: None,
                first_name: None,
                message_id: short.id,
                text: short.message,
                reply_to: reply_target(short.reply_to),
                document: None,
            }]
        }
        tl::enums::Updates::Updates(batch) => collect(batch.updates, &batch.users),
        tl::enums::Updates::Combined(batch) => collect(batch.updates, &batch.users),
        tl::enums::Updates::UpdateShort(short) => {
            from_update(short.update, &[]).into_iter().collect()
        }
        _ => Vec::new(),
    }
}

fn collect(updates: Vec<tl::enums::Update>, users: &[tl::enums::User]) -> Vec<InboundMessage> {
    updates
        .into_iter()
        .filter_map(|update| from_update(update, users))
        .collect()
}

fn from_update(update: tl::enums::Update, users: &[tl::enums::User]) -> Option<InboundMessage> {
    let tl::enums::Update::NewMessage(new) = update else {
        return None;
    };
    let tl::enums::Message::Message(message) = new.message else {
        return None;
    };
    if message.out {
        return None;
    }

    // Private chats only.
    let tl::enums::Peer::User(peer) = message.peer_id else {
        return None;
    };
    let from = match message.from_id {
        Some(tl::enums::Peer::User(sender)) => sender.user_id,
        Some(_) => return None,
        None => peer.user_id,
    };

    let (username, first_name) = identity(from, users);
    Some(InboundMessage {
        from,
        username,
        first_name,
        message_id: message.id,
        text: message.message,
        reply_to: reply_target(message.reply_to),
        document: message.media.and_then(document_ref),
    })
}

/// Looks a sender up in the batch's user list.
fn identity(user_id: UserId, users: &[tl::enums::User]) -> (Option<String>, Option<String>) {
    for user in users {
        if let tl::enums::User::User(user) = user
            && user.id == user_id
        {
            return (user.username.clone(), user.first_name.clone());
        }
    }
    (None, None)
}

fn reply_target(header: Option<tl::enums::MessageReplyHeader>) -> Option<i32> {
    match header? {
        tl::enums::MessageReplyHeader::Header(header) => header.reply_to_msg_id,
        _ => None,
    }
}

fn document_ref(media: tl::enums::MessageMedia) -> Option<DocumentRef> {
    let tl::enums::MessageMedia::Document(media) = media else {
        return None;
    };
    let tl::enums::Document::Document(document) = media.document? else {
        return None;
    };
    Some(DocumentRef {
        id: document.id,
        access_hash: document.access_hash,
        file_reference: document.file_reference,
        size: document.size,
        mime_type: document.mime_type,
    })
}
