use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{
    AccountId, Attachment, Chat, ChatId, ChatMessage, MediaId, MessageId, MessagePage, MessageRef,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatSummary {
    pub chat_id: ChatId,
    pub accepted: bool,
    pub created_by_account: AccountId,
    pub other_account: AccountId,
}

impl From<ChatSummary> for Chat {
    fn from(value: ChatSummary) -> Self {
        Self {
            chat_id: value.chat_id,
            accepted: value.accepted,
            created_by: value.created_by_account,
            participant: value.other_account,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachmentPayload {
    pub media_id: MediaId,
    pub preview_url: String,
    pub filename: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

impl From<AttachmentPayload> for Attachment {
    fn from(value: AttachmentPayload) -> Self {
        Self {
            media_id: value.media_id,
            preview_url: value.preview_url,
            filename: value.filename,
            mime_type: value.mime_type,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagePayload {
    pub message_id: MessageId,
    pub chat_id: ChatId,
    pub author_id: AccountId,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment: Option<AttachmentPayload>,
    pub created_at: DateTime<Utc>,
}

impl From<MessagePayload> for ChatMessage {
    fn from(value: MessagePayload) -> Self {
        Self {
            id: MessageRef::Server(value.message_id),
            chat_id: value.chat_id,
            content: value.content,
            attachment: value.attachment.map(Attachment::from),
            author_id: value.author_id,
            created_at: value.created_at,
            pending: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagePagePayload {
    pub messages: Vec<MessagePayload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<MessageId>,
}

impl From<MessagePagePayload> for MessagePage {
    fn from(value: MessagePagePayload) -> Self {
        Self {
            messages: value.messages.into_iter().map(ChatMessage::from).collect(),
            next_cursor: value.next_cursor,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateMessageRequest {
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_id: Option<MediaId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportChatRequest {
    pub reason: String,
}
