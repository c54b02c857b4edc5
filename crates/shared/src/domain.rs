use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_newtype!(AccountId);
id_newtype!(ChatId);
id_newtype!(MessageId);
id_newtype!(MediaId);

/// One-to-one chat as seen by the current account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chat {
    pub chat_id: ChatId,
    pub accepted: bool,
    pub created_by: AccountId,
    pub participant: AccountId,
}

impl Chat {
    /// True when the chat was started by someone else and has not been accepted yet.
    pub fn is_unsolicited_for(&self, current: AccountId) -> bool {
        !self.accepted && self.created_by != current
    }
}

/// Identity of a message inside one chat.
///
/// Optimistic entries carry a client-generated id until a refetch replaces
/// them with the server's record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum MessageRef {
    Local(Uuid),
    Server(MessageId),
}

impl MessageRef {
    pub fn new_local() -> Self {
        Self::Local(Uuid::new_v4())
    }

    pub fn is_local(&self) -> bool {
        matches!(self, Self::Local(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub media_id: MediaId,
    pub preview_url: String,
    pub filename: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: MessageRef,
    pub chat_id: ChatId,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment: Option<Attachment>,
    pub author_id: AccountId,
    pub created_at: DateTime<Utc>,
    pub pending: bool,
}

impl ChatMessage {
    pub fn optimistic(
        chat_id: ChatId,
        author_id: AccountId,
        content: impl Into<String>,
        attachment: Option<Attachment>,
    ) -> Self {
        Self {
            id: MessageRef::new_local(),
            chat_id,
            content: content.into(),
            attachment,
            author_id,
            created_at: Utc::now(),
            pending: true,
        }
    }
}

/// A page of messages, newest first.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MessagePage {
    pub messages: Vec<ChatMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<MessageId>,
}
