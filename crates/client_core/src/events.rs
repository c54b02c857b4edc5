//! Events published to presentation collaborators.

use shared::domain::ChatId;

use crate::gate::GateState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateAction {
    Accept,
    Leave,
    Report,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    ChatsUpdated,
    PagesUpdated {
        chat_id: ChatId,
    },
    ChatRemoved {
        chat_id: ChatId,
    },
    GateChanged {
        chat_id: ChatId,
        state: GateState,
    },
    UploadProgress {
        chat_id: ChatId,
        progress: f32,
    },
    SendFailed {
        chat_id: ChatId,
        reason: String,
    },
    UploadFailed {
        chat_id: ChatId,
        filename: String,
        reason: String,
    },
    GateFailed {
        chat_id: ChatId,
        action: GateAction,
        reason: String,
    },
    Error(String),
}
