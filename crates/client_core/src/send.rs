//! Optimistic message submission.
//!
//! `begin` validates, claims the chat's single in-flight slot and inserts a
//! pending message; `PendingSend::settle` talks to the server and reconciles
//! the cache with whatever happened.

use std::{collections::HashSet, sync::Arc};

use parking_lot::Mutex;
use shared::domain::{AccountId, Attachment, ChatId, ChatMessage};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::{
    api::ChatApi,
    cache::{MessageCache, OptimisticHold, QueryKey, Snapshot},
    composer::is_blank,
    events::ClientEvent,
    gate::GateController,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendRequest {
    pub chat_id: ChatId,
    pub content: String,
    pub attachment: Option<Attachment>,
}

impl SendRequest {
    pub fn text(chat_id: ChatId, content: impl Into<String>) -> Self {
        Self {
            chat_id,
            content: content.into(),
            attachment: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        is_blank(&self.content) && self.attachment.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Empty,
    InFlight,
    UploadInProgress,
}

#[derive(Debug, Error)]
pub enum SendError {
    #[error("create message failed for chat {chat_id}: {source}")]
    CreateMessage {
        chat_id: ChatId,
        source: anyhow::Error,
    },
}

#[derive(Debug)]
pub enum SendOutcome {
    Skipped(SkipReason),
    Sent(ChatMessage),
    Failed(SendError),
}

impl SendOutcome {
    pub fn is_sent(&self) -> bool {
        matches!(self, SendOutcome::Sent(_))
    }
}

type InFlight = Arc<Mutex<HashSet<ChatId>>>;

/// Releases the chat's submission slot when dropped.
struct InFlightSlot {
    in_flight: InFlight,
    chat_id: ChatId,
}

impl InFlightSlot {
    fn claim(in_flight: &InFlight, chat_id: ChatId) -> Option<Self> {
        if !in_flight.lock().insert(chat_id) {
            return None;
        }
        Some(Self {
            in_flight: Arc::clone(in_flight),
            chat_id,
        })
    }
}

impl Drop for InFlightSlot {
    fn drop(&mut self) {
        self.in_flight.lock().remove(&self.chat_id);
    }
}

pub struct SendPipeline {
    api: Arc<dyn ChatApi>,
    cache: Arc<MessageCache>,
    gates: Arc<GateController>,
    account_id: AccountId,
    in_flight: InFlight,
    events: broadcast::Sender<ClientEvent>,
}

impl SendPipeline {
    pub fn new(
        api: Arc<dyn ChatApi>,
        cache: Arc<MessageCache>,
        gates: Arc<GateController>,
        account_id: AccountId,
        events: broadcast::Sender<ClientEvent>,
    ) -> Arc<Self> {
        Arc::new(Self {
            api,
            cache,
            gates,
            account_id,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            events,
        })
    }

    pub fn is_in_flight(&self, chat_id: ChatId) -> bool {
        self.in_flight.lock().contains(&chat_id)
    }

    /// Validates `request` and makes it visible in the cache as a pending
    /// message. Nothing is touched when the request is skipped.
    pub async fn begin(self: &Arc<Self>, request: SendRequest) -> Result<PendingSend, SkipReason> {
        let chat_id = request.chat_id;
        if request.is_empty() {
            debug!(chat_id = chat_id.0, "send: ignoring empty submission");
            return Err(SkipReason::Empty);
        }
        let slot = InFlightSlot::claim(&self.in_flight, chat_id).ok_or_else(|| {
            debug!(chat_id = chat_id.0, "send: submission already in flight");
            SkipReason::InFlight
        })?;

        let implicit_accept = self.gates.needs_acceptance(chat_id).await;
        let optimistic = ChatMessage::optimistic(
            chat_id,
            self.account_id,
            request.content.clone(),
            request.attachment.clone(),
        );
        let (snapshot, hold) = self
            .cache
            .begin_optimistic(chat_id, optimistic.clone())
            .await;

        Ok(PendingSend {
            pipeline: Arc::clone(self),
            request,
            snapshot,
            hold,
            optimistic,
            implicit_accept,
            _slot: slot,
        })
    }

    pub async fn send(self: &Arc<Self>, request: SendRequest) -> SendOutcome {
        match self.begin(request).await {
            Ok(pending) => pending.settle().await,
            Err(reason) => SendOutcome::Skipped(reason),
        }
    }
}

/// A submission whose optimistic entry is in the cache but whose network call
/// has not run yet. Owns the pre-insert snapshot and keeps the chat's pages
/// pinned until it settles.
pub struct PendingSend {
    pipeline: Arc<SendPipeline>,
    request: SendRequest,
    snapshot: Snapshot,
    hold: OptimisticHold,
    optimistic: ChatMessage,
    implicit_accept: bool,
    _slot: InFlightSlot,
}

impl PendingSend {
    pub fn optimistic(&self) -> &ChatMessage {
        &self.optimistic
    }

    pub fn implicit_accept(&self) -> bool {
        self.implicit_accept
    }

    pub async fn settle(self) -> SendOutcome {
        let pipeline = Arc::clone(&self.pipeline);
        let chat_id = self.request.chat_id;
        let implicit_accept = self.implicit_accept;
        let media_id = self
            .request
            .attachment
            .as_ref()
            .map(|attachment| attachment.media_id);

        let create = pipeline
            .api
            .create_message(chat_id, &self.request.content, media_id);
        let accept = async {
            if implicit_accept {
                Some(pipeline.gates.accept(chat_id).await)
            } else {
                None
            }
        };
        let (created, accepted) = tokio::join!(create, accept);

        if let Some(Err(err)) = accepted {
            // GateController already published the failure.
            warn!(chat_id = chat_id.0, "send: implicit accept failed: {err}");
        }

        match created {
            Ok(message) => {
                drop(self.hold);
                pipeline
                    .cache
                    .invalidate(QueryKey::ChatMessages(chat_id))
                    .await;
                info!(chat_id = chat_id.0, id = ?message.id, "send: message created");
                SendOutcome::Sent(message)
            }
            Err(source) => {
                pipeline.cache.rollback(self.snapshot).await;
                drop(self.hold);
                pipeline
                    .cache
                    .invalidate(QueryKey::ChatMessages(chat_id))
                    .await;
                warn!(chat_id = chat_id.0, "send: create message failed: {source:#}");
                let _ = pipeline.events.send(ClientEvent::SendFailed {
                    chat_id,
                    reason: format!("{source:#}"),
                });
                SendOutcome::Failed(SendError::CreateMessage { chat_id, source })
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/send_tests.rs"]
mod tests;
