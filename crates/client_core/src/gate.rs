//! Acceptance gate for chats the current account did not start.
//!
//! `AcceptanceGate` is the pure state machine: it plans the network effects an
//! event implies. `GateController` runs those effects against the server and
//! the cache, and only moves a gate to `Accepted` once the server agrees.

use std::{collections::HashMap, sync::Arc};

use shared::domain::{AccountId, Chat, ChatId};
use thiserror::Error;
use tokio::sync::{broadcast, Mutex};
use tracing::{info, warn};

use crate::{
    api::ChatApi,
    cache::MessageCache,
    events::{ClientEvent, GateAction},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    NeedsAcceptance,
    Accepted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateEvent {
    Accept,
    Leave,
    Report { reason: String },
}

impl GateEvent {
    fn action(&self) -> GateAction {
        match self {
            GateEvent::Accept => GateAction::Accept,
            GateEvent::Leave => GateAction::Leave,
            GateEvent::Report { .. } => GateAction::Report,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateEffect {
    AcceptChat,
    DeleteChat,
    ReportChat { reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcceptanceGate {
    state: GateState,
}

impl AcceptanceGate {
    pub fn for_chat(chat: &Chat, current: AccountId) -> Self {
        let state = if chat.is_unsolicited_for(current) {
            GateState::NeedsAcceptance
        } else {
            GateState::Accepted
        };
        Self { state }
    }

    pub fn state(&self) -> GateState {
        self.state
    }

    /// Effects to run, in order, for `event`.
    ///
    /// Reporting an unaccepted chat accepts it first.
    pub fn plan(&self, event: &GateEvent) -> Vec<GateEffect> {
        let needs_accept = self.state == GateState::NeedsAcceptance;
        match event {
            GateEvent::Accept if needs_accept => vec![GateEffect::AcceptChat],
            GateEvent::Accept => Vec::new(),
            GateEvent::Leave => vec![GateEffect::DeleteChat],
            GateEvent::Report { reason } => {
                let mut effects = Vec::with_capacity(2);
                if needs_accept {
                    effects.push(GateEffect::AcceptChat);
                }
                effects.push(GateEffect::ReportChat {
                    reason: reason.clone(),
                });
                effects
            }
        }
    }

    /// Returns true when this call changed the state.
    pub fn mark_accepted(&mut self) -> bool {
        let changed = self.state == GateState::NeedsAcceptance;
        self.state = GateState::Accepted;
        changed
    }
}

#[derive(Debug, Error)]
pub enum GateError {
    #[error("chat {0} has not been opened")]
    UnknownChat(ChatId),
    #[error("{action:?} failed for chat {chat_id}: {source}")]
    Network {
        chat_id: ChatId,
        action: GateAction,
        source: anyhow::Error,
    },
}

pub struct GateController {
    api: Arc<dyn ChatApi>,
    cache: Arc<MessageCache>,
    account_id: AccountId,
    gates: Mutex<HashMap<ChatId, AcceptanceGate>>,
    events: broadcast::Sender<ClientEvent>,
}

impl GateController {
    pub fn new(
        api: Arc<dyn ChatApi>,
        cache: Arc<MessageCache>,
        account_id: AccountId,
        events: broadcast::Sender<ClientEvent>,
    ) -> Self {
        Self {
            api,
            cache,
            account_id,
            gates: Mutex::new(HashMap::new()),
            events,
        }
    }

    /// Tracks `chat`. A gate that already reached `Accepted` stays there.
    pub async fn register(&self, chat: &Chat) -> GateState {
        let fresh = AcceptanceGate::for_chat(chat, self.account_id);
        let mut gates = self.gates.lock().await;
        let gate = gates.entry(chat.chat_id).or_insert(fresh);
        if fresh.state() == GateState::Accepted {
            gate.mark_accepted();
        }
        gate.state()
    }

    pub async fn state(&self, chat_id: ChatId) -> Option<GateState> {
        self.gates.lock().await.get(&chat_id).map(AcceptanceGate::state)
    }

    pub async fn needs_acceptance(&self, chat_id: ChatId) -> bool {
        self.state(chat_id).await == Some(GateState::NeedsAcceptance)
    }

    pub async fn accept(&self, chat_id: ChatId) -> Result<GateState, GateError> {
        self.run(chat_id, GateEvent::Accept).await?;
        Ok(self.state(chat_id).await.unwrap_or(GateState::Accepted))
    }

    pub async fn leave(&self, chat_id: ChatId) -> Result<(), GateError> {
        self.run(chat_id, GateEvent::Leave).await
    }

    pub async fn report(&self, chat_id: ChatId, reason: &str) -> Result<(), GateError> {
        self.run(
            chat_id,
            GateEvent::Report {
                reason: reason.to_string(),
            },
        )
        .await
    }

    async fn run(&self, chat_id: ChatId, event: GateEvent) -> Result<(), GateError> {
        let effects = {
            let gates = self.gates.lock().await;
            gates
                .get(&chat_id)
                .ok_or(GateError::UnknownChat(chat_id))?
                .plan(&event)
        };
        let action = event.action();
        for effect in effects {
            if let Err(source) = self.execute(chat_id, &effect).await {
                warn!(chat_id = chat_id.0, ?action, "gate: {effect:?} failed: {source:#}");
                let _ = self.events.send(ClientEvent::GateFailed {
                    chat_id,
                    action,
                    reason: format!("{source:#}"),
                });
                return Err(GateError::Network {
                    chat_id,
                    action,
                    source,
                });
            }
        }
        Ok(())
    }

    async fn execute(&self, chat_id: ChatId, effect: &GateEffect) -> anyhow::Result<()> {
        match effect {
            GateEffect::AcceptChat => {
                let chat = self.api.accept_chat(chat_id).await?;
                let changed = self
                    .gates
                    .lock()
                    .await
                    .entry(chat_id)
                    .or_insert(AcceptanceGate {
                        state: GateState::Accepted,
                    })
                    .mark_accepted();
                self.cache.upsert_chat(chat).await;
                if changed {
                    info!(chat_id = chat_id.0, "gate: chat accepted");
                    let _ = self.events.send(ClientEvent::GateChanged {
                        chat_id,
                        state: GateState::Accepted,
                    });
                }
            }
            GateEffect::DeleteChat => {
                self.api.delete_chat(chat_id).await?;
                self.gates.lock().await.remove(&chat_id);
                self.cache.remove_chat(chat_id).await;
                info!(chat_id = chat_id.0, "gate: left chat");
            }
            GateEffect::ReportChat { reason } => {
                self.api.report_chat(chat_id, reason).await?;
                info!(chat_id = chat_id.0, "gate: chat reported");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/gate_tests.rs"]
mod tests;
