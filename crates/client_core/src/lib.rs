use std::sync::Arc;

use anyhow::{Context, Result};
use shared::domain::{AccountId, Attachment, Chat, ChatId, MessagePage};
use tokio::sync::broadcast;
use tracing::{info, warn};

pub mod api;
pub mod cache;
pub mod composer;
pub mod config;
pub mod events;
pub mod gate;
pub mod send;
pub mod session;
pub mod upload;

pub use api::{ChatApi, HttpChatApi, ProgressFn};
pub use cache::{MessageCache, OptimisticHold, QueryKey, Snapshot};
pub use composer::{ComposerEvent, ComposerState};
pub use config::{load_settings, ClientSettings, ConfigError};
pub use events::{ClientEvent, GateAction};
pub use gate::{GateController, GateError, GateState};
pub use send::{PendingSend, SendError, SendOutcome, SendPipeline, SendRequest, SkipReason};
pub use session::ComposerSession;
pub use upload::{MediaFile, MediaUploadPipeline, UploadError};

/// A chat ready to be shown: its record, gate state and first page(s).
#[derive(Debug, Clone, PartialEq)]
pub struct OpenedChat {
    pub chat: Chat,
    pub gate: GateState,
    pub pages: Vec<MessagePage>,
}

/// Entry point wiring the cache, gates and pipelines to one `ChatApi`.
pub struct ChatClient {
    settings: ClientSettings,
    api: Arc<dyn ChatApi>,
    cache: Arc<MessageCache>,
    gates: Arc<GateController>,
    uploads: Arc<MediaUploadPipeline>,
    sends: Arc<SendPipeline>,
    events: broadcast::Sender<ClientEvent>,
}

impl ChatClient {
    pub fn new(settings: ClientSettings, api: Arc<dyn ChatApi>) -> Self {
        let (events, _) = broadcast::channel(settings.event_buffer.max(1));
        let account_id = AccountId(settings.account_id);
        let cache = MessageCache::new(Arc::clone(&api), settings.page_size, events.clone());
        let gates = Arc::new(GateController::new(
            Arc::clone(&api),
            Arc::clone(&cache),
            account_id,
            events.clone(),
        ));
        let uploads = Arc::new(MediaUploadPipeline::new(Arc::clone(&api), events.clone()));
        let sends = SendPipeline::new(
            Arc::clone(&api),
            Arc::clone(&cache),
            Arc::clone(&gates),
            account_id,
            events.clone(),
        );
        Self {
            settings,
            api,
            cache,
            gates,
            uploads,
            sends,
            events,
        }
    }

    /// Validates `settings` and talks to the configured server over HTTP.
    pub fn connect(settings: ClientSettings) -> Result<Self> {
        settings.validate().context("invalid client settings")?;
        let api = Arc::new(HttpChatApi::new(&settings));
        info!(server_url = %settings.server_url, account_id = settings.account_id, "client: configured");
        Ok(Self::new(settings, api))
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    pub fn account_id(&self) -> AccountId {
        AccountId(self.settings.account_id)
    }

    pub fn cache(&self) -> &Arc<MessageCache> {
        &self.cache
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    pub async fn list_chats(&self) -> Result<Vec<Chat>> {
        let chats = self.cache.load_chats().await?;
        for chat in &chats {
            self.gates.register(chat).await;
        }
        Ok(chats)
    }

    pub async fn open_chat(&self, chat_id: ChatId) -> Result<OpenedChat> {
        let chat = match self.cache.cached_chat(chat_id).await {
            Some(chat) => chat,
            None => self.api.get_chat(chat_id).await?,
        };
        let gate = self.gates.register(&chat).await;
        let pages = self.cache.load(chat_id).await?;

        if self.settings.mark_read_on_open {
            if let Err(err) = self.api.mark_chat_read(chat_id).await {
                warn!(chat_id = chat_id.0, "client: mark read failed: {err:#}");
            }
        }
        Ok(OpenedChat { chat, gate, pages })
    }

    pub async fn load_older(&self, chat_id: ChatId) -> Result<bool> {
        self.cache.load_older(chat_id).await
    }

    pub async fn refresh(&self, chat_id: ChatId) -> Result<Vec<MessagePage>> {
        self.cache.refresh(chat_id).await
    }

    pub fn composer(&self, chat_id: ChatId) -> ComposerSession {
        ComposerSession::new(chat_id, Arc::clone(&self.uploads), Arc::clone(&self.sends))
    }

    pub async fn send(&self, request: SendRequest) -> SendOutcome {
        self.sends.send(request).await
    }

    pub async fn upload(&self, chat_id: ChatId, file: MediaFile) -> Result<Attachment, UploadError> {
        self.uploads.upload(chat_id, file, |_| {}).await
    }

    pub async fn gate_state(&self, chat_id: ChatId) -> Option<GateState> {
        self.gates.state(chat_id).await
    }

    pub async fn accept(&self, chat_id: ChatId) -> Result<GateState, GateError> {
        self.gates.accept(chat_id).await
    }

    pub async fn leave(&self, chat_id: ChatId) -> Result<(), GateError> {
        self.gates.leave(chat_id).await
    }

    pub async fn report(&self, chat_id: ChatId, reason: &str) -> Result<(), GateError> {
        self.gates.report(chat_id, reason).await
    }
}

#[cfg(test)]
#[path = "tests/support.rs"]
mod test_support;

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
