//! In-memory chat server used by the unit tests.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicI64, Ordering},
        Arc,
    },
};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use shared::domain::{
    AccountId, Attachment, Chat, ChatId, ChatMessage, MediaId, MessageId, MessagePage, MessageRef,
};
use tokio::sync::{Mutex, Semaphore};

use crate::{
    api::{ChatApi, ProgressFn},
    upload::MediaFile,
};

pub const ME: AccountId = AccountId(1);
pub const OTHER: AccountId = AccountId(2);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiCall {
    ListChats,
    GetChat(ChatId),
    ListMessages(ChatId, Option<MessageId>),
    CreateMessage(ChatId, String, Option<MediaId>),
    Accept(ChatId),
    Delete(ChatId),
    Report(ChatId, String),
    MarkRead(ChatId),
    Upload(String),
}

#[derive(Default)]
pub struct FakeChatApi {
    pub chats: Mutex<HashMap<ChatId, Chat>>,
    pub messages: Mutex<HashMap<ChatId, Vec<ChatMessage>>>,
    pub calls: Mutex<Vec<ApiCall>>,
    pub fail_create: Mutex<Option<String>>,
    pub fail_accept: Mutex<Option<String>>,
    pub fail_delete: Mutex<Option<String>>,
    pub fail_upload: Mutex<Option<String>>,
    pub fail_list: Mutex<Option<String>>,
    pub upload_steps: Mutex<Vec<f32>>,
    pub create_gate: Option<Arc<Semaphore>>,
    pub list_gate: Option<Arc<Semaphore>>,
    pub upload_gate: Option<Arc<Semaphore>>,
    next_id: AtomicI64,
}

impl FakeChatApi {
    pub fn new() -> Self {
        Self {
            next_id: AtomicI64::new(100),
            ..Self::default()
        }
    }

    /// Holds every create-message call until a permit is added.
    pub fn with_create_gate(mut self) -> (Self, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        self.create_gate = Some(Arc::clone(&gate));
        (self, gate)
    }

    pub fn with_list_gate(mut self) -> (Self, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        self.list_gate = Some(Arc::clone(&gate));
        (self, gate)
    }

    pub fn with_upload_gate(mut self) -> (Self, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        self.upload_gate = Some(Arc::clone(&gate));
        (self, gate)
    }

    pub async fn add_chat(&self, chat: Chat) {
        self.chats.lock().await.insert(chat.chat_id, chat);
    }

    pub async fn add_server_message(&self, chat_id: ChatId, content: &str) -> ChatMessage {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let message = server_message(chat_id, id, OTHER, content);
        self.messages
            .lock()
            .await
            .entry(chat_id)
            .or_default()
            .insert(0, message.clone());
        message
    }

    pub async fn calls(&self) -> Vec<ApiCall> {
        self.calls.lock().await.clone()
    }

    pub async fn count(&self, matches: impl Fn(&ApiCall) -> bool) -> usize {
        self.calls.lock().await.iter().filter(|c| matches(c)).count()
    }

    async fn record(&self, call: ApiCall) {
        self.calls.lock().await.push(call);
    }
}

pub fn unsolicited_chat(chat_id: i64) -> Chat {
    Chat {
        chat_id: ChatId(chat_id),
        accepted: false,
        created_by: OTHER,
        participant: OTHER,
    }
}

pub fn accepted_chat(chat_id: i64) -> Chat {
    Chat {
        chat_id: ChatId(chat_id),
        accepted: true,
        created_by: ME,
        participant: OTHER,
    }
}

pub fn server_message(chat_id: ChatId, id: i64, author: AccountId, content: &str) -> ChatMessage {
    ChatMessage {
        id: MessageRef::Server(MessageId(id)),
        chat_id,
        content: content.to_string(),
        attachment: None,
        author_id: author,
        created_at: Utc
            .timestamp_opt(1_700_000_000 + id, 0)
            .single()
            .expect("timestamp"),
        pending: false,
    }
}

pub fn sample_file(name: &str) -> MediaFile {
    MediaFile::new(name, Some("image/png".to_string()), vec![7u8; 1024])
}

async fn pass_gate(gate: &Option<Arc<Semaphore>>) {
    if let Some(gate) = gate {
        gate.acquire().await.expect("gate open").forget();
    }
}

#[async_trait]
impl ChatApi for FakeChatApi {
    async fn list_chats(&self) -> Result<Vec<Chat>> {
        self.record(ApiCall::ListChats).await;
        let mut chats: Vec<Chat> = self.chats.lock().await.values().cloned().collect();
        chats.sort_by_key(|chat| chat.chat_id);
        Ok(chats)
    }

    async fn get_chat(&self, chat_id: ChatId) -> Result<Chat> {
        self.record(ApiCall::GetChat(chat_id)).await;
        self.chats
            .lock()
            .await
            .get(&chat_id)
            .cloned()
            .ok_or_else(|| anyhow!("chat {chat_id} not found"))
    }

    async fn list_messages(
        &self,
        chat_id: ChatId,
        before: Option<MessageId>,
        limit: u32,
    ) -> Result<MessagePage> {
        self.record(ApiCall::ListMessages(chat_id, before)).await;
        pass_gate(&self.list_gate).await;
        if let Some(err) = self.fail_list.lock().await.clone() {
            return Err(anyhow!(err));
        }
        let all = self
            .messages
            .lock()
            .await
            .get(&chat_id)
            .cloned()
            .unwrap_or_default();
        let older: Vec<ChatMessage> = all
            .into_iter()
            .filter(|message| match (before, message.id) {
                (Some(cursor), MessageRef::Server(id)) => id < cursor,
                _ => true,
            })
            .collect();
        let limit = limit as usize;
        let messages: Vec<ChatMessage> = older.iter().take(limit).cloned().collect();
        let next_cursor = if older.len() > limit {
            messages.last().and_then(|message| match message.id {
                MessageRef::Server(id) => Some(id),
                MessageRef::Local(_) => None,
            })
        } else {
            None
        };
        Ok(MessagePage {
            messages,
            next_cursor,
        })
    }

    async fn create_message(
        &self,
        chat_id: ChatId,
        content: &str,
        media_id: Option<MediaId>,
    ) -> Result<ChatMessage> {
        self.record(ApiCall::CreateMessage(
            chat_id,
            content.to_string(),
            media_id,
        ))
        .await;
        pass_gate(&self.create_gate).await;
        if let Some(err) = self.fail_create.lock().await.clone() {
            return Err(anyhow!(err));
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut message = server_message(chat_id, id, ME, content);
        message.attachment = media_id.map(|media_id| Attachment {
            media_id,
            preview_url: format!("https://cdn.test/{}", media_id.0),
            filename: "upload.bin".to_string(),
            mime_type: None,
        });
        self.messages
            .lock()
            .await
            .entry(chat_id)
            .or_default()
            .insert(0, message.clone());
        Ok(message)
    }

    async fn accept_chat(&self, chat_id: ChatId) -> Result<Chat> {
        self.record(ApiCall::Accept(chat_id)).await;
        if let Some(err) = self.fail_accept.lock().await.clone() {
            return Err(anyhow!(err));
        }
        let mut chats = self.chats.lock().await;
        let chat = chats
            .get_mut(&chat_id)
            .ok_or_else(|| anyhow!("chat {chat_id} not found"))?;
        chat.accepted = true;
        Ok(chat.clone())
    }

    async fn delete_chat(&self, chat_id: ChatId) -> Result<()> {
        self.record(ApiCall::Delete(chat_id)).await;
        if let Some(err) = self.fail_delete.lock().await.clone() {
            return Err(anyhow!(err));
        }
        self.chats.lock().await.remove(&chat_id);
        self.messages.lock().await.remove(&chat_id);
        Ok(())
    }

    async fn report_chat(&self, chat_id: ChatId, reason: &str) -> Result<()> {
        self.record(ApiCall::Report(chat_id, reason.to_string()))
            .await;
        Ok(())
    }

    async fn mark_chat_read(&self, chat_id: ChatId) -> Result<()> {
        self.record(ApiCall::MarkRead(chat_id)).await;
        Ok(())
    }

    async fn upload_media(&self, file: MediaFile, progress: ProgressFn) -> Result<Attachment> {
        self.record(ApiCall::Upload(file.filename.clone())).await;
        let steps = self.upload_steps.lock().await.clone();
        for step in steps {
            progress(step);
        }
        pass_gate(&self.upload_gate).await;
        if let Some(err) = self.fail_upload.lock().await.clone() {
            return Err(anyhow!(err));
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        Ok(Attachment {
            media_id: MediaId(id),
            preview_url: format!("https://cdn.test/{id}"),
            filename: file.filename,
            mime_type: file.mime_type,
        })
    }
}
