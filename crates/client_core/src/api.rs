//! Network seam for the chat server.

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{
    multipart::{Form, Part},
    Body, Client, Method, RequestBuilder, Response,
};
use serde::Serialize;
use shared::{
    domain::{Attachment, Chat, ChatId, ChatMessage, MediaId, MessageId, MessagePage},
    error::ApiError,
    protocol::{
        AttachmentPayload, ChatSummary, CreateMessageRequest, MessagePagePayload, MessagePayload,
        ReportChatRequest,
    },
};
use tracing::debug;

use crate::{
    config::{ClientSettings, MAX_PAGE_SIZE},
    upload::MediaFile,
};

/// Receives upload progress as a fraction of bytes handed to the transport.
pub type ProgressFn = Arc<dyn Fn(f32) + Send + Sync>;

#[async_trait]
pub trait ChatApi: Send + Sync {
    async fn list_chats(&self) -> Result<Vec<Chat>>;
    async fn get_chat(&self, chat_id: ChatId) -> Result<Chat>;
    async fn list_messages(
        &self,
        chat_id: ChatId,
        before: Option<MessageId>,
        limit: u32,
    ) -> Result<MessagePage>;
    async fn create_message(
        &self,
        chat_id: ChatId,
        content: &str,
        media_id: Option<MediaId>,
    ) -> Result<ChatMessage>;
    async fn accept_chat(&self, chat_id: ChatId) -> Result<Chat>;
    async fn delete_chat(&self, chat_id: ChatId) -> Result<()>;
    async fn report_chat(&self, chat_id: ChatId, reason: &str) -> Result<()>;
    async fn mark_chat_read(&self, chat_id: ChatId) -> Result<()>;
    async fn upload_media(&self, file: MediaFile, progress: ProgressFn) -> Result<Attachment>;
}

#[derive(Serialize)]
struct ListMessagesQuery {
    limit: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    before: Option<i64>,
}

pub struct HttpChatApi {
    http: Client,
    base_url: String,
    access_token: Option<String>,
    upload_chunk_size: usize,
}

impl HttpChatApi {
    pub fn new(settings: &ClientSettings) -> Self {
        Self {
            http: Client::new(),
            base_url: settings.base_url().to_string(),
            access_token: settings.access_token.clone(),
            upload_chunk_size: settings.upload_chunk_size.max(1),
        }
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self.http.request(method, format!("{}{path}", self.base_url));
        match &self.access_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send(&self, builder: RequestBuilder, operation: &str) -> Result<Response> {
        let response = builder
            .send()
            .await
            .with_context(|| format!("{operation}: request failed"))?;
        ensure_success(response, operation).await
    }
}

/// Turns a non-2xx response into an error, preferring the server's error envelope.
async fn ensure_success(response: Response, operation: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    match serde_json::from_str::<ApiError>(&body) {
        Ok(api_error) => Err(anyhow!(api_error).context(format!("{operation}: status {status}"))),
        Err(_) => Err(anyhow!("{operation}: status {status}: {body}")),
    }
}

fn chunked_body(bytes: Bytes, chunk_size: usize, progress: ProgressFn) -> Body {
    let total = bytes.len();
    let stream = futures::stream::unfold(0usize, move |offset| {
        let bytes = bytes.clone();
        let progress = Arc::clone(&progress);
        async move {
            if offset >= total {
                return None;
            }
            let end = (offset + chunk_size).min(total);
            let chunk = bytes.slice(offset..end);
            progress(end as f32 / total as f32);
            Some((Ok::<_, std::io::Error>(chunk), end))
        }
    });
    Body::wrap_stream(stream)
}

#[async_trait]
impl ChatApi for HttpChatApi {
    async fn list_chats(&self) -> Result<Vec<Chat>> {
        let chats: Vec<ChatSummary> = self
            .send(self.request(Method::GET, "/chats"), "list chats")
            .await?
            .json()
            .await
            .context("list chats: malformed payload")?;
        Ok(chats.into_iter().map(Chat::from).collect())
    }

    async fn get_chat(&self, chat_id: ChatId) -> Result<Chat> {
        let chat: ChatSummary = self
            .send(
                self.request(Method::GET, &format!("/chats/{chat_id}")),
                "get chat",
            )
            .await?
            .json()
            .await
            .context("get chat: malformed payload")?;
        Ok(chat.into())
    }

    async fn list_messages(
        &self,
        chat_id: ChatId,
        before: Option<MessageId>,
        limit: u32,
    ) -> Result<MessagePage> {
        let page: MessagePagePayload = self
            .send(
                self.request(Method::GET, &format!("/chats/{chat_id}/messages"))
                    .query(&ListMessagesQuery {
                        limit: limit.clamp(1, MAX_PAGE_SIZE),
                        before: before.map(|id| id.0),
                    }),
                "list messages",
            )
            .await?
            .json()
            .await
            .context("list messages: malformed payload")?;
        Ok(page.into())
    }

    async fn create_message(
        &self,
        chat_id: ChatId,
        content: &str,
        media_id: Option<MediaId>,
    ) -> Result<ChatMessage> {
        let message: MessagePayload = self
            .send(
                self.request(Method::POST, &format!("/chats/{chat_id}/messages"))
                    .json(&CreateMessageRequest {
                        content: content.to_string(),
                        media_id,
                    }),
                "create message",
            )
            .await?
            .json()
            .await
            .context("create message: malformed payload")?;
        Ok(message.into())
    }

    async fn accept_chat(&self, chat_id: ChatId) -> Result<Chat> {
        let chat: ChatSummary = self
            .send(
                self.request(Method::POST, &format!("/chats/{chat_id}/accept")),
                "accept chat",
            )
            .await?
            .json()
            .await
            .context("accept chat: malformed payload")?;
        Ok(chat.into())
    }

    async fn delete_chat(&self, chat_id: ChatId) -> Result<()> {
        self.send(
            self.request(Method::DELETE, &format!("/chats/{chat_id}")),
            "delete chat",
        )
        .await?;
        Ok(())
    }

    async fn report_chat(&self, chat_id: ChatId, reason: &str) -> Result<()> {
        self.send(
            self.request(Method::POST, &format!("/chats/{chat_id}/report"))
                .json(&ReportChatRequest {
                    reason: reason.to_string(),
                }),
            "report chat",
        )
        .await?;
        Ok(())
    }

    async fn mark_chat_read(&self, chat_id: ChatId) -> Result<()> {
        self.send(
            self.request(Method::POST, &format!("/chats/{chat_id}/read")),
            "mark chat read",
        )
        .await?;
        Ok(())
    }

    async fn upload_media(&self, file: MediaFile, progress: ProgressFn) -> Result<Attachment> {
        let total = file.bytes.len() as u64;
        debug!(filename = %file.filename, total, "upload: streaming media body");
        let mime_type = file
            .mime_type
            .clone()
            .unwrap_or_else(|| "application/octet-stream".to_string());
        let part = Part::stream_with_length(
            chunked_body(file.bytes, self.upload_chunk_size, progress),
            total,
        )
        .file_name(file.filename)
        .mime_str(&mime_type)
        .with_context(|| format!("upload media: invalid mime type '{mime_type}'"))?;

        let attachment: AttachmentPayload = self
            .send(
                self.request(Method::POST, "/media")
                    .multipart(Form::new().part("file", part)),
                "upload media",
            )
            .await?
            .json()
            .await
            .context("upload media: malformed payload")?;
        Ok(attachment.into())
    }
}

#[cfg(test)]
#[path = "tests/api_tests.rs"]
mod tests;
