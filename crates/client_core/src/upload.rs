//! Single-file media upload with fractional progress.

use std::{
    path::Path,
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    },
};

use bytes::Bytes;
use shared::domain::{Attachment, ChatId};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::{
    api::{ChatApi, ProgressFn},
    events::ClientEvent,
};

#[derive(Debug, Clone)]
pub struct MediaFile {
    pub filename: String,
    pub mime_type: Option<String>,
    pub bytes: Bytes,
}

impl MediaFile {
    pub fn new(
        filename: impl Into<String>,
        mime_type: Option<String>,
        bytes: impl Into<Bytes>,
    ) -> Self {
        Self {
            filename: filename.into(),
            mime_type,
            bytes: bytes.into(),
        }
    }

    pub async fn from_path(path: &Path) -> std::io::Result<Self> {
        let bytes = tokio::fs::read(path).await?;
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload.bin".to_string());
        let mime_type = guess_mime_type(&filename).map(str::to_string);
        Ok(Self::new(filename, mime_type, bytes))
    }
}

fn guess_mime_type(filename: &str) -> Option<&'static str> {
    let extension = filename.rsplit_once('.')?.1.to_ascii_lowercase();
    match extension.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        "mp4" => Some("video/mp4"),
        "mov" => Some("video/quicktime"),
        "pdf" => Some("application/pdf"),
        "txt" => Some("text/plain"),
        _ => None,
    }
}

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("refusing to upload empty file '{0}'")]
    EmptyFile(String),
    #[error("another upload is already in progress")]
    Busy,
    #[error("upload of '{filename}' failed: {source}")]
    Transfer {
        filename: String,
        source: anyhow::Error,
    },
}

/// Progress fraction that is clamped to `[0, 1]` and never moves backwards.
#[derive(Debug, Default)]
pub struct ProgressTracker {
    bits: AtomicU32,
}

impl ProgressTracker {
    /// Records `fraction` and returns the value now in effect.
    pub fn advance(&self, fraction: f32) -> f32 {
        // Non-negative floats order the same as their bit patterns.
        let fraction = if fraction.is_nan() || fraction <= 0.0 {
            0.0
        } else {
            fraction.min(1.0)
        };
        let previous = self
            .bits
            .fetch_max(fraction.to_bits(), Ordering::AcqRel);
        f32::from_bits(previous).max(fraction)
    }

    pub fn current(&self) -> f32 {
        f32::from_bits(self.bits.load(Ordering::Acquire))
    }
}

pub struct MediaUploadPipeline {
    api: Arc<dyn ChatApi>,
    events: broadcast::Sender<ClientEvent>,
}

impl MediaUploadPipeline {
    pub fn new(api: Arc<dyn ChatApi>, events: broadcast::Sender<ClientEvent>) -> Self {
        Self { api, events }
    }

    /// Uploads one file. Callers keep their file input disabled until this
    /// resolves; overlapping uploads from one composer are not supported.
    pub async fn upload(
        &self,
        chat_id: ChatId,
        file: MediaFile,
        on_progress: impl Fn(f32) + Send + Sync + 'static,
    ) -> Result<Attachment, UploadError> {
        let filename = file.filename.clone();
        if file.bytes.is_empty() {
            return Err(UploadError::EmptyFile(filename));
        }

        let tracker = Arc::new(ProgressTracker::default());
        let events = self.events.clone();
        let progress: ProgressFn = {
            let tracker = Arc::clone(&tracker);
            Arc::new(move |fraction| {
                let progress = tracker.advance(fraction);
                on_progress(progress);
                let _ = events.send(ClientEvent::UploadProgress { chat_id, progress });
            })
        };

        match self.api.upload_media(file, Arc::clone(&progress)).await {
            Ok(attachment) => {
                progress(1.0);
                info!(
                    chat_id = chat_id.0,
                    media_id = attachment.media_id.0,
                    "upload: attachment stored"
                );
                Ok(attachment)
            }
            Err(source) => {
                warn!(
                    chat_id = chat_id.0,
                    filename = %filename,
                    progress = tracker.current(),
                    "upload: failed: {source:#}"
                );
                let _ = self.events.send(ClientEvent::UploadFailed {
                    chat_id,
                    filename: filename.clone(),
                    reason: format!("{source:#}"),
                });
                Err(UploadError::Transfer { filename, source })
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/upload_tests.rs"]
mod tests;
