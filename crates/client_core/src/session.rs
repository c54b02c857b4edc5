//! Async driver binding one `ComposerState` to one chat.

use std::sync::Arc;

use parking_lot::Mutex;
use shared::domain::{Attachment, ChatId};
use tracing::debug;

use crate::{
    composer::{ComposerEffect, ComposerEvent, ComposerState, Rejection, SubmitResult},
    send::{SendOutcome, SendPipeline, SendRequest, SkipReason},
    upload::{MediaFile, MediaUploadPipeline, UploadError},
};

pub struct ComposerSession {
    chat_id: ChatId,
    state: Arc<Mutex<ComposerState>>,
    uploads: Arc<MediaUploadPipeline>,
    sends: Arc<SendPipeline>,
}

impl ComposerSession {
    pub fn new(
        chat_id: ChatId,
        uploads: Arc<MediaUploadPipeline>,
        sends: Arc<SendPipeline>,
    ) -> Self {
        Self {
            chat_id,
            state: Arc::new(Mutex::new(ComposerState::default())),
            uploads,
            sends,
        }
    }

    pub fn chat_id(&self) -> ChatId {
        self.chat_id
    }

    pub fn state(&self) -> ComposerState {
        self.state.lock().clone()
    }

    pub fn type_text(&self, content: impl Into<String>) {
        self.state.lock().apply(ComposerEvent::Typed(content.into()));
    }

    pub fn clear_attachment(&self) {
        self.state.lock().apply(ComposerEvent::FileCleared);
    }

    /// Uploads `file` into the attachment slot. A failed upload leaves the slot
    /// empty; results for a selection cleared meanwhile are dropped.
    pub async fn attach(&self, file: MediaFile) -> Result<Attachment, UploadError> {
        let effect = self.state.lock().apply(ComposerEvent::FileSelected {
            filename: file.filename.clone(),
        });
        let ComposerEffect::StartUpload { upload_id } = effect else {
            return Err(UploadError::Busy);
        };

        let on_progress = {
            let state = Arc::clone(&self.state);
            move |progress| {
                state.lock().apply(ComposerEvent::UploadProgressed {
                    upload_id,
                    progress,
                });
            }
        };
        let result = self.uploads.upload(self.chat_id, file, on_progress).await;

        let event = match &result {
            Ok(attachment) => ComposerEvent::UploadSucceeded {
                upload_id,
                attachment: attachment.clone(),
            },
            Err(_) => ComposerEvent::UploadFailed { upload_id },
        };
        self.state.lock().apply(event);
        result
    }

    /// Hands the draft to the send pipeline. The draft is kept when the
    /// pipeline refuses it, and cleared once a send has been attempted.
    pub async fn submit(&self) -> SendOutcome {
        if self.sends.is_in_flight(self.chat_id) {
            debug!(chat_id = self.chat_id.0, "composer: submit refused, chat has a send in flight");
            return SendOutcome::Skipped(SkipReason::InFlight);
        }
        let effect = self.state.lock().apply(ComposerEvent::SubmitRequested);
        let submission = match effect {
            ComposerEffect::Submit(submission) => submission,
            ComposerEffect::Rejected(rejection) => {
                debug!(chat_id = self.chat_id.0, ?rejection, "composer: submit refused");
                return SendOutcome::Skipped(match rejection {
                    Rejection::EmptySubmission => SkipReason::Empty,
                    Rejection::SubmissionInFlight => SkipReason::InFlight,
                    Rejection::UploadInFlight => SkipReason::UploadInProgress,
                });
            }
            ComposerEffect::None | ComposerEffect::StartUpload { .. } => {
                return SendOutcome::Skipped(SkipReason::Empty)
            }
        };

        let request = SendRequest {
            chat_id: self.chat_id,
            content: submission.content.clone(),
            attachment: submission.attachment.clone(),
        };
        let outcome = match self.sends.begin(request).await {
            Ok(pending) => pending.settle().await,
            Err(reason) => {
                debug!(chat_id = self.chat_id.0, ?reason, "composer: send skipped, draft restored");
                self.state
                    .lock()
                    .apply(ComposerEvent::SubmitRejected(submission));
                return SendOutcome::Skipped(reason);
            }
        };
        let result = if outcome.is_sent() {
            SubmitResult::Success
        } else {
            SubmitResult::Failure
        };
        self.state.lock().apply(ComposerEvent::SubmitSettled(result));
        outcome
    }
}

#[cfg(test)]
#[path = "tests/session_tests.rs"]
mod tests;
