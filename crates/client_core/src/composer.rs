//! Explicit state record for one message composer.
//!
//! All draft, attachment and submission flags live in `ComposerState` and only
//! change through `ComposerState::apply`.

use shared::domain::Attachment;

#[derive(Debug, Clone, PartialEq)]
pub enum AttachmentSlot {
    Empty,
    Uploading {
        upload_id: u64,
        filename: String,
        progress: f32,
    },
    Ready(Attachment),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitResult {
    Success,
    Failure,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ComposerEvent {
    Typed(String),
    FileSelected { filename: String },
    UploadProgressed { upload_id: u64, progress: f32 },
    UploadSucceeded { upload_id: u64, attachment: Attachment },
    UploadFailed { upload_id: u64 },
    FileCleared,
    SubmitRequested,
    /// The submission never left the client; hand its draft back.
    SubmitRejected(Submission),
    SubmitSettled(SubmitResult),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    EmptySubmission,
    SubmissionInFlight,
    UploadInFlight,
}

/// What the driver must do after a transition.
#[derive(Debug, Clone, PartialEq)]
pub enum ComposerEffect {
    None,
    StartUpload { upload_id: u64 },
    Submit(Submission),
    Rejected(Rejection),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Submission {
    pub content: String,
    pub attachment: Option<Attachment>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ComposerState {
    pub content: String,
    pub attachment: AttachmentSlot,
    /// Bumped whenever the file input must drop its current selection.
    pub reset_token: u64,
    pub submitting: bool,
    next_upload_id: u64,
}

impl Default for ComposerState {
    fn default() -> Self {
        Self {
            content: String::new(),
            attachment: AttachmentSlot::Empty,
            reset_token: 0,
            submitting: false,
            next_upload_id: 1,
        }
    }
}

pub fn is_blank(content: &str) -> bool {
    content.trim().is_empty()
}

impl ComposerState {
    pub fn is_uploading(&self) -> bool {
        matches!(self.attachment, AttachmentSlot::Uploading { .. })
    }

    pub fn upload_progress(&self) -> Option<f32> {
        match self.attachment {
            AttachmentSlot::Uploading { progress, .. } => Some(progress),
            _ => None,
        }
    }

    pub fn ready_attachment(&self) -> Option<&Attachment> {
        match &self.attachment {
            AttachmentSlot::Ready(attachment) => Some(attachment),
            _ => None,
        }
    }

    pub fn can_submit(&self) -> bool {
        !self.submitting
            && !self.is_uploading()
            && (!is_blank(&self.content) || self.ready_attachment().is_some())
    }

    fn active_upload(&self, upload_id: u64) -> bool {
        matches!(self.attachment, AttachmentSlot::Uploading { upload_id: active, .. } if active == upload_id)
    }

    pub fn apply(&mut self, event: ComposerEvent) -> ComposerEffect {
        match event {
            ComposerEvent::Typed(content) => {
                self.content = content;
                ComposerEffect::None
            }
            ComposerEvent::FileSelected { filename } => {
                if self.is_uploading() {
                    return ComposerEffect::Rejected(Rejection::UploadInFlight);
                }
                let upload_id = self.next_upload_id;
                self.next_upload_id += 1;
                self.attachment = AttachmentSlot::Uploading {
                    upload_id,
                    filename,
                    progress: 0.0,
                };
                ComposerEffect::StartUpload { upload_id }
            }
            ComposerEvent::UploadProgressed {
                upload_id,
                progress,
            } => {
                if let AttachmentSlot::Uploading {
                    upload_id: active,
                    progress: current,
                    ..
                } = &mut self.attachment
                {
                    if *active == upload_id && progress.is_finite() {
                        *current = current.max(progress.clamp(0.0, 1.0));
                    }
                }
                ComposerEffect::None
            }
            ComposerEvent::UploadSucceeded {
                upload_id,
                attachment,
            } => {
                if self.active_upload(upload_id) {
                    self.attachment = AttachmentSlot::Ready(attachment);
                    self.reset_token += 1;
                }
                ComposerEffect::None
            }
            ComposerEvent::UploadFailed { upload_id } => {
                if self.active_upload(upload_id) {
                    self.attachment = AttachmentSlot::Empty;
                    self.reset_token += 1;
                }
                ComposerEffect::None
            }
            ComposerEvent::FileCleared => {
                self.attachment = AttachmentSlot::Empty;
                self.reset_token += 1;
                ComposerEffect::None
            }
            ComposerEvent::SubmitRequested => {
                if self.submitting {
                    return ComposerEffect::Rejected(Rejection::SubmissionInFlight);
                }
                if self.is_uploading() {
                    return ComposerEffect::Rejected(Rejection::UploadInFlight);
                }
                if is_blank(&self.content) && self.ready_attachment().is_none() {
                    return ComposerEffect::Rejected(Rejection::EmptySubmission);
                }
                let attachment =
                    match std::mem::replace(&mut self.attachment, AttachmentSlot::Empty) {
                        AttachmentSlot::Ready(attachment) => Some(attachment),
                        _ => None,
                    };
                self.submitting = true;
                ComposerEffect::Submit(Submission {
                    content: std::mem::take(&mut self.content),
                    attachment,
                })
            }
            ComposerEvent::SubmitRejected(submission) => {
                if self.content.is_empty() {
                    self.content = submission.content;
                }
                if let (AttachmentSlot::Empty, Some(attachment)) =
                    (&self.attachment, submission.attachment)
                {
                    self.attachment = AttachmentSlot::Ready(attachment);
                }
                self.submitting = false;
                ComposerEffect::None
            }
            ComposerEvent::SubmitSettled(_) => {
                self.submitting = false;
                ComposerEffect::None
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/composer_tests.rs"]
mod tests;
