use super::*;
use shared::domain::MediaId;

fn attachment(name: &str) -> Attachment {
    Attachment {
        media_id: MediaId(9),
        preview_url: format!("https://media.test/{name}"),
        filename: name.to_string(),
        mime_type: Some("image/png".to_string()),
    }
}

fn start_upload(state: &mut ComposerState, name: &str) -> u64 {
    match state.apply(ComposerEvent::FileSelected {
        filename: name.to_string(),
    }) {
        ComposerEffect::StartUpload { upload_id } => upload_id,
        other => panic!("expected upload to start, got {other:?}"),
    }
}

#[test]
fn blank_draft_cannot_be_submitted() {
    let mut state = ComposerState::default();
    state.apply(ComposerEvent::Typed("   \n\t".to_string()));

    assert!(!state.can_submit());
    assert_eq!(
        state.apply(ComposerEvent::SubmitRequested),
        ComposerEffect::Rejected(Rejection::EmptySubmission)
    );
    assert!(!state.submitting);
}

#[test]
fn submit_takes_draft_and_attachment() {
    let mut state = ComposerState::default();
    let upload_id = start_upload(&mut state, "photo.png");
    state.apply(ComposerEvent::UploadSucceeded {
        upload_id,
        attachment: attachment("photo.png"),
    });
    state.apply(ComposerEvent::Typed("look".to_string()));

    assert_eq!(
        state.apply(ComposerEvent::SubmitRequested),
        ComposerEffect::Submit(Submission {
            content: "look".to_string(),
            attachment: Some(attachment("photo.png")),
        })
    );
    assert!(state.submitting);
    assert!(state.content.is_empty());
    assert_eq!(state.attachment, AttachmentSlot::Empty);
}

#[test]
fn rejected_submission_restores_draft_and_attachment() {
    let mut state = ComposerState::default();
    let upload_id = start_upload(&mut state, "photo.png");
    state.apply(ComposerEvent::UploadSucceeded {
        upload_id,
        attachment: attachment("photo.png"),
    });
    state.apply(ComposerEvent::Typed("my long draft".to_string()));
    let ComposerEffect::Submit(submission) = state.apply(ComposerEvent::SubmitRequested) else {
        panic!("expected a submission");
    };

    state.apply(ComposerEvent::SubmitRejected(submission));

    assert_eq!(state.content, "my long draft");
    assert_eq!(state.ready_attachment(), Some(&attachment("photo.png")));
    assert!(!state.submitting);
    assert!(state.can_submit());
}

#[test]
fn rejected_submission_does_not_overwrite_newer_typing() {
    let mut state = ComposerState::default();
    state.apply(ComposerEvent::Typed("first".to_string()));
    let ComposerEffect::Submit(submission) = state.apply(ComposerEvent::SubmitRequested) else {
        panic!("expected a submission");
    };
    state.apply(ComposerEvent::Typed("second".to_string()));

    state.apply(ComposerEvent::SubmitRejected(submission));

    assert_eq!(state.content, "second");
    assert!(!state.submitting);
}

#[test]
fn attachment_alone_is_submittable() {
    let mut state = ComposerState::default();
    let upload_id = start_upload(&mut state, "photo.png");
    state.apply(ComposerEvent::UploadSucceeded {
        upload_id,
        attachment: attachment("photo.png"),
    });

    assert!(state.can_submit());
    assert!(matches!(
        state.apply(ComposerEvent::SubmitRequested),
        ComposerEffect::Submit(Submission { ref content, attachment: Some(_) }) if content.is_empty()
    ));
}

#[test]
fn second_submit_is_refused_until_settled() {
    let mut state = ComposerState::default();
    state.apply(ComposerEvent::Typed("hi".to_string()));
    assert!(matches!(
        state.apply(ComposerEvent::SubmitRequested),
        ComposerEffect::Submit(_)
    ));

    state.apply(ComposerEvent::Typed("again".to_string()));
    assert_eq!(
        state.apply(ComposerEvent::SubmitRequested),
        ComposerEffect::Rejected(Rejection::SubmissionInFlight)
    );

    state.apply(ComposerEvent::SubmitSettled(SubmitResult::Failure));
    assert!(!state.submitting);
    assert!(matches!(
        state.apply(ComposerEvent::SubmitRequested),
        ComposerEffect::Submit(Submission { ref content, .. }) if content == "again"
    ));
}

#[test]
fn submit_waits_for_upload_to_finish() {
    let mut state = ComposerState::default();
    state.apply(ComposerEvent::Typed("caption".to_string()));
    start_upload(&mut state, "photo.png");

    assert!(!state.can_submit());
    assert_eq!(
        state.apply(ComposerEvent::SubmitRequested),
        ComposerEffect::Rejected(Rejection::UploadInFlight)
    );
    assert_eq!(state.content, "caption");
}

#[test]
fn failed_upload_clears_slot_and_resets_file_input() {
    let mut state = ComposerState::default();
    let upload_id = start_upload(&mut state, "photo.png");
    state.apply(ComposerEvent::UploadProgressed {
        upload_id,
        progress: 0.4,
    });
    assert_eq!(state.upload_progress(), Some(0.4));

    let before = state.reset_token;
    state.apply(ComposerEvent::UploadFailed { upload_id });

    assert_eq!(state.attachment, AttachmentSlot::Empty);
    assert_eq!(state.upload_progress(), None);
    assert!(state.reset_token > before);
    assert!(!state.is_uploading());
}

#[test]
fn progress_is_clamped_and_monotonic() {
    let mut state = ComposerState::default();
    let upload_id = start_upload(&mut state, "clip.mov");
    for progress in [0.3, 0.1, f32::NAN, 2.0] {
        state.apply(ComposerEvent::UploadProgressed {
            upload_id,
            progress,
        });
    }
    assert_eq!(state.upload_progress(), Some(1.0));
}

#[test]
fn stale_upload_results_are_ignored() {
    let mut state = ComposerState::default();
    let first = start_upload(&mut state, "old.png");
    state.apply(ComposerEvent::FileCleared);
    let second = start_upload(&mut state, "new.png");
    assert_ne!(first, second);

    let token = state.reset_token;
    state.apply(ComposerEvent::UploadSucceeded {
        upload_id: first,
        attachment: attachment("old.png"),
    });
    state.apply(ComposerEvent::UploadProgressed {
        upload_id: first,
        progress: 0.9,
    });

    assert_eq!(state.reset_token, token);
    assert_eq!(state.upload_progress(), Some(0.0));
    assert!(matches!(
        state.attachment,
        AttachmentSlot::Uploading { ref filename, .. } if filename == "new.png"
    ));
}

#[test]
fn selecting_a_file_during_an_upload_is_refused() {
    let mut state = ComposerState::default();
    start_upload(&mut state, "a.png");
    assert_eq!(
        state.apply(ComposerEvent::FileSelected {
            filename: "b.png".to_string()
        }),
        ComposerEffect::Rejected(Rejection::UploadInFlight)
    );
}

#[test]
fn reset_token_only_grows() {
    let mut state = ComposerState::default();
    let mut last = state.reset_token;
    let mut check = |state: &ComposerState| {
        assert!(state.reset_token >= last);
        last = state.reset_token;
    };

    let upload_id = start_upload(&mut state, "a.png");
    check(&state);
    state.apply(ComposerEvent::UploadSucceeded {
        upload_id,
        attachment: attachment("a.png"),
    });
    check(&state);
    state.apply(ComposerEvent::FileCleared);
    check(&state);
    let upload_id = start_upload(&mut state, "b.png");
    state.apply(ComposerEvent::UploadFailed { upload_id });
    check(&state);
    state.apply(ComposerEvent::Typed("x".to_string()));
    state.apply(ComposerEvent::SubmitRequested);
    state.apply(ComposerEvent::SubmitSettled(SubmitResult::Success));
    check(&state);

    assert_eq!(state.reset_token, 3);
}
