use crate::{
    domain::{AccountId, Chat, ChatId, ChatMessage, MessageId, MessagePage, MessageRef},
    error::{ApiError, ErrorCode},
    protocol::{ChatSummary, CreateMessageRequest, MessagePagePayload},
};

#[test]
fn message_page_payload_maps_to_confirmed_messages() {
    let raw = r#"{
        "messages": [
            {
                "message_id": 41,
                "chat_id": 3,
                "author_id": 7,
                "content": "hello",
                "attachment": {
                    "media_id": 9,
                    "preview_url": "https://cdn.example/9.png",
                    "filename": "photo.png",
                    "mime_type": "image/png"
                },
                "created_at": "2024-01-01T00:00:00Z"
            }
        ],
        "next_cursor": 40
    }"#;

    let payload: MessagePagePayload = serde_json::from_str(raw).expect("decode");
    let page = MessagePage::from(payload);

    assert_eq!(page.next_cursor, Some(MessageId(40)));
    let message = &page.messages[0];
    assert_eq!(message.id, MessageRef::Server(MessageId(41)));
    assert!(!message.pending);
    assert_eq!(
        message.attachment.as_ref().map(|a| a.filename.as_str()),
        Some("photo.png")
    );
}

#[test]
fn create_message_request_omits_missing_media() {
    let body = serde_json::to_value(CreateMessageRequest {
        content: "hi".to_string(),
        media_id: None,
    })
    .expect("encode");
    assert_eq!(body, serde_json::json!({ "content": "hi" }));
}

#[test]
fn chat_is_unsolicited_only_for_the_recipient() {
    let chat = Chat::from(ChatSummary {
        chat_id: ChatId(1),
        accepted: false,
        created_by_account: AccountId(2),
        other_account: AccountId(2),
    });

    assert!(chat.is_unsolicited_for(AccountId(1)));
    assert!(!chat.is_unsolicited_for(AccountId(2)));

    let accepted = Chat {
        accepted: true,
        ..chat
    };
    assert!(!accepted.is_unsolicited_for(AccountId(1)));
}

#[test]
fn optimistic_messages_get_distinct_local_ids() {
    let first = ChatMessage::optimistic(ChatId(1), AccountId(1), "a", None);
    let second = ChatMessage::optimistic(ChatId(1), AccountId(1), "a", None);

    assert!(first.pending);
    assert!(first.id.is_local());
    assert_ne!(first.id, second.id);
}

#[test]
fn api_error_envelope_round_trips_code() {
    let err: ApiError =
        serde_json::from_str(r#"{"code":"not_found","message":"no such chat"}"#).expect("decode");
    assert_eq!(err.code, ErrorCode::NotFound);
    assert_eq!(err.to_string(), "NotFound: no such chat");
}
