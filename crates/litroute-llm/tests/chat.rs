//! Integration tests for the chat client against a mock server.

#![allow(clippy::unwrap_used)]

use std::time::Duration;

use litroute_llm::{
    ApiErrorCode, ChatClient, ChatConfig, Error, Label, PromptKind, Verdict,
};
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn completion(content: &str) -> serde_json::Value {
    json!({
        "id": "chatcmpl-123",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": content},
            "finish_reason": "stop"
        }],
        "usage": {"prompt_tokens": 200, "completion_tokens": 1, "total_tokens": 201}
    })
}

fn client(server: &MockServer) -> ChatClient {
    ChatClient::new(ChatConfig {
        base_url: server.uri(),
        api_key: Some("sk-test".to_string()),
        timeout: Duration::from_secs(5),
        ..ChatConfig::default()
    })
    .unwrap()
}

#[tokio::test]
async fn test_classify_document_type() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("Authorization", "Bearer sk-test"))
        .and(body_partial_json(json!({
            "model": "deepseek-chat",
            "temperature": 0.0,
            "stream": false
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("REVIEW")))
        .expect(1)
        .mount(&server)
        .await;

    let verdict = client(&server)
        .classify(PromptKind::DocumentType, "A survey of recent advances ...")
        .await
        .unwrap();
    assert_eq!(verdict, Verdict::Label(Label::Review));
}

#[tokio::test]
async fn test_classify_duplicate_check() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("Yes")))
        .mount(&server)
        .await;

    let verdict = client(&server)
        .classify(PromptKind::DuplicateCheck, "[Attachment 1]\n...\n\n[Attachment 2]\n...")
        .await
        .unwrap();
    assert_eq!(verdict, Verdict::Label(Label::Duplicate));
}

#[tokio::test]
async fn test_unparseable_reply_keeps_raw_text() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("Unclear")))
        .mount(&server)
        .await;

    let verdict = client(&server)
        .classify(PromptKind::DocumentType, "text")
        .await
        .unwrap();
    assert_eq!(verdict, Verdict::Unparseable("Unclear".to_string()));
}

#[tokio::test]
async fn test_empty_choices_is_unparseable() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "x", "choices": []})))
        .mount(&server)
        .await;

    let verdict = client(&server)
        .classify(PromptKind::DocumentType, "text")
        .await
        .unwrap();
    assert!(matches!(verdict, Verdict::Unparseable(_)));
}

#[tokio::test]
async fn test_rate_limit_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(429)
                .insert_header("Retry-After", "2")
                .set_body_json(json!({
                    "error": {"message": "Rate limit reached", "type": "rate_limit_exceeded"}
                })),
        )
        .mount(&server)
        .await;

    let err = client(&server)
        .classify(PromptKind::DocumentType, "text")
        .await
        .unwrap_err();
    match err {
        Error::Api {
            status,
            code,
            message,
            retry_after,
        } => {
            assert_eq!(status, 429);
            assert_eq!(code, ApiErrorCode::RateLimited);
            assert_eq!(message, "Rate limit reached");
            assert_eq!(retry_after, Some(Duration::from_secs(2)));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_malformed_body_is_json_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>gateway</html>"))
        .mount(&server)
        .await;

    let err = client(&server)
        .complete(PromptKind::DocumentType.messages("text"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Json(_)));
}
