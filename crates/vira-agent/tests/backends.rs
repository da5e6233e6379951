#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::time::Duration;
use vira_agent::{
    AnthropicProvider, CompletionOptions, CompletionProvider, ModelConfig, OpenAiProvider,
    ProviderKind,
};
use vira_core::ProviderErrorKind;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config(provider: ProviderKind, server: &MockServer) -> ModelConfig {
    ModelConfig {
        provider,
        model_id: "test-model".into(),
        api_key: "secret".into(),
        api_base_url: Some(server.uri()),
        temperature: 0.3,
        max_tokens: 1024,
        request_timeout_ms: 500,
    }
}

// ---------------------------------------------------------------------------
// Anthropic
// ---------------------------------------------------------------------------

#[tokio::test]
async fn anthropic_returns_joined_text() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .and(header("x-api-key", "secret"))
        .and(header("anthropic-version", "2023-06-01"))
        .and(body_partial_json(serde_json::json!({"model": "test-model"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "content": [{"type": "text", "text": "a plan"}],
            "stop_reason": "end_turn"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let provider = AnthropicProvider::new(config(ProviderKind::Anthropic, &server)).unwrap();
    let text = provider
        .complete("plan it", &CompletionOptions::default())
        .await
        .unwrap();
    assert_eq!(text, "a plan");
}

#[tokio::test]
async fn anthropic_status_mapping() {
    let cases = [
        (429, ProviderErrorKind::RateLimited),
        (529, ProviderErrorKind::Unavailable),
        (503, ProviderErrorKind::Unavailable),
        (504, ProviderErrorKind::Timeout),
        (400, ProviderErrorKind::InvalidRequest),
    ];
    for (status, kind) in cases {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .respond_with(ResponseTemplate::new(status).set_body_string("nope"))
            .mount(&server)
            .await;

        let provider = AnthropicProvider::new(config(ProviderKind::Anthropic, &server)).unwrap();
        let err = provider
            .complete("x", &CompletionOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind, kind, "status {status}");
        assert!(err.message.contains("nope"));
    }
}

#[tokio::test]
async fn slow_response_is_timeout() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({"content": []}))
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&server)
        .await;

    let provider = AnthropicProvider::new(config(ProviderKind::Anthropic, &server)).unwrap();
    let err = provider
        .complete("x", &CompletionOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind, ProviderErrorKind::Timeout);
}

#[tokio::test]
async fn unreachable_host_is_unavailable() {
    let server = MockServer::start().await;
    let mut cfg = config(ProviderKind::Anthropic, &server);
    drop(server);
    cfg.api_base_url = Some("http://127.0.0.1:1".into());

    let provider = AnthropicProvider::new(cfg).unwrap();
    let err = provider
        .complete("x", &CompletionOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind, ProviderErrorKind::Unavailable);
}

// ---------------------------------------------------------------------------
// OpenAI-compatible
// ---------------------------------------------------------------------------

#[tokio::test]
async fn openai_returns_first_choice() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("Authorization", "Bearer secret"))
        .and(body_partial_json(serde_json::json!({
            "messages": [{"role": "user", "content": "review"}]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "choices": [{"index": 0, "message": {"role": "assistant", "content": "LGTM"}}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let provider = OpenAiProvider::new(config(ProviderKind::OpenAi, &server)).unwrap();
    let text = provider
        .complete("review", &CompletionOptions::default())
        .await
        .unwrap();
    assert_eq!(text, "LGTM");
}

#[tokio::test]
async fn openrouter_sends_attribution_headers() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("X-Title", "VIRA"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "choices": [{"message": {"content": "routed"}}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let provider = OpenAiProvider::new(config(ProviderKind::OpenRouter, &server)).unwrap();
    let text = provider
        .complete("x", &CompletionOptions::default())
        .await
        .unwrap();
    assert_eq!(text, "routed");
}

#[tokio::test]
async fn openai_rate_limit() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(429))
        .mount(&server)
        .await;

    let provider = OpenAiProvider::new(config(ProviderKind::Groq, &server)).unwrap();
    let err = provider
        .complete("x", &CompletionOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind, ProviderErrorKind::RateLimited);
}
