/// Anthropic Messages API.
pub mod anthropic;
/// OpenAI-compatible Chat Completions API (OpenAI, OpenRouter, Groq).
pub mod openai;

use crate::config::ModelConfig;
use reqwest::StatusCode;
use std::time::Duration;
use vira_core::{ProviderError, ProviderErrorKind, ViraError, ViraResult};

pub(crate) fn http_client(config: &ModelConfig) -> ViraResult<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_millis(config.request_timeout_ms))
        .build()
        .map_err(|e| ViraError::Http(e.to_string()))
}

/// Map a non-success HTTP status onto a provider error kind.
pub(crate) fn classify_status(status: StatusCode) -> ProviderErrorKind {
    match status.as_u16() {
        429 => ProviderErrorKind::RateLimited,
        408 | 504 => ProviderErrorKind::Timeout,
        529 => ProviderErrorKind::Unavailable,
        s if (500..600).contains(&s) => ProviderErrorKind::Unavailable,
        _ => ProviderErrorKind::InvalidRequest,
    }
}

/// Map a transport failure onto a provider error.
pub(crate) fn classify_transport(err: &reqwest::Error) -> ProviderError {
    if err.is_timeout() {
        ProviderError::timeout(err.to_string())
    } else if err.is_connect() || err.is_request() {
        ProviderError::unavailable(err.to_string())
    } else {
        ProviderError::invalid_request(err.to_string())
    }
}

pub(crate) async fn error_from_response(api: &str, resp: reqwest::Response) -> ProviderError {
    let status = resp.status();
    let body = resp
        .text()
        .await
        .unwrap_or_else(|_| "unknown error".to_string());
    ProviderError::new(
        classify_status(status),
        format!("{api} API error {status}: {body}"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_status() {
        let cases = [
            (429, ProviderErrorKind::RateLimited),
            (408, ProviderErrorKind::Timeout),
            (504, ProviderErrorKind::Timeout),
            (500, ProviderErrorKind::Unavailable),
            (503, ProviderErrorKind::Unavailable),
            (529, ProviderErrorKind::Unavailable),
            (400, ProviderErrorKind::InvalidRequest),
            (401, ProviderErrorKind::InvalidRequest),
            (404, ProviderErrorKind::InvalidRequest),
        ];
        for (code, kind) in cases {
            let status = StatusCode::from_u16(code).unwrap_or(StatusCode::BAD_REQUEST);
            assert_eq!(classify_status(status), kind, "status {code}");
        }
    }
}
