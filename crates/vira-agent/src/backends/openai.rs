use super::{classify_transport, error_from_response, http_client};
use crate::config::{CompletionOptions, ModelConfig, ProviderKind};
use crate::provider::CompletionProvider;
use async_trait::async_trait;
use vira_core::{ProviderError, ViraResult};

/// OpenAI-compatible completion provider (OpenAI, OpenRouter, Groq).
pub struct OpenAiProvider {
    config: ModelConfig,
    http: reqwest::Client,
}

impl OpenAiProvider {
    pub fn new(config: ModelConfig) -> ViraResult<Self> {
        let http = http_client(&config)?;
        Ok(Self { config, http })
    }

    fn add_provider_headers(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let req = req.header("Authorization", format!("Bearer {}", self.config.api_key));
        match self.config.provider {
            ProviderKind::OpenRouter => req
                .header("HTTP-Referer", "https://github.com/vira-orchestrator")
                .header("X-Title", "VIRA"),
            _ => req,
        }
    }
}

#[async_trait]
impl CompletionProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    async fn complete(
        &self,
        prompt: &str,
        options: &CompletionOptions,
    ) -> Result<String, ProviderError> {
        let url = format!("{}/v1/chat/completions", self.config.base_url());
        let body = serde_json::json!({
            "model": self.config.model_id,
            "max_tokens": options.max_tokens.min(self.config.max_tokens),
            "temperature": options.temperature,
            "messages": [{"role": "user", "content": prompt}],
        });

        let resp = self
            .add_provider_headers(self.http.post(&url))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| classify_transport(&e))?;

        if !resp.status().is_success() {
            return Err(error_from_response("OpenAI", resp).await);
        }

        let resp_body: serde_json::Value =
            resp.json().await.map_err(|e| classify_transport(&e))?;
        parse_openai_response(&resp_body)
    }
}

fn parse_openai_response(body: &serde_json::Value) -> Result<String, ProviderError> {
    let message = &body["choices"][0]["message"];
    if message.is_null() {
        return Err(ProviderError::invalid_request(
            "OpenAI response has no choices",
        ));
    }
    Ok(message["content"].as_str().unwrap_or_default().to_string())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_first_choice() {
        let body = serde_json::json!({
            "choices": [{"index": 0, "message": {"role": "assistant", "content": "done"}}]
        });
        assert_eq!(parse_openai_response(&body).unwrap(), "done");
    }

    #[test]
    fn test_parse_null_content_is_empty() {
        let body = serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": null}}]
        });
        assert_eq!(parse_openai_response(&body).unwrap(), "");
    }

    #[test]
    fn test_parse_no_choices() {
        assert!(parse_openai_response(&serde_json::json!({"choices": []})).is_err());
    }
}
