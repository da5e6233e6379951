use super::{classify_transport, error_from_response, http_client};
use crate::config::{CompletionOptions, ModelConfig};
use crate::provider::CompletionProvider;
use async_trait::async_trait;
use vira_core::{ProviderError, ViraResult};

/// Claude (Anthropic) completion provider.
pub struct AnthropicProvider {
    config: ModelConfig,
    http: reqwest::Client,
}

impl AnthropicProvider {
    pub fn new(config: ModelConfig) -> ViraResult<Self> {
        let http = http_client(&config)?;
        Ok(Self { config, http })
    }

    fn build_body(&self, prompt: &str, options: &CompletionOptions) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": self.config.model_id,
            "max_tokens": options.max_tokens.min(self.config.max_tokens),
            "temperature": options.temperature,
            "messages": [{"role": "user", "content": prompt}],
        });
        if let Some(pref) = &options.model_preference {
            body["metadata"] = serde_json::json!({
                "user_id": format!(
                    "vira:i{:.2}:c{:.2}:s{:.2}",
                    pref.intelligence_priority, pref.cost_priority, pref.speed_priority
                ),
            });
        }
        body
    }
}

#[async_trait]
impl CompletionProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn complete(
        &self,
        prompt: &str,
        options: &CompletionOptions,
    ) -> Result<String, ProviderError> {
        let url = format!("{}/v1/messages", self.config.base_url());
        let body = self.build_body(prompt, options);

        let resp = self
            .http
            .post(&url)
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| classify_transport(&e))?;

        if !resp.status().is_success() {
            return Err(error_from_response("Claude", resp).await);
        }

        let resp_body: serde_json::Value =
            resp.json().await.map_err(|e| classify_transport(&e))?;
        parse_claude_response(&resp_body)
    }
}

/// Concatenate the text blocks of a Messages API response.
fn parse_claude_response(body: &serde_json::Value) -> Result<String, ProviderError> {
    let content = body["content"]
        .as_array()
        .ok_or_else(|| ProviderError::invalid_request("Claude response has no content array"))?;

    let text: Vec<&str> = content
        .iter()
        .filter(|block| block["type"] == "text")
        .filter_map(|block| block["text"].as_str())
        .collect();

    Ok(text.join(""))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::config::{ModelPreferences, ProviderKind};

    #[test]
    fn test_parse_joins_text_blocks() {
        let body = serde_json::json!({
            "content": [
                {"type": "text", "text": "Hello, "},
                {"type": "tool_use", "id": "t", "name": "x", "input": {}},
                {"type": "text", "text": "world"}
            ]
        });
        assert_eq!(parse_claude_response(&body).unwrap(), "Hello, world");
    }

    #[test]
    fn test_parse_missing_content() {
        let err = parse_claude_response(&serde_json::json!({"id": "x"})).unwrap_err();
        assert_eq!(err.kind, vira_core::ProviderErrorKind::InvalidRequest);
    }

    #[test]
    fn test_body_caps_max_tokens_and_tags_preferences() {
        let provider = AnthropicProvider::new(ModelConfig {
            provider: ProviderKind::Anthropic,
            model_id: "claude-sonnet-4-20250514".into(),
            api_key: "k".into(),
            api_base_url: None,
            temperature: 0.7,
            max_tokens: 512,
            request_timeout_ms: 1000,
        })
        .unwrap();
        let opts = CompletionOptions::default().with_preference(ModelPreferences::new(0.9, 0.05, 0.05));
        let body = provider.build_body("hi", &opts);
        assert_eq!(body["max_tokens"], 512);
        assert_eq!(body["messages"][0]["content"], "hi");
        assert_eq!(body["metadata"]["user_id"], "vira:i0.90:c0.05:s0.05");
    }
}
