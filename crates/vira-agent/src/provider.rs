use crate::backends::anthropic::AnthropicProvider;
use crate::backends::openai::OpenAiProvider;
use crate::config::{CompletionOptions, ModelConfig, ProviderKind};
use async_trait::async_trait;
use std::sync::Arc;
use vira_core::{ProviderError, ViraError, ViraResult};

/// Text completion capability injected into workers.
///
/// Implementations must be callable concurrently from many workers.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Short provider name used in logs.
    fn name(&self) -> &str;

    /// Complete `prompt` and return the generated text.
    async fn complete(
        &self,
        prompt: &str,
        options: &CompletionOptions,
    ) -> Result<String, ProviderError>;
}

/// Build the HTTP provider matching `config.provider`.
pub fn provider_from_config(config: ModelConfig) -> ViraResult<Arc<dyn CompletionProvider>> {
    if config.api_key.is_empty() {
        return Err(ViraError::Config(format!(
            "no API key configured for {:?} (set {})",
            config.provider,
            config.api_key_env()
        )));
    }
    let provider: Arc<dyn CompletionProvider> = match config.provider {
        ProviderKind::Anthropic => Arc::new(AnthropicProvider::new(config)?),
        ProviderKind::OpenAi | ProviderKind::OpenRouter | ProviderKind::Groq => {
            Arc::new(OpenAiProvider::new(config)?)
        }
    };
    Ok(provider)
}
