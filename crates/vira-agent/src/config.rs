use serde::{Deserialize, Serialize};

/// Which HTTP API a [`ModelConfig`] talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Anthropic,
    OpenAi,
    /// OpenAI-compatible API hosted by OpenRouter.
    OpenRouter,
    /// Groq cloud inference, OpenAI-compatible API.
    Groq,
}

/// Connection settings for one completion provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub provider: ProviderKind,
    pub model_id: String,
    #[serde(default)]
    pub api_key: String,
    pub api_base_url: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Per-request HTTP timeout; expiry maps to a `Timeout` provider error.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_request_timeout_ms() -> u64 {
    120_000
}

impl ModelConfig {
    pub fn base_url(&self) -> &str {
        if let Some(url) = &self.api_base_url {
            url
        } else {
            match self.provider {
                ProviderKind::Anthropic => "https://api.anthropic.com",
                ProviderKind::OpenAi => "https://api.openai.com",
                ProviderKind::OpenRouter => "https://openrouter.ai/api",
                ProviderKind::Groq => "https://api.groq.com/openai",
            }
        }
    }

    /// Environment variable consulted when `api_key` is left empty.
    pub fn api_key_env(&self) -> &'static str {
        match self.provider {
            ProviderKind::Anthropic => "ANTHROPIC_API_KEY",
            ProviderKind::OpenAi => "OPENAI_API_KEY",
            ProviderKind::OpenRouter => "OPENROUTER_API_KEY",
            ProviderKind::Groq => "GROQ_API_KEY",
        }
    }
}

/// Relative weighting a caller gives to model quality, cost and latency.
///
/// Providers use their configured model; the priorities travel with the
/// request as metadata so a routing provider can honour them.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelPreferences {
    pub intelligence_priority: f32,
    pub cost_priority: f32,
    pub speed_priority: f32,
}

impl ModelPreferences {
    pub fn new(intelligence: f32, cost: f32, speed: f32) -> Self {
        Self {
            intelligence_priority: intelligence,
            cost_priority: cost,
            speed_priority: speed,
        }
    }
}

/// Per-call options passed to [`crate::CompletionProvider::complete`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionOptions {
    #[serde(default)]
    pub model_preference: Option<ModelPreferences>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

impl Default for CompletionOptions {
    fn default() -> Self {
        Self {
            model_preference: None,
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
        }
    }
}

impl CompletionOptions {
    pub fn with_preference(mut self, preference: ModelPreferences) -> Self {
        self.model_preference = Some(preference);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }
}
