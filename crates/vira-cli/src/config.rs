use serde::Deserialize;
use std::path::{Path, PathBuf};
use vira_agent::ModelConfig;
use vira_orchestrator::EngineConfig;

/// Contents of `vira.toml`.
#[derive(Debug, Deserialize)]
pub struct ViraConfig {
    pub model: ModelConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    /// Root the filesystem tools are confined to.
    #[serde(default = "default_workspace")]
    pub workspace: PathBuf,
}

fn default_workspace() -> PathBuf {
    PathBuf::from(".")
}

impl ViraConfig {
    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        let mut config: ViraConfig = toml::from_str(raw)?;
        if config.model.api_key.is_empty() {
            if let Ok(key) = std::env::var(config.model.api_key_env()) {
                config.model.api_key = key;
            }
        }
        config.engine.validate()?;
        Ok(config)
    }

    pub async fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
            anyhow::anyhow!("Failed to read config file '{}': {e}", path.display())
        })?;
        Self::parse(&raw)
    }
}
