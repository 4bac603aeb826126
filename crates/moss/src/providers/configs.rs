use crate::config::MossConfig;
use crate::errors::ProviderError;

pub enum ProviderConfig {
    OpenRouter(OpenRouterProviderConfig),
}

/// Settings for any OpenAI compatible `chat/completions` endpoint, OpenRouter by default.
#[derive(Debug, Clone)]
pub struct OpenRouterProviderConfig {
    pub host: String,
    pub api_key: String,
    pub model: String,
}

impl ProviderConfig {
    pub fn from_settings(settings: &MossConfig) -> Result<Self, ProviderError> {
        match settings.provider.as_str() {
            "openrouter" | "openai" => Ok(ProviderConfig::OpenRouter(OpenRouterProviderConfig {
                host: settings.base_url.clone(),
                api_key: settings.api_key.clone(),
                model: settings.model.clone(),
            })),
            other => Err(ProviderError::InvalidRequest(format!(
                "Unsupported provider '{other}'"
            ))),
        }
    }
}
