use super::{base::Provider, configs::ProviderConfig, openrouter::OpenRouterProvider};
use crate::errors::ProviderError;

pub fn get_provider(config: ProviderConfig) -> Result<Box<dyn Provider>, ProviderError> {
    match config {
        ProviderConfig::OpenRouter(openrouter_config) => {
            Ok(Box::new(OpenRouterProvider::new(openrouter_config)?))
        }
    }
}
