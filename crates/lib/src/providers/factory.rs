//! # AI Provider Factory
//!
//! This module centralizes the logic for creating AI provider instances from
//! configuration. By placing it in the `lib` crate, any consumer (CLI, tests)
//! builds providers the same way, ensuring consistency.

use crate::{
    config::ProviderConfig,
    errors::PipelineError,
    providers::ai::{gemini::GeminiProvider, local::LocalAiProvider, AiProvider},
};
use std::collections::HashMap;
use tracing::info;

/// Creates an AI provider instance based on a model name.
///
/// This function handles the logic for:
/// - Differentiating between Gemini and local models based on the model name.
/// - Sourcing API keys and URLs from the configuration and the environment.
/// - Ensuring the local AI provider's URL is configured to prevent runtime errors.
pub fn create_ai_provider(
    providers_config: &HashMap<String, ProviderConfig>,
    model_name: &str,
) -> Result<Box<dyn AiProvider>, PipelineError> {
    info!("Creating AI provider for model: '{model_name}'");

    let provider: Box<dyn AiProvider> = if model_name.starts_with("gemini") {
        let gemini_config = providers_config.get("gemini_default");
        let api_key = gemini_config
            .and_then(|p| p.api_key.clone())
            .or_else(|| std::env::var("AI_API_KEY").ok())
            .ok_or_else(|| {
                PipelineError::MissingAiProvider(
                    "An API key is required for Gemini models; set it in config.yml or AI_API_KEY."
                        .to_string(),
                )
            })?;
        let api_url = gemini_config
            .and_then(|p| p.api_url.clone())
            .unwrap_or_else(|| {
                format!(
                "https://generativelanguage.googleapis.com/v1beta/models/{model_name}:generateContent"
            )
            });
        info!("Configuring Gemini provider with URL: {api_url}");
        Box::new(GeminiProvider::new(api_url, api_key)?)
    } else {
        let local_provider_config = providers_config.get("local_default").ok_or_else(|| {
            PipelineError::MissingAiProvider(
                "A 'local_default' provider must be defined in config.yml for local models."
                    .to_string(),
            )
        })?;

        let api_url = local_provider_config.api_url.as_ref().cloned().ok_or_else(|| {
            PipelineError::MissingAiProvider(
                "api_url is not set for the local_default provider. Please set LOCAL_AI_API_URL in your .env file."
                    .to_string(),
            )
        })?;

        info!("Configuring local AI provider with URL: {api_url}");
        Box::new(LocalAiProvider::new(
            api_url,
            local_provider_config.api_key.clone(),
            Some(model_name.to_string()),
        )?)
    };

    Ok(provider)
}
