use crate::openai::OpenAIProvider;
use crate::reliable::ReliableProvider;
use crate::{GenerationOptions, LLMProvider};
use quickreply_core::config::ProviderSettings;
use std::sync::Arc;

/// Create the AI backend client from the provider settings, wrapped in the
/// retrying provider.
pub fn create_provider(settings: &ProviderSettings) -> anyhow::Result<Arc<dyn LLMProvider>> {
    if settings.api_key.trim().is_empty() {
        anyhow::bail!("No AI backend configured. Set provider.api_key in the config file.");
    }

    let inner = Arc::new(OpenAIProvider::new(
        settings.api_key.clone(),
        settings.api_base.clone(),
    ));

    Ok(Arc::new(ReliableProvider::new(
        inner,
        settings.max_retries,
        settings.base_backoff_ms,
    )))
}

/// Options for text replies.
pub fn chat_options(settings: &ProviderSettings) -> GenerationOptions {
    GenerationOptions {
        model: settings.model.clone(),
        max_tokens: settings.max_tokens,
        temperature: settings.temperature,
    }
}

/// Options for describing inbound images.
pub fn vision_options(settings: &ProviderSettings) -> GenerationOptions {
    GenerationOptions {
        model: settings
            .vision_model
            .clone()
            .unwrap_or_else(|| settings.model.clone()),
        max_tokens: settings.max_tokens,
        temperature: settings.temperature,
    }
}

/// Options for image generation.
pub fn image_options(settings: &ProviderSettings) -> GenerationOptions {
    GenerationOptions::new(&settings.image_model)
}
