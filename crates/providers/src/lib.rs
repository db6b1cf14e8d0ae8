pub mod factory;
pub mod openai;
pub mod reliable;

use async_trait::async_trait;
use quickreply_core::types::ChatMessage;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("API error: {0}")]
    ApiError(String),
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Network error: {0}")]
    NetworkError(String),
}

#[derive(Debug, Clone)]
pub struct GenerationOptions {
    pub model: String,
    pub max_tokens: Option<usize>,
    pub temperature: Option<f64>,
}

impl GenerationOptions {
    pub fn new(model: &str) -> Self {
        Self {
            model: model.to_string(),
            max_tokens: None,
            temperature: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GenerationResponse {
    pub content: String,
    pub usage: Option<Usage>,
}

#[derive(Debug, Clone)]
pub struct Usage {
    pub input_tokens: usize,
    pub output_tokens: usize,
}

/// Client for the AI backend: text completion, image generation and image
/// description.
#[async_trait]
pub trait LLMProvider: Send + Sync {
    async fn chat(
        &self,
        messages: &[ChatMessage],
        options: &GenerationOptions,
    ) -> Result<GenerationResponse, ProviderError>;

    /// Generate an image for `prompt` and return a URL where it can be fetched.
    async fn generate_image(
        &self,
        _prompt: &str,
        _options: &GenerationOptions,
    ) -> Result<String, ProviderError> {
        Err(ProviderError::ConfigError(
            "image generation not supported by this provider".to_string(),
        ))
    }

    /// Describe the image at `image_url`, guided by `prompt`.
    async fn describe_image(
        &self,
        image_url: &str,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<GenerationResponse, ProviderError> {
        let messages = [ChatMessage::new(quickreply_core::types::Role::User, prompt)
            .with_image(image_url)];
        self.chat(&messages, options).await
    }
}
