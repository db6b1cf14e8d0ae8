use async_trait::async_trait;
use quickreply_core::config::{ProviderSettings, ReplyConfig};
use quickreply_core::delivery::MediaUploader;
use quickreply_core::types::{ChatMessage, EventPayload, InboundEvent, Reply, Role};
use quickreply_providers::factory::{chat_options, image_options, vision_options};
use quickreply_providers::{GenerationOptions, LLMProvider, ProviderError};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("backend error: {0}")]
    Backend(#[from] ProviderError),
    #[error("backend returned an empty reply")]
    Empty,
    #[error("generation task aborted: {0}")]
    Aborted(String),
}

/// Produces the reply for one event. May take far longer than the webhook
/// deadline.
#[async_trait]
pub trait ReplyGenerator: Send + Sync {
    async fn generate(&self, event: &InboundEvent) -> Result<Reply, GenerationError>;
}

/// Reply generator backed by the AI provider.
///
/// - text starting with the image prefix: generate an image, upload it as
///   platform media, reply with the media (or the image URL if upload fails)
/// - other text: chat completion
/// - image: describe the picture
pub struct LlmReplyGenerator {
    provider: Arc<dyn LLMProvider>,
    uploader: Option<Arc<dyn MediaUploader>>,
    system_prompt: String,
    image_prompt_prefix: String,
    describe_prompt: String,
    chat_options: GenerationOptions,
    vision_options: GenerationOptions,
    image_options: GenerationOptions,
}

impl LlmReplyGenerator {
    pub fn new(
        provider: Arc<dyn LLMProvider>,
        settings: &ProviderSettings,
        reply: &ReplyConfig,
    ) -> Self {
        Self {
            provider,
            uploader: None,
            system_prompt: settings.system_prompt.clone(),
            image_prompt_prefix: reply.image_prompt_prefix.clone(),
            describe_prompt: reply.describe_prompt.clone(),
            chat_options: chat_options(settings),
            vision_options: vision_options(settings),
            image_options: image_options(settings),
        }
    }

    pub fn with_uploader(mut self, uploader: Arc<dyn MediaUploader>) -> Self {
        self.uploader = Some(uploader);
        self
    }

    fn image_prompt<'a>(&self, text: &'a str) -> Option<&'a str> {
        if self.image_prompt_prefix.is_empty() {
            return None;
        }
        text.trim()
            .strip_prefix(self.image_prompt_prefix.as_str())
            .map(str::trim)
            .filter(|p| !p.is_empty())
    }

    async fn complete_text(&self, text: &str) -> Result<Reply, GenerationError> {
        let messages = [
            ChatMessage::new(Role::System, &self.system_prompt),
            ChatMessage::new(Role::User, text.trim()),
        ];
        let resp = self.provider.chat(&messages, &self.chat_options).await?;
        if let Some(usage) = &resp.usage {
            info!(
                input_tokens = usage.input_tokens,
                output_tokens = usage.output_tokens,
                "chat completion finished"
            );
        }
        non_empty_text(resp.content)
    }

    async fn draw(&self, prompt: &str) -> Result<Reply, GenerationError> {
        let url = self
            .provider
            .generate_image(prompt, &self.image_options)
            .await?;

        let Some(uploader) = &self.uploader else {
            return Ok(Reply::text(url));
        };
        match uploader.upload_image(&url).await {
            Ok(media_id) => Ok(Reply::image_or_text(Some(media_id), url)),
            Err(e) => {
                warn!(error = %e, "media upload failed, replying with image link");
                Ok(Reply::text(url))
            }
        }
    }

    async fn describe(&self, image_ref: &str) -> Result<Reply, GenerationError> {
        let resp = self
            .provider
            .describe_image(image_ref, &self.describe_prompt, &self.vision_options)
            .await?;
        non_empty_text(resp.content)
    }
}

fn non_empty_text(content: String) -> Result<Reply, GenerationError> {
    if content.trim().is_empty() {
        return Err(GenerationError::Empty);
    }
    Ok(Reply::text(content))
}

#[async_trait]
impl ReplyGenerator for LlmReplyGenerator {
    async fn generate(&self, event: &InboundEvent) -> Result<Reply, GenerationError> {
        match event.payload() {
            EventPayload::Text { content } => match self.image_prompt(content) {
                Some(prompt) => self.draw(prompt).await,
                None => self.complete_text(content).await,
            },
            EventPayload::Image { image_ref } => self.describe(image_ref).await,
        }
    }
}
