use crate::{GenerationOptions, GenerationResponse, LLMProvider, ProviderError};
use async_trait::async_trait;
use quickreply_core::types::ChatMessage;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Retries transient backend failures with bounded exponential backoff.
///
/// Retries happen inside the generation task, so they only ever extend the
/// late path; the webhook deadline is enforced elsewhere.
pub struct ReliableProvider {
    inner: Arc<dyn LLMProvider>,
    max_retries: u32,
    base_backoff_ms: u64,
}

impl ReliableProvider {
    pub fn new(inner: Arc<dyn LLMProvider>, max_retries: u32, base_backoff_ms: u64) -> Self {
        Self {
            inner,
            max_retries,
            base_backoff_ms: base_backoff_ms.max(100),
        }
    }

    fn is_retryable(err: &ProviderError) -> bool {
        match err {
            ProviderError::NetworkError(_) => true,
            ProviderError::ApiError(message) => {
                let lower = message.to_lowercase();
                lower.contains("429")
                    || lower.contains("rate limit")
                    || lower.contains("too many requests")
                    || lower.contains("timeout")
                    || lower.contains("temporar")
                    || lower.contains("unavailable")
                    || lower.contains("502")
                    || lower.contains("503")
            }
            ProviderError::ConfigError(_) => false,
        }
    }

    async fn with_retries<T, F, Fut>(&self, op: &'static str, mut call: F) -> Result<T, ProviderError>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<T, ProviderError>> + Send,
        T: Send,
    {
        let mut backoff_ms = self.base_backoff_ms;

        for attempt in 0..=self.max_retries {
            match call().await {
                Ok(resp) => return Ok(resp),
                Err(err) => {
                    if !Self::is_retryable(&err) || attempt == self.max_retries {
                        return Err(err);
                    }

                    tracing::warn!(
                        op,
                        attempt = attempt + 1,
                        max_attempts = self.max_retries + 1,
                        backoff_ms,
                        error = %err,
                        "provider call failed; retrying"
                    );
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                    backoff_ms = (backoff_ms.saturating_mul(2)).min(8_000);
                }
            }
        }

        Err(ProviderError::ApiError("unknown provider failure".into()))
    }
}

#[async_trait]
impl LLMProvider for ReliableProvider {
    async fn chat(
        &self,
        messages: &[ChatMessage],
        options: &GenerationOptions,
    ) -> Result<GenerationResponse, ProviderError> {
        self.with_retries("chat", move || self.inner.chat(messages, options))
            .await
    }

    async fn generate_image(
        &self,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<String, ProviderError> {
        self.with_retries("generate_image", move || self.inner.generate_image(prompt, options))
            .await
    }

    async fn describe_image(
        &self,
        image_url: &str,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<GenerationResponse, ProviderError> {
        self.with_retries("describe_image", move || {
            self.inner.describe_image(image_url, prompt, options)
        })
        .await
    }
}
