use crate::{GenerationOptions, GenerationResponse, LLMProvider, ProviderError, Usage};
use async_trait::async_trait;
use quickreply_core::types::{ChatMessage, Role};
use reqwest::Client;
use serde_json::{json, Value};

/// Provider for any OpenAI-compatible API.
pub struct OpenAIProvider {
    api_key: String,
    api_base: String,
    client: Client,
}

impl OpenAIProvider {
    pub fn new(api_key: String, api_base: Option<String>) -> Self {
        Self {
            api_key,
            api_base: api_base
                .map(|b| b.trim_end_matches('/').to_string())
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            client: Client::new(),
        }
    }

    async fn post_json(&self, path: &str, body: &Value) -> Result<Value, ProviderError> {
        let url = format!("{}{}", self.api_base, path);
        let res = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(body)
            .send()
            .await
            .map_err(|e| ProviderError::NetworkError(e.to_string()))?;

        let status = res.status();
        if !status.is_success() {
            let error_text = res
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ProviderError::ApiError(format!("{status}: {error_text}")));
        }

        res.json()
            .await
            .map_err(|e| ProviderError::ApiError(format!("Failed to parse response: {}", e)))
    }
}

fn role_name(role: &Role) -> &'static str {
    match role {
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::System => "system",
    }
}

pub(crate) fn message_json(m: &ChatMessage) -> Value {
    match &m.image_url {
        Some(url) => json!({
            "role": role_name(&m.role),
            "content": [
                { "type": "text", "text": m.content },
                { "type": "image_url", "image_url": { "url": url } }
            ]
        }),
        None => json!({
            "role": role_name(&m.role),
            "content": m.content
        }),
    }
}

#[async_trait]
impl LLMProvider for OpenAIProvider {
    async fn chat(
        &self,
        messages: &[ChatMessage],
        options: &GenerationOptions,
    ) -> Result<GenerationResponse, ProviderError> {
        let messages_json: Vec<Value> = messages.iter().map(message_json).collect();

        let mut body = json!({
            "model": options.model,
            "messages": messages_json,
        });

        if let Some(max_tokens) = options.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }
        if let Some(temperature) = options.temperature {
            body["temperature"] = json!(temperature);
        }

        let json = self.post_json("/chat/completions", &body).await?;

        let content = json["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or_default()
            .trim()
            .to_string();

        let usage = json.get("usage").map(|usage_json| Usage {
            input_tokens: usage_json["prompt_tokens"].as_u64().unwrap_or(0) as usize,
            output_tokens: usage_json["completion_tokens"].as_u64().unwrap_or(0) as usize,
        });

        Ok(GenerationResponse { content, usage })
    }

    async fn generate_image(
        &self,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<String, ProviderError> {
        let body = json!({
            "model": options.model,
            "prompt": prompt,
            "n": 1,
            "size": "1024x1024",
        });

        let json = self.post_json("/images/generations", &body).await?;
        json["data"][0]["url"]
            .as_str()
            .filter(|u| !u.is_empty())
            .map(|u| u.to_string())
            .ok_or_else(|| ProviderError::ApiError("image response carried no url".to_string()))
    }
}
