//! Client for the platform's server-side API: access tokens, customer-service
//! push messages and media upload.

use async_trait::async_trait;
use quickreply_core::delivery::{DeliveryError, MediaUploader, OutOfBandDelivery};
use quickreply_core::types::Reply;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Refresh the access token this long before the platform says it expires.
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(300);
/// Platform error codes meaning the access token is no longer valid.
const INVALID_TOKEN_CODES: [i64; 3] = [40001, 40014, 42001];
const MAX_IMAGE_BYTES: usize = 10 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("platform error {code}: {message}")]
    Api { code: i64, message: String },
    #[error("unexpected response: {0}")]
    Malformed(String),
    #[error("media error: {0}")]
    Media(String),
}

impl From<PlatformError> for DeliveryError {
    fn from(err: PlatformError) -> Self {
        match err {
            PlatformError::Network(e) => DeliveryError::Network(e.to_string()),
            PlatformError::Media(m) => DeliveryError::Media(m),
            other => DeliveryError::Rejected(other.to_string()),
        }
    }
}

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    refresh_at: Instant,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    7200
}

pub struct PlatformClient {
    app_id: String,
    app_secret: String,
    api_base: String,
    client: Client,
    token: Mutex<Option<CachedToken>>,
}

impl PlatformClient {
    pub fn new(app_id: String, app_secret: String, api_base: Option<String>) -> Self {
        Self {
            app_id,
            app_secret,
            api_base: api_base
                .map(|b| b.trim_end_matches('/').to_string())
                .unwrap_or_else(|| "https://api.weixin.qq.com".to_string()),
            client: Client::new(),
            token: Mutex::new(None),
        }
    }

    /// Current access token, fetching a new one when the cached token is
    /// close to expiry.
    pub async fn access_token(&self) -> Result<String, PlatformError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if Instant::now() < token.refresh_at {
                return Ok(token.value.clone());
            }
        }

        let url = format!("{}/cgi-bin/token", self.api_base);
        let body: Value = self
            .client
            .get(&url)
            .query(&[
                ("grant_type", "client_credential"),
                ("appid", self.app_id.as_str()),
                ("secret", self.app_secret.as_str()),
            ])
            .send()
            .await?
            .json()
            .await?;
        check_errcode(&body)?;

        let token: TokenResponse = serde_json::from_value(body)
            .map_err(|e| PlatformError::Malformed(format!("token response: {e}")))?;
        let lifetime = Duration::from_secs(token.expires_in).saturating_sub(TOKEN_REFRESH_MARGIN);
        info!(expires_in = token.expires_in, "fetched platform access token");

        *cached = Some(CachedToken {
            value: token.access_token.clone(),
            refresh_at: Instant::now() + lifetime,
        });
        Ok(token.access_token)
    }

    async fn invalidate_token(&self) {
        *self.token.lock().await = None;
    }

    /// Run a platform call and drop the cached token if the platform rejected
    /// it, so the next call fetches a fresh one.
    async fn checked(&self, body: Value) -> Result<Value, PlatformError> {
        match check_errcode(&body) {
            Err(PlatformError::Api { code, message }) if INVALID_TOKEN_CODES.contains(&code) => {
                warn!(code, "platform rejected access token, clearing cache");
                self.invalidate_token().await;
                Err(PlatformError::Api { code, message })
            }
            Err(e) => Err(e),
            Ok(()) => Ok(body),
        }
    }

    /// Push a customer-service message to `to`.
    pub async fn send_message(&self, to: &str, reply: &Reply) -> Result<(), PlatformError> {
        if reply.is_empty() {
            return Err(PlatformError::Malformed("refusing to send an empty reply".into()));
        }
        let token = self.access_token().await?;
        let url = format!("{}/cgi-bin/message/custom/send", self.api_base);
        let body: Value = self
            .client
            .post(&url)
            .query(&[("access_token", token.as_str())])
            .json(&custom_message_body(to, reply))
            .send()
            .await?
            .json()
            .await?;
        self.checked(body).await?;
        debug!(to, "customer message sent");
        Ok(())
    }

    /// Download the image at `image_url` and upload it as temporary media,
    /// returning the media id.
    pub async fn upload_image_from_url(&self, image_url: &str) -> Result<String, PlatformError> {
        let res = self.client.get(image_url).send().await?;
        if !res.status().is_success() {
            return Err(PlatformError::Media(format!(
                "image download returned {}",
                res.status()
            )));
        }
        let bytes = res.bytes().await?.to_vec();
        if bytes.len() > MAX_IMAGE_BYTES {
            return Err(PlatformError::Media(format!(
                "image is {} bytes, limit is {}",
                bytes.len(),
                MAX_IMAGE_BYTES
            )));
        }
        let (mime, extension) = sniff_image(&bytes)?;

        let part = Part::bytes(bytes)
            .file_name(format!("image.{extension}"))
            .mime_str(mime)?;
        let form = Form::new().part("media", part);

        let token = self.access_token().await?;
        let url = format!("{}/cgi-bin/media/upload", self.api_base);
        let body: Value = self
            .client
            .post(&url)
            .query(&[("access_token", token.as_str()), ("type", "image")])
            .multipart(form)
            .send()
            .await?
            .json()
            .await?;
        let body = self.checked(body).await?;

        let media_id = body
            .get("media_id")
            .and_then(|v| v.as_str())
            .filter(|id| !id.is_empty())
            .ok_or_else(|| PlatformError::Malformed("upload response without media_id".into()))?;
        info!(media_id, "uploaded image as platform media");
        Ok(media_id.to_string())
    }
}

#[async_trait]
impl OutOfBandDelivery for PlatformClient {
    async fn deliver(&self, recipient_id: &str, reply: &Reply) -> Result<(), DeliveryError> {
        self.send_message(recipient_id, reply).await.map_err(Into::into)
    }
}

#[async_trait]
impl MediaUploader for PlatformClient {
    async fn upload_image(&self, image_url: &str) -> Result<String, DeliveryError> {
        self.upload_image_from_url(image_url).await.map_err(Into::into)
    }
}

/// JSON body for the customer-service send endpoint.
pub fn custom_message_body(to: &str, reply: &Reply) -> Value {
    match reply {
        Reply::Text { text } => json!({
            "touser": to,
            "msgtype": "text",
            "text": { "content": text }
        }),
        Reply::Image { media_ref } => json!({
            "touser": to,
            "msgtype": "image",
            "image": { "media_id": media_ref }
        }),
    }
}

/// The platform answers `{"errcode": 0, ...}` or omits `errcode` on success.
fn check_errcode(body: &Value) -> Result<(), PlatformError> {
    match body.get("errcode").and_then(|v| v.as_i64()) {
        None | Some(0) => Ok(()),
        Some(code) => Err(PlatformError::Api {
            code,
            message: body
                .get("errmsg")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
        }),
    }
}

fn sniff_image(bytes: &[u8]) -> Result<(&'static str, &'static str), PlatformError> {
    match infer::get(bytes) {
        Some(kind) if kind.mime_type().starts_with("image/") => {
            Ok((kind.mime_type(), kind.extension()))
        }
        Some(kind) => Err(PlatformError::Media(format!(
            "downloaded file is {}, not an image",
            kind.mime_type()
        ))),
        None => Err(PlatformError::Media("unrecognized image format".into())),
    }
}
