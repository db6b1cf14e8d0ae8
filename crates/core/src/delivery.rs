use crate::types::Reply;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("delivery rejected by platform: {0}")]
    Rejected(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("media error: {0}")]
    Media(String),
}

/// Secondary push channel used when a reply misses the synchronous deadline.
///
/// Implementations must not retry; the caller logs the failure and moves on.
#[async_trait]
pub trait OutOfBandDelivery: Send + Sync {
    async fn deliver(&self, recipient_id: &str, reply: &Reply) -> Result<(), DeliveryError>;
}

/// Converts an externally hosted image into a platform-native media id.
#[async_trait]
pub trait MediaUploader: Send + Sync {
    async fn upload_image(&self, image_url: &str) -> Result<String, DeliveryError>;
}
