use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What kind of content an inbound event carries.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Text,
    Image,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum EventPayload {
    Text { content: String },
    /// `image_ref` is the platform-hosted URL of the picture the user sent.
    Image { image_ref: String },
}

impl EventPayload {
    pub fn kind(&self) -> EventKind {
        match self {
            EventPayload::Text { .. } => EventKind::Text,
            EventPayload::Image { .. } => EventKind::Image,
        }
    }
}

/// One decoded message notification from the platform.
///
/// Fields are private so an event cannot be altered once it has entered the
/// coordinator.
#[derive(Debug, Clone, Serialize)]
pub struct InboundEvent {
    event_id: Option<String>,
    sender_id: String,
    recipient_id: String,
    payload: EventPayload,
    received_at: DateTime<Utc>,
}

impl InboundEvent {
    pub fn new(
        event_id: Option<String>,
        sender_id: impl Into<String>,
        recipient_id: impl Into<String>,
        payload: EventPayload,
    ) -> Self {
        Self {
            // The platform omits ids for some event kinds; treat blank as absent.
            event_id: event_id.filter(|id| !id.trim().is_empty()),
            sender_id: sender_id.into(),
            recipient_id: recipient_id.into(),
            payload,
            received_at: Utc::now(),
        }
    }

    pub fn text(sender_id: &str, content: &str) -> Self {
        Self::new(
            None,
            sender_id,
            "",
            EventPayload::Text {
                content: content.to_string(),
            },
        )
    }

    /// Builder-style method to set the platform event id
    pub fn with_event_id(mut self, event_id: &str) -> Self {
        self.event_id = Some(event_id.to_string()).filter(|id| !id.trim().is_empty());
        self
    }

    pub fn event_id(&self) -> Option<&str> {
        self.event_id.as_deref()
    }

    pub fn sender_id(&self) -> &str {
        &self.sender_id
    }

    pub fn recipient_id(&self) -> &str {
        &self.recipient_id
    }

    pub fn payload(&self) -> &EventPayload {
        &self.payload
    }

    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }

    pub fn received_at(&self) -> DateTime<Utc> {
        self.received_at
    }

    /// Key under which the reply to this event is cached.
    ///
    /// Image events carry no comparable text, so every image from one sender
    /// shares a single slot.
    pub fn cache_key(&self) -> String {
        match &self.payload {
            EventPayload::Text { content } => format!("{}:{}", self.sender_id, content.trim()),
            EventPayload::Image { .. } => format!("{}:[image]", self.sender_id),
        }
    }
}

/// A reply ready to be encoded back to the platform or pushed out of band.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Reply {
    Text { text: String },
    /// `media_ref` is a platform-native media id, never an external URL.
    Image { media_ref: String },
}

impl Reply {
    pub fn text(text: impl Into<String>) -> Self {
        Reply::Text { text: text.into() }
    }

    /// Image reply, degrading to `fallback_text` when there is no media to send.
    pub fn image_or_text(media_ref: Option<String>, fallback_text: impl Into<String>) -> Self {
        match media_ref.filter(|m| !m.trim().is_empty()) {
            Some(media_ref) => Reply::Image { media_ref },
            None => Reply::text(fallback_text),
        }
    }

    pub fn kind(&self) -> EventKind {
        match self {
            Reply::Text { .. } => EventKind::Text,
            Reply::Image { .. } => EventKind::Image,
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Reply::Text { text } => text.trim().is_empty(),
            Reply::Image { media_ref } => media_ref.trim().is_empty(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// A single turn sent to the AI backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    /// Image attached to this turn, for vision requests.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

impl ChatMessage {
    pub fn new(role: Role, content: &str) -> Self {
        Self {
            role,
            content: content.to_string(),
            image_url: None,
        }
    }

    /// Builder-style method to attach an image
    pub fn with_image(mut self, url: &str) -> Self {
        self.image_url = Some(url.to_string());
        self
    }
}
