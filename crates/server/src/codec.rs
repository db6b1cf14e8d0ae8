//! JSON wire format of the platform's message push.
//!
//! ```json
//! {"ToUserName":"gh_bot","FromUserName":"openid","CreateTime":1700000000,
//!  "MsgType":"text","Content":"hello","MsgId":23400000000000001}
//! ```

use quickreply_core::types::{EventPayload, InboundEvent, Reply};
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("malformed payload: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("missing field {0}")]
    MissingField(&'static str),
    #[error("unsupported message type {0:?}")]
    Unsupported(String),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WireMessage {
    #[serde(default)]
    to_user_name: String,
    #[serde(default)]
    from_user_name: String,
    #[serde(default)]
    msg_type: String,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    pic_url: Option<String>,
    /// Numeric on the wire for most messages, but accept strings too.
    #[serde(default)]
    msg_id: Option<Value>,
}

pub fn decode_event(raw: &[u8]) -> Result<InboundEvent, CodecError> {
    let wire: WireMessage = serde_json::from_slice(raw)?;
    if wire.from_user_name.trim().is_empty() {
        return Err(CodecError::MissingField("FromUserName"));
    }

    let payload = match wire.msg_type.as_str() {
        "text" => EventPayload::Text {
            content: wire
                .content
                .filter(|c| !c.trim().is_empty())
                .ok_or(CodecError::MissingField("Content"))?,
        },
        "image" => EventPayload::Image {
            image_ref: wire
                .pic_url
                .filter(|u| !u.trim().is_empty())
                .ok_or(CodecError::MissingField("PicUrl"))?,
        },
        other => return Err(CodecError::Unsupported(other.to_string())),
    };

    let event_id = wire.msg_id.and_then(|v| match v {
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) => Some(s),
        _ => None,
    });

    Ok(InboundEvent::new(
        event_id,
        wire.from_user_name,
        wire.to_user_name,
        payload,
    ))
}

/// Passive reply addressed back to the sender. `create_time` is unix seconds.
/// Returns `None` for a reply with nothing to show.
pub fn encode_reply(to: &str, from: &str, reply: &Reply, create_time: i64) -> Option<Value> {
    if reply.is_empty() {
        return None;
    }
    let body = match reply {
        Reply::Text { text } => json!({
            "ToUserName": to,
            "FromUserName": from,
            "CreateTime": create_time,
            "MsgType": "text",
            "Content": text,
        }),
        Reply::Image { media_ref } => json!({
            "ToUserName": to,
            "FromUserName": from,
            "CreateTime": create_time,
            "MsgType": "image",
            "Image": { "MediaId": media_ref },
        }),
    };
    Some(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickreply_core::types::EventKind;

    #[test]
    fn decodes_text_message_with_numeric_id() {
        let raw = br#"{"ToUserName":"gh_bot","FromUserName":"openid-1","CreateTime":1700000000,
            "MsgType":"text","Content":"hello","MsgId":23400000000000001}"#;
        let event = decode_event(raw).expect("event");
        assert_eq!(event.sender_id(), "openid-1");
        assert_eq!(event.recipient_id(), "gh_bot");
        assert_eq!(event.event_id(), Some("23400000000000001"));
        assert_eq!(
            event.payload(),
            &EventPayload::Text {
                content: "hello".into()
            }
        );
    }

    #[test]
    fn decodes_image_message() {
        let raw = br#"{"FromUserName":"openid-1","MsgType":"image","PicUrl":"https://img/1.jpg","MsgId":"42"}"#;
        let event = decode_event(raw).expect("event");
        assert_eq!(event.kind(), EventKind::Image);
        assert_eq!(event.event_id(), Some("42"));
    }

    #[test]
    fn message_without_id_decodes_with_no_event_id() {
        let raw = br#"{"FromUserName":"openid-1","MsgType":"text","Content":"hi"}"#;
        assert_eq!(decode_event(raw).expect("event").event_id(), None);
    }

    #[test]
    fn rejects_unusable_payloads() {
        assert!(matches!(
            decode_event(b"not json"),
            Err(CodecError::Malformed(_))
        ));
        assert!(matches!(
            decode_event(br#"{"FromUserName":"u","MsgType":"event","Event":"subscribe"}"#),
            Err(CodecError::Unsupported(_))
        ));
        assert!(matches!(
            decode_event(br#"{"FromUserName":"u","MsgType":"text","Content":"  "}"#),
            Err(CodecError::MissingField("Content"))
        ));
        assert!(matches!(
            decode_event(br#"{"MsgType":"text","Content":"hi"}"#),
            Err(CodecError::MissingField("FromUserName"))
        ));
    }

    #[test]
    fn encodes_text_and_image_replies() {
        let text = encode_reply("openid-1", "gh_bot", &Reply::text("hi"), 1700000000).expect("text");
        assert_eq!(text["ToUserName"], "openid-1");
        assert_eq!(text["FromUserName"], "gh_bot");
        assert_eq!(text["CreateTime"], 1700000000);
        assert_eq!(text["MsgType"], "text");
        assert_eq!(text["Content"], "hi");

        let image = encode_reply(
            "openid-1",
            "gh_bot",
            &Reply::Image {
                media_ref: "M1".into(),
            },
            1700000000,
        )
        .expect("image");
        assert_eq!(image["MsgType"], "image");
        assert_eq!(image["Image"]["MediaId"], "M1");
        assert!(image.get("Content").is_none());
    }

    #[test]
    fn empty_replies_are_not_encoded() {
        let empty_image = Reply::Image {
            media_ref: String::new(),
        };
        assert!(encode_reply("openid-1", "gh_bot", &empty_image, 0).is_none());
        assert!(encode_reply("openid-1", "gh_bot", &Reply::text("  "), 0).is_none());
    }
}
