use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use uuid::Uuid;

use neko_core::types::ChatScope;

/// One gateway notification, as delivered on the reverse WebSocket.
/// Unknown fields are ignored so gateway protocol additions do not break
/// deserialization.
#[derive(Debug, Clone, Deserialize)]
pub struct InboundEvent {
    pub post_type: String,
    #[serde(default)]
    pub message_type: Option<String>,
    /// The gateway reports the bot account as either a number or a string.
    #[serde(default)]
    pub self_id: Option<Value>,
    #[serde(default)]
    pub user_id: Option<i64>,
    #[serde(default)]
    pub group_id: Option<i64>,
    #[serde(default)]
    pub message: Option<Vec<Segment>>,
    #[serde(default)]
    pub raw_message: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Segment {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: Map<String, Value>,
}

/// Extracts the plain text addressed to the bot: text segments concatenated
/// in order, every other segment kind (notably `at` markers) discarded,
/// with `raw_message` as the fallback when no structured segments exist.
pub fn extract_text(event: &InboundEvent) -> String {
    let text = match &event.message {
        Some(segments) => segments
            .iter()
            .filter(|seg| seg.kind == "text")
            .filter_map(|seg| seg.data.get("text").and_then(Value::as_str))
            .collect::<String>(),
        None => event.raw_message.clone().unwrap_or_default(),
    };
    text.trim().to_string()
}

/// Normalizes an id field the gateway may send as number or string.
/// Empty strings count as absent so configured fallbacks apply.
pub fn normalize_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Whether any `at` segment addresses the given (normalized) account id.
pub fn mentions_self(event: &InboundEvent, self_id: &str) -> bool {
    let Some(segments) = &event.message else {
        return false;
    };
    segments.iter().any(|seg| {
        seg.kind == "at" && seg.data.get("qq").and_then(normalize_id).as_deref() == Some(self_id)
    })
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum OutboundSegment {
    Text { text: String },
    Image { file: String },
}

impl OutboundSegment {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Wraps transport-encoded image bytes in the gateway's base64 file scheme.
    pub fn image_base64(b64: &str) -> Self {
        Self::Image {
            file: format!("base64://{b64}"),
        }
    }
}

/// One action command addressed to the gateway.
#[derive(Debug, Clone, Serialize)]
pub struct OutboundCommand {
    pub action: &'static str,
    pub params: Value,
    pub echo: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplyTarget {
    pub scope: ChatScope,
    pub user_id: i64,
    pub group_id: Option<i64>,
}

/// Builds the gateway command that delivers one segment back to the
/// conversation the event came from.
pub fn reply_command(target: ReplyTarget, segment: OutboundSegment) -> OutboundCommand {
    let (action, params) = match target.scope {
        ChatScope::Group => (
            "send_group_msg",
            json!({ "group_id": target.group_id, "message": [segment] }),
        ),
        ChatScope::Private => (
            "send_private_msg",
            json!({ "user_id": target.user_id, "message": [segment] }),
        ),
    };
    OutboundCommand {
        action,
        params,
        echo: Uuid::new_v4().simple().to_string(),
    }
}
