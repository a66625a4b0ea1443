use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::warn;

use neko_core::config::{AiConfig, RepliesConfig};
use neko_core::error::NekoError;
use neko_core::types::ChatTurn;

/// Fixed prompt prefix applied to every image request.
const DRAW_QUALITY_PREFIX: &str = "masterpiece, best quality, ";

/// Adapter around the hosted inference backend. Exposes exactly two
/// operations with stable contracts; backend failures never escape either
/// of them.
#[derive(Clone)]
pub struct AiClient {
    client: Client,
    base_url: String,
    api_token: String,
    chat_model: String,
    draw_model: String,
    max_tokens: u32,
    draw_steps: u32,
    unavailable_reply: String,
    empty_reply: String,
}

impl AiClient {
    pub fn new(ai: &AiConfig, replies: &RepliesConfig) -> Self {
        Self {
            client: Client::new(),
            base_url: ai.base_url.trim_end_matches('/').to_string(),
            api_token: ai.api_token.clone(),
            chat_model: ai.chat_model.clone(),
            draw_model: ai.draw_model.clone(),
            max_tokens: ai.max_tokens,
            draw_steps: ai.draw_steps,
            unavailable_reply: replies.chat_unavailable.clone(),
            empty_reply: replies.chat_empty.clone(),
        }
    }

    /// Runs one non-streaming chat completion over the persona prompt plus
    /// the full turn sequence. Empty replies map to the fixed fallback
    /// token; failures map to the fixed unavailability notice and are
    /// logged for operators.
    pub async fn chat_complete(&self, system_prompt: &str, history: &[ChatTurn]) -> String {
        match self.request_chat(system_prompt, history).await {
            Ok(text) => {
                let trimmed = text.trim();
                if trimmed.is_empty() {
                    self.empty_reply.clone()
                } else {
                    trimmed.to_string()
                }
            }
            Err(err) => {
                warn!("chat completion failed: {err}");
                self.unavailable_reply.clone()
            }
        }
    }

    async fn request_chat(
        &self,
        system_prompt: &str,
        history: &[ChatTurn],
    ) -> Result<String, NekoError> {
        let url = format!("{}/{}", self.base_url, self.chat_model);
        let mut messages = Vec::with_capacity(history.len() + 1);
        messages.push(json!({ "role": "system", "content": system_prompt }));
        for turn in history {
            messages.push(json!({ "role": turn.role, "content": turn.content }));
        }
        let body = json!({
            "messages": messages,
            "max_tokens": self.max_tokens,
            "stream": false,
        });

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_token)
            .json(&body)
            .send()
            .await
            .map_err(|err| NekoError::Backend(format!("chat request failed: {err}")))?;
        let status = resp.status();
        let body_text = resp
            .text()
            .await
            .map_err(|err| NekoError::Backend(format!("read chat response failed: {err}")))?;
        if !status.is_success() {
            return Err(NekoError::Backend(format!(
                "chat http {}: {}",
                status.as_u16(),
                truncate(&body_text, 400)
            )));
        }
        let value: Value = serde_json::from_str(&body_text)
            .map_err(|err| NekoError::Backend(format!("parse chat response failed: {err}")))?;
        extract_reply_text(&value).ok_or_else(|| {
            NekoError::Backend(format!(
                "chat response missing reply text: {}",
                truncate(&body_text, 400)
            ))
        })
    }

    /// Generates one image and returns its transport-safe base64 encoding.
    /// Empty payloads and failures both yield `None`; the cause is logged.
    pub async fn generate_image(&self, prompt: &str) -> Option<String> {
        match self.request_image(prompt).await {
            Ok(bytes) if !bytes.is_empty() => Some(STANDARD.encode(&bytes)),
            Ok(_) => {
                warn!("image backend returned an empty payload");
                None
            }
            Err(err) => {
                warn!("image generation failed: {err}");
                None
            }
        }
    }

    async fn request_image(&self, prompt: &str) -> Result<Vec<u8>, NekoError> {
        let url = format!("{}/{}", self.base_url, self.draw_model);
        let body = json!({
            "prompt": format!("{DRAW_QUALITY_PREFIX}{prompt}"),
            "num_steps": self.draw_steps,
        });

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_token)
            .json(&body)
            .send()
            .await
            .map_err(|err| NekoError::Backend(format!("image request failed: {err}")))?;
        let status = resp.status();
        let is_json = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.contains("application/json"))
            .unwrap_or(false);
        let bytes = resp
            .bytes()
            .await
            .map_err(|err| NekoError::Backend(format!("read image response failed: {err}")))?;
        if !status.is_success() {
            return Err(NekoError::Backend(format!(
                "image http {}: {}",
                status.as_u16(),
                truncate(&String::from_utf8_lossy(&bytes), 400)
            )));
        }

        if is_json {
            // JSON 信封：图片以 base64 形式内联返回
            let value: Value = serde_json::from_slice(&bytes)
                .map_err(|err| NekoError::Backend(format!("parse image response failed: {err}")))?;
            let b64 = value
                .get("result")
                .and_then(|r| r.get("image"))
                .and_then(Value::as_str)
                .ok_or_else(|| {
                    NekoError::Backend(format!(
                        "image response contains no image payload: {}",
                        truncate(&String::from_utf8_lossy(&bytes), 400)
                    ))
                })?;
            return STANDARD
                .decode(b64)
                .map_err(|err| NekoError::Backend(format!("decode image base64 failed: {err}")));
        }
        Ok(bytes.to_vec())
    }
}

fn shape_flat_response(value: &Value) -> Option<String> {
    value.get("response").and_then(Value::as_str).map(str::to_string)
}

fn shape_wrapped_response(value: &Value) -> Option<String> {
    value
        .get("result")
        .and_then(|r| r.get("response"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn shape_openai_choices(value: &Value) -> Option<String> {
    value
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|arr| arr.first())
        .and_then(|first| first.get("message"))
        .and_then(|msg| msg.get("content"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Known reply envelope shapes, tried in order.
const REPLY_SHAPES: &[fn(&Value) -> Option<String>] = &[
    shape_flat_response,
    shape_wrapped_response,
    shape_openai_choices,
];

pub(crate) fn extract_reply_text(value: &Value) -> Option<String> {
    REPLY_SHAPES.iter().find_map(|shape| shape(value))
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    text.chars().take(max).collect::<String>() + "..."
}
