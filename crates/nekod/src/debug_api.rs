use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};

use neko_core::types::ChatTurn;

use crate::AppState;

pub async fn root() -> &'static str {
    "NekoBridge is running ✅"
}

/// Runs one single-turn completion against the live backend and renders the
/// reply. Operational verification only.
pub async fn test_chat(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Html<String> {
    let msg = params.get("msg").map(String::as_str).unwrap_or("你好");
    let history = vec![ChatTurn::user(msg)];
    let reply = state.ai.chat_complete(&state.system_prompt, &history).await;
    Html(format!("<pre>{}</pre>", escape_html(&reply)))
}

/// Generates one image against the live backend and renders it inline.
pub async fn test_draw(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let prompt = params
        .get("prompt")
        .map(String::as_str)
        .unwrap_or("a cute cat");
    match state.ai.generate_image(prompt).await {
        Some(b64) => Html(format!(
            "<html><body><img src=\"data:image/png;base64,{b64}\" style=\"max-width:100%\"></body></html>"
        ))
        .into_response(),
        None => (StatusCode::INTERNAL_SERVER_ERROR, "绘图返回空").into_response(),
    }
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}
