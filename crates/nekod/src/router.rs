use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use neko_core::types::{history_key, ChatScope, ChatTurn};

use crate::history::truncate_to_recent;
use crate::onebot::{self, InboundEvent, OutboundCommand, OutboundSegment, ReplyTarget};
use crate::AppState;

/// Routing outcome for one inbound event.
#[derive(Debug, Clone, PartialEq)]
pub enum RouteDecision {
    /// Dropped by design: non-message event, missing sender, un-mentioned
    /// group message, or no actionable text.
    Filtered,
    /// Bare draw trigger; ask the user for a description instead of calling
    /// the backend.
    AskDrawDescription { target: ReplyTarget },
    Draw {
        target: ReplyTarget,
        prompt: String,
    },
    Chat {
        target: ReplyTarget,
        key: String,
        text: String,
    },
}

/// Classifies one inbound event. Pure: no I/O, no side effects beyond a
/// debug log of the group mention gate.
pub fn classify(event: &InboundEvent, fallback_self_id: &str, draw_prefix: &str) -> RouteDecision {
    if event.post_type != "message" {
        return RouteDecision::Filtered;
    }
    let Some(user_id) = event.user_id else {
        return RouteDecision::Filtered;
    };

    let is_group = event.message_type.as_deref() == Some("group");
    let (target, key_id) = if is_group {
        let Some(group_id) = event.group_id else {
            return RouteDecision::Filtered;
        };
        // 群聊：必须 @ 了机器人才响应
        let self_id = event
            .self_id
            .as_ref()
            .and_then(onebot::normalize_id)
            .unwrap_or_else(|| fallback_self_id.to_string());
        let mentioned = onebot::mentions_self(event, &self_id);
        debug!(
            "group mention gate: group_id={} self_id={} mentioned={}",
            group_id, self_id, mentioned
        );
        if !mentioned {
            return RouteDecision::Filtered;
        }
        (
            ReplyTarget {
                scope: ChatScope::Group,
                user_id,
                group_id: Some(group_id),
            },
            group_id,
        )
    } else {
        (
            ReplyTarget {
                scope: ChatScope::Private,
                user_id,
                group_id: None,
            },
            user_id,
        )
    };

    let text = onebot::extract_text(event);
    if text.is_empty() {
        return RouteDecision::Filtered;
    }

    // Extraction trims trailing whitespace, so a bare trigger arrives
    // without the prefix's own trailing space.
    if text == draw_prefix.trim_end() {
        return RouteDecision::AskDrawDescription { target };
    }
    if let Some(remainder) = text.strip_prefix(draw_prefix) {
        let prompt = remainder.trim();
        if prompt.is_empty() {
            return RouteDecision::AskDrawDescription { target };
        }
        return RouteDecision::Draw {
            target,
            prompt: prompt.to_string(),
        };
    }

    RouteDecision::Chat {
        target,
        key: history_key(target.scope, key_id),
        text,
    }
}

/// Routes one raw gateway frame to completion. Non-parseable frames are
/// dropped silently; every external call inside is individually guarded,
/// so no failure escapes into the connection shell.
pub async fn handle_event(state: Arc<AppState>, raw: &str, out: mpsc::Sender<OutboundCommand>) {
    let event: InboundEvent = match serde_json::from_str(raw) {
        Ok(event) => event,
        Err(err) => {
            debug!("unparseable gateway frame dropped: {err}");
            return;
        }
    };

    match classify(&event, &state.self_id, &state.draw_prefix) {
        RouteDecision::Filtered => {}
        RouteDecision::AskDrawDescription { target } => {
            send_reply(&out, target, OutboundSegment::text(state.replies.draw_ask.clone())).await;
        }
        RouteDecision::Draw { target, prompt } => {
            info!(
                "draw request: user_id={} prompt_chars={}",
                target.user_id,
                prompt.chars().count()
            );
            send_reply(&out, target, OutboundSegment::text(state.replies.draw_ack.clone())).await;
            match state.ai.generate_image(&prompt).await {
                Some(b64) => send_reply(&out, target, OutboundSegment::image_base64(&b64)).await,
                None => {
                    send_reply(
                        &out,
                        target,
                        OutboundSegment::text(state.replies.draw_failed.clone()),
                    )
                    .await
                }
            }
        }
        RouteDecision::Chat { target, key, text } => {
            info!(
                "chat request: key={} text_chars={}",
                key,
                text.chars().count()
            );
            // Concurrent exchanges on the same key race on this
            // read-modify-write; the last writer wins.
            let mut turns = state.history.get(&key);
            turns.push(ChatTurn::user(text));
            let reply = state.ai.chat_complete(&state.system_prompt, &turns).await;
            turns.push(ChatTurn::assistant(reply.clone()));
            truncate_to_recent(&mut turns, state.max_rounds);
            state.history.put(&key, &turns, state.history_ttl_seconds);
            send_reply(&out, target, OutboundSegment::text(reply)).await;
        }
    }
}

async fn send_reply(
    out: &mpsc::Sender<OutboundCommand>,
    target: ReplyTarget,
    segment: OutboundSegment,
) {
    let command = onebot::reply_command(target, segment);
    if out.send(command).await.is_err() {
        warn!("outbound channel closed, reply dropped");
    }
}
