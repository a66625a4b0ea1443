use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::mpsc;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use neko_core::config::{AiConfig, RepliesConfig};
use nekod::ai_gateway::AiClient;
use nekod::history::HistoryStore;
use nekod::onebot::OutboundCommand;
use nekod::{router, AppState};

const CHAT_MODEL: &str = "chat-model";
const DRAW_MODEL: &str = "draw-model";

fn test_state(backend_url: &str) -> Arc<AppState> {
    let ai_cfg = AiConfig {
        base_url: backend_url.to_string(),
        api_token: "test-token".to_string(),
        chat_model: CHAT_MODEL.to_string(),
        draw_model: DRAW_MODEL.to_string(),
        max_tokens: 256,
        draw_steps: 20,
        system_prompt: "persona".to_string(),
    };
    let replies = RepliesConfig::default();
    let ai = AiClient::new(&ai_cfg, &replies);
    let history = HistoryStore::open_in_memory().unwrap();
    Arc::new(AppState {
        self_id: "10001".to_string(),
        draw_prefix: "画 ".to_string(),
        system_prompt: ai_cfg.system_prompt.clone(),
        max_rounds: 10,
        history_ttl_seconds: 300,
        replies,
        ai,
        history,
    })
}

async fn route(state: Arc<AppState>, event: Value) -> Vec<Value> {
    let (tx, mut rx) = mpsc::channel::<OutboundCommand>(8);
    router::handle_event(state, &event.to_string(), tx).await;
    let mut commands = Vec::new();
    while let Some(command) = rx.recv().await {
        commands.push(serde_json::to_value(&command).unwrap());
    }
    commands
}

fn private_text_event(user_id: i64, text: &str) -> Value {
    json!({
        "post_type": "message",
        "message_type": "private",
        "self_id": 10001,
        "user_id": user_id,
        "message": [{"type": "text", "data": {"text": text}}]
    })
}

#[tokio::test]
async fn non_message_event_produces_no_commands() {
    let backend = MockServer::start().await;
    let state = test_state(&backend.uri());
    let commands = route(state, json!({"post_type": "notice", "user_id": 1})).await;
    assert!(commands.is_empty());
    assert!(backend.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn unparseable_frame_is_dropped_silently() {
    let backend = MockServer::start().await;
    let state = test_state(&backend.uri());
    let (tx, mut rx) = mpsc::channel::<OutboundCommand>(8);
    router::handle_event(state, "not json {", tx).await;
    assert!(rx.recv().await.is_none());
}

#[tokio::test]
async fn group_message_without_mention_is_ignored() {
    let backend = MockServer::start().await;
    let state = test_state(&backend.uri());
    let commands = route(
        state,
        json!({
            "post_type": "message",
            "message_type": "group",
            "self_id": 10001,
            "user_id": 1,
            "group_id": 7,
            "message": [{"type": "text", "data": {"text": "画 一只猫"}}]
        }),
    )
    .await;
    assert!(commands.is_empty());
    assert!(backend.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn mentioned_group_message_gets_a_group_reply() {
    let backend = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!("/{CHAT_MODEL}")))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"result": {"response": "好喵"}})),
        )
        .mount(&backend)
        .await;
    let state = test_state(&backend.uri());
    let commands = route(
        state,
        json!({
            "post_type": "message",
            "message_type": "group",
            "self_id": "10001",
            "user_id": 1,
            "group_id": 7,
            "message": [
                {"type": "at", "data": {"qq": 10001}},
                {"type": "text", "data": {"text": " 在吗"}}
            ]
        }),
    )
    .await;
    assert_eq!(commands.len(), 1);
    assert_eq!(commands[0]["action"], "send_group_msg");
    assert_eq!(commands[0]["params"]["group_id"], 7);
    assert_eq!(commands[0]["params"]["message"][0]["data"]["text"], "好喵");
}

#[tokio::test]
async fn private_chat_replies_and_threads_history() {
    let backend = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!("/{CHAT_MODEL}")))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"result": {"response": "你好喵"}})),
        )
        .mount(&backend)
        .await;
    let state = test_state(&backend.uri());

    let commands = route(state.clone(), private_text_event(1, "hello")).await;
    assert_eq!(commands.len(), 1);
    assert_eq!(commands[0]["action"], "send_private_msg");
    assert_eq!(commands[0]["params"]["user_id"], 1);
    assert_eq!(commands[0]["params"]["message"][0]["type"], "text");
    assert_eq!(commands[0]["params"]["message"][0]["data"]["text"], "你好喵");
    assert!(!commands[0]["echo"].as_str().unwrap().is_empty());

    // A second exchange must carry the first one in the backend request.
    let commands = route(state, private_text_event(1, "second")).await;
    assert_eq!(commands.len(), 1);

    let requests = backend.received_requests().await.unwrap();
    assert_eq!(requests.len(), 2);
    let body: Value = serde_json::from_slice(&requests[1].body).unwrap();
    assert_eq!(body["stream"], false);
    assert_eq!(body["max_tokens"], 256);
    let messages = body["messages"].as_array().unwrap();
    assert_eq!(messages[0]["role"], "system");
    assert_eq!(messages[0]["content"], "persona");
    assert_eq!(messages[1], json!({"role": "user", "content": "hello"}));
    assert_eq!(messages[2], json!({"role": "assistant", "content": "你好喵"}));
    assert_eq!(messages[3], json!({"role": "user", "content": "second"}));
}

#[tokio::test]
async fn backend_failure_yields_notice_and_still_persists_history() {
    let backend = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!("/{CHAT_MODEL}")))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&backend)
        .await;
    let state = test_state(&backend.uri());

    let commands = route(state.clone(), private_text_event(1, "hello")).await;
    assert_eq!(commands.len(), 1);
    assert_eq!(
        commands[0]["params"]["message"][0]["data"]["text"],
        RepliesConfig::default().chat_unavailable
    );

    // The fallback assistant turn is part of the persisted exchange.
    let turns = state.history.get("history:u1");
    assert_eq!(turns.len(), 2);
    assert_eq!(turns[0].content, "hello");
    assert_eq!(turns[1].content, RepliesConfig::default().chat_unavailable);
}

#[tokio::test]
async fn bare_draw_trigger_asks_without_calling_backend() {
    let backend = MockServer::start().await;
    let state = test_state(&backend.uri());
    let commands = route(state, private_text_event(1, "画 ")).await;
    assert_eq!(commands.len(), 1);
    assert_eq!(
        commands[0]["params"]["message"][0]["data"]["text"],
        RepliesConfig::default().draw_ask
    );
    assert!(backend.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn draw_path_acks_then_sends_image() {
    let backend = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!("/{DRAW_MODEL}")))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "image/png")
                .set_body_bytes(vec![0x89u8, 0x50, 0x4e, 0x47]),
        )
        .mount(&backend)
        .await;
    let state = test_state(&backend.uri());

    let commands = route(state, private_text_event(1, "画 一只猫")).await;
    assert_eq!(commands.len(), 2);
    assert_eq!(
        commands[0]["params"]["message"][0]["data"]["text"],
        RepliesConfig::default().draw_ack
    );
    assert_eq!(commands[1]["params"]["message"][0]["type"], "image");
    assert_eq!(
        commands[1]["params"]["message"][0]["data"]["file"],
        "base64://iVBORw=="
    );

    // The quality-boost phrase is applied inside the capability client.
    let requests = backend.received_requests().await.unwrap();
    let body: Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(body["prompt"], "masterpiece, best quality, 一只猫");
    assert_eq!(body["num_steps"], 20);
}

#[tokio::test]
async fn draw_failure_yields_ack_then_notice() {
    let backend = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!("/{DRAW_MODEL}")))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&backend)
        .await;
    let state = test_state(&backend.uri());

    let commands = route(state, private_text_event(1, "画 一只猫")).await;
    assert_eq!(commands.len(), 2);
    assert_eq!(
        commands[0]["params"]["message"][0]["data"]["text"],
        RepliesConfig::default().draw_ack
    );
    assert_eq!(
        commands[1]["params"]["message"][0]["data"]["text"],
        RepliesConfig::default().draw_failed
    );
}

#[tokio::test]
async fn empty_image_payload_counts_as_failure() {
    let backend = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!("/{DRAW_MODEL}")))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "image/png")
                .set_body_bytes(Vec::<u8>::new()),
        )
        .mount(&backend)
        .await;
    let state = test_state(&backend.uri());

    let commands = route(state, private_text_event(1, "画 一只猫")).await;
    assert_eq!(commands.len(), 2);
    assert_eq!(
        commands[1]["params"]["message"][0]["data"]["text"],
        RepliesConfig::default().draw_failed
    );
}

#[tokio::test]
async fn json_enveloped_image_payload_is_decoded() {
    let backend = MockServer::start().await;
    // "iVBORw==" is the base64 form of the PNG magic prefix used above.
    Mock::given(method("POST"))
        .and(path(format!("/{DRAW_MODEL}")))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"result": {"image": "iVBORw=="}})),
        )
        .mount(&backend)
        .await;
    let state = test_state(&backend.uri());

    let commands = route(state, private_text_event(1, "画 一只猫")).await;
    assert_eq!(commands.len(), 2);
    assert_eq!(
        commands[1]["params"]["message"][0]["data"]["file"],
        "base64://iVBORw=="
    );
}

#[tokio::test]
async fn empty_backend_reply_falls_back_to_token() {
    let backend = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!("/{CHAT_MODEL}")))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"result": {"response": "  "}})),
        )
        .mount(&backend)
        .await;
    let state = test_state(&backend.uri());

    let commands = route(state, private_text_event(1, "hello")).await;
    assert_eq!(commands.len(), 1);
    assert_eq!(
        commands[0]["params"]["message"][0]["data"]["text"],
        RepliesConfig::default().chat_empty
    );
}

#[tokio::test]
async fn history_is_truncated_to_the_most_recent_exchanges() {
    let backend = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!("/{CHAT_MODEL}")))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"response": "ok喵"})),
        )
        .mount(&backend)
        .await;
    let state = test_state(&backend.uri());

    for i in 0..12 {
        let _ = route(state.clone(), private_text_event(1, &format!("msg {i}"))).await;
    }

    let turns = state.history.get("history:u1");
    assert_eq!(turns.len(), 2 * state.max_rounds);
    // Most recent turns retained, in original order.
    assert_eq!(turns[turns.len() - 2].content, "msg 11");
    assert_eq!(turns[turns.len() - 1].content, "ok喵");
    assert_eq!(turns[0].content, "msg 2");
}
