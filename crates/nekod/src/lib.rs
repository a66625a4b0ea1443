pub mod ai_gateway;
pub mod debug_api;
pub mod history;
pub mod onebot;
pub mod router;
pub mod server;

use neko_core::config::{AppConfig, RepliesConfig};

use crate::ai_gateway::AiClient;
use crate::history::HistoryStore;

/// Shared daemon state, constructed once at startup and handed to every
/// per-frame task behind an Arc.
pub struct AppState {
    /// Fallback bot account id, used when the gateway omits `self_id`.
    pub self_id: String,
    pub draw_prefix: String,
    pub system_prompt: String,
    pub max_rounds: usize,
    pub history_ttl_seconds: u64,
    pub replies: RepliesConfig,
    pub ai: AiClient,
    pub history: HistoryStore,
}

impl AppState {
    pub fn new(config: &AppConfig, ai: AiClient, history: HistoryStore) -> Self {
        Self {
            self_id: config.bot.self_id.clone(),
            draw_prefix: config.bot.draw_prefix.clone(),
            system_prompt: config.ai.system_prompt.clone(),
            max_rounds: config.history.max_rounds,
            history_ttl_seconds: config.history.ttl_seconds,
            replies: config.replies.clone(),
            ai,
            history,
        }
    }
}
