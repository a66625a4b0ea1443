use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    #[serde(default)]
    pub bot: BotConfig,
    pub ai: AiConfig,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub replies: RepliesConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub listen: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BotConfig {
    /// Fallback account id, used when the gateway omits `self_id`.
    #[serde(default)]
    pub self_id: String,
    #[serde(default = "default_draw_prefix")]
    pub draw_prefix: String,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            self_id: String::new(),
            draw_prefix: default_draw_prefix(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AiConfig {
    pub base_url: String,
    pub api_token: String,
    #[serde(default = "default_chat_model")]
    pub chat_model: String,
    #[serde(default = "default_draw_model")]
    pub draw_model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_draw_steps")]
    pub draw_steps: u32,
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HistoryConfig {
    #[serde(default = "default_sqlite_path")]
    pub sqlite_path: String,
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// Retained exchange cap; stored turns never exceed twice this value.
    #[serde(default = "default_max_rounds")]
    pub max_rounds: usize,
    #[serde(default = "default_history_ttl_seconds")]
    pub ttl_seconds: u64,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            sqlite_path: default_sqlite_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
            max_rounds: default_max_rounds(),
            ttl_seconds: default_history_ttl_seconds(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RepliesConfig {
    #[serde(default = "default_draw_ask")]
    pub draw_ask: String,
    #[serde(default = "default_draw_ack")]
    pub draw_ack: String,
    #[serde(default = "default_draw_failed")]
    pub draw_failed: String,
    #[serde(default = "default_chat_unavailable")]
    pub chat_unavailable: String,
    #[serde(default = "default_chat_empty")]
    pub chat_empty: String,
}

impl Default for RepliesConfig {
    fn default() -> Self {
        Self {
            draw_ask: default_draw_ask(),
            draw_ack: default_draw_ack(),
            draw_failed: default_draw_failed(),
            chat_unavailable: default_chat_unavailable(),
            chat_empty: default_chat_empty(),
        }
    }
}

fn default_draw_prefix() -> String {
    "画 ".to_string()
}

fn default_chat_model() -> String {
    "@cf/meta/llama-3.1-8b-instruct".to_string()
}

fn default_draw_model() -> String {
    "@cf/lykon/dreamshaper-8-lcm".to_string()
}

fn default_max_tokens() -> u32 {
    256
}

fn default_draw_steps() -> u32 {
    20
}

fn default_system_prompt() -> String {
    "你是一个友好的 QQ 助手，名叫\"哈吉喵\"。\n\
     一只毒舌可爱的赛博猫，回复必须极短且带\"喵\"，\n\
     如果用户想画图，告诉他发送\"画 [描述]\"即可。"
        .to_string()
}

fn default_sqlite_path() -> String {
    "data/nekod.sqlite3".to_string()
}

fn default_busy_timeout_ms() -> u64 {
    5000
}

fn default_max_rounds() -> usize {
    10
}

fn default_history_ttl_seconds() -> u64 {
    // 三天
    60 * 60 * 24 * 3
}

fn default_draw_ask() -> String {
    "请告诉我你想画什么，例如：画 一只可爱的猫咪".to_string()
}

fn default_draw_ack() -> String {
    "🎨 正在为你绘图，请稍候...".to_string()
}

fn default_draw_failed() -> String {
    "绘图失败了，请稍后再试 😢".to_string()
}

fn default_chat_unavailable() -> String {
    "AI 服务暂时不可用，请稍后再试。".to_string()
}

fn default_chat_empty() -> String {
    "喵？".to_string()
}

impl AppConfig {
    pub fn load(path: &str) -> Result<Self, config::ConfigError> {
        let cfg = config::Config::builder()
            .add_source(config::File::with_name(path))
            .build()?;
        cfg.try_deserialize()
    }
}
