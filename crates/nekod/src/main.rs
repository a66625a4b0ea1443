use std::sync::Arc;

use neko_core::config::AppConfig;
use nekod::ai_gateway::AiClient;
use nekod::history::HistoryStore;
use nekod::{server, AppState};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        // 默认用 info 级别，若设置 RUST_LOG 则以环境变量为准。
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()))
        .with_target(false)
        .compact()
        .init();

    let config = AppConfig::load("configs/config.toml")?;
    let history = HistoryStore::open(&config.history.sqlite_path, config.history.busy_timeout_ms)?;
    let ai = AiClient::new(&config.ai, &config.replies);
    let state = Arc::new(AppState::new(&config, ai, history));

    info!(
        "models: chat={} draw={}; history: max_rounds={} ttl_seconds={}",
        config.ai.chat_model,
        config.ai.draw_model,
        config.history.max_rounds,
        config.history.ttl_seconds
    );

    let app = server::app(state);
    let listener = tokio::net::TcpListener::bind(&config.server.listen).await?;
    info!("nekod listening on {}", config.server.listen);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
}
