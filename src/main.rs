//! emu-pilot Hub - 控制端服务器
//!
//! 显示端通过 WebSocket 连接后发送 BEGIN_PLAY，即为该连接启动一个 AI 玩家。
//!
//! 运行方式：
//! ```bash
//! cargo run --bin emu-pilot
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use emu_pilot::config::{load_config, PlayerPolicy};
use emu_pilot::core::{ShutdownManager, ShutdownReason};
use emu_pilot::gateway::{Hub, HubConfig, SessionRegistry};
use emu_pilot::observability;
use emu_pilot::player::create_oracle_from_config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let cfg = load_config(config_path).context("Failed to load config")?;
    let policy = PlayerPolicy::from_config(&cfg).context("Invalid [player] config")?;

    let oracle = create_oracle_from_config(&cfg);
    let registry = Arc::new(SessionRegistry::new(
        oracle,
        policy,
        cfg.player.name_prefix.clone(),
    ));
    let hub = Hub::new(HubConfig::from(&cfg.gateway), registry);

    let shutdown = ShutdownManager::new();
    shutdown.install_signal_handlers();

    let listener = hub
        .bind()
        .await
        .map_err(anyhow::Error::msg)
        .context("Failed to start gateway")?;

    tracing::info!(
        "Starting {} hub, press Ctrl+C to stop",
        cfg.app.name.as_deref().unwrap_or("emu-pilot")
    );
    hub.serve(listener, shutdown.token()).await;

    if let Some(ShutdownReason::Signal) = shutdown.reason() {
        tracing::info!("Terminated by signal");
    }
    Ok(())
}
