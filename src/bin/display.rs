//! emu-pilot Display - 显示端客户端
//!
//! 连接 Hub 后发送 BEGIN_PLAY，以固定画面（[display].screenshot_path 或内置 1x1 PNG）应答截图请求，
//! 收到的按键指令只记录日志。Ctrl+C 时发送 END_PLAY 后退出。
//!
//! 运行方式：
//! ```bash
//! cargo run --bin emu-pilot-display
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};

use emu_pilot::config::load_config;
use emu_pilot::core::{ShutdownManager, ShutdownReason};
use emu_pilot::display::{DisplayRuntime, EmulatorDevice, StaticFrameDevice};
use emu_pilot::gateway::{MessageChannel, QueuedChannel};
use emu_pilot::observability;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let cfg = load_config(config_path).context("Failed to load config")?;

    let device: Arc<dyn EmulatorDevice> = match &cfg.display.screenshot_path {
        Some(path) => Arc::new(
            StaticFrameDevice::from_file(path).context("Failed to load screenshot frame")?,
        ),
        None => Arc::new(StaticFrameDevice::placeholder()),
    };

    let url = cfg.display.hub_url.clone();
    let (ws_stream, _) = connect_async(url.as_str())
        .await
        .with_context(|| format!("Failed to connect to {}", url))?;
    tracing::info!("Connected to hub at {}", url);

    let (mut ws_tx, mut ws_rx) = ws_stream.split();
    let (queued, mut rx) = QueuedChannel::new("hub");
    let channel: Arc<dyn MessageChannel> = queued.clone();

    let writer = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if ws_tx.send(WsMessage::Text(msg)).await.is_err() {
                break;
            }
        }
        let _ = ws_tx.close().await;
    });

    let runtime = DisplayRuntime::new(device, channel);
    runtime.begin_play().context("Failed to send BEGIN_PLAY")?;

    let shutdown = ShutdownManager::new();
    shutdown.install_signal_handlers();
    let token = shutdown.token();

    loop {
        let msg = tokio::select! {
            _ = token.cancelled() => break,
            msg = ws_rx.next() => msg,
        };
        match msg {
            Some(Ok(WsMessage::Text(text))) => {
                if let Err(e) = runtime.handle_text(&text).await {
                    shutdown.shutdown(ShutdownReason::ConnectionLost(e.to_string()));
                }
            }
            Some(Ok(WsMessage::Close(_))) | None => {
                shutdown.shutdown(ShutdownReason::ConnectionLost("hub closed the connection".to_string()));
            }
            Some(Err(e)) => {
                shutdown.shutdown(ShutdownReason::ConnectionLost(e.to_string()));
            }
            Some(Ok(_)) => {}
        }
    }

    match shutdown.reason() {
        Some(ShutdownReason::ConnectionLost(reason)) => {
            tracing::warn!("Connection to hub lost: {}", reason);
        }
        _ => {
            if let Err(e) = runtime.end_play() {
                tracing::warn!("Failed to send END_PLAY: {}", e);
            }
        }
    }

    drop(runtime);
    queued.close();
    drop(queued);
    let _ = writer.await;

    tracing::info!("Display client stopped");
    Ok(())
}
