//! Hub（中枢）：WebSocket 服务端
//!
//! 每条连接是一条通道：入站文本帧交给 SessionRegistry 分发，出站消息经 QueuedChannel
//! 由单一写任务写回。连接关闭或出错时停止该通道的会话。

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_util::sync::CancellationToken;

use super::channel::{MessageChannel, QueuedChannel};
use super::message::WireMessage;
use super::registry::SessionRegistry;
use crate::config::GatewaySection;

/// Hub 配置
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// WebSocket 监听地址
    pub bind_addr: String,
    /// 最大并发连接数
    pub max_connections: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self::from(&GatewaySection::default())
    }
}

impl From<&GatewaySection> for HubConfig {
    fn from(section: &GatewaySection) -> Self {
        Self {
            bind_addr: section.bind_addr.clone(),
            max_connections: section.max_connections,
        }
    }
}

/// 活跃连接计数，drop 时归还名额
struct ConnectionSlot(Arc<AtomicUsize>);

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Hub（中枢）
pub struct Hub {
    config: HubConfig,
    registry: Arc<SessionRegistry>,
    connections: Arc<AtomicUsize>,
}

impl Hub {
    pub fn new(config: HubConfig, registry: Arc<SessionRegistry>) -> Self {
        Self {
            config,
            registry,
            connections: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// 获取活跃连接数
    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// 绑定监听地址
    pub async fn bind(&self) -> Result<TcpListener, String> {
        let addr: SocketAddr = self
            .config
            .bind_addr
            .parse()
            .map_err(|e| format!("Invalid bind address: {}", e))?;

        TcpListener::bind(&addr)
            .await
            .map_err(|e| format!("Failed to bind {}: {}", addr, e))
    }

    /// 接受连接直到 shutdown 被取消；返回前停止所有会话
    pub async fn serve(&self, listener: TcpListener, shutdown: CancellationToken) {
        match listener.local_addr() {
            Ok(addr) => tracing::info!("Gateway listening on ws://{}", addr),
            Err(e) => tracing::warn!("Gateway listening (local address unavailable: {})", e),
        }

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => self.spawn_connection(stream, addr, shutdown.clone()),
                        Err(e) => tracing::error!("Accept error: {}", e),
                    }
                }
            }
        }

        let stopped = self.registry.stop_all().await;
        tracing::info!("Gateway stopped ({} sessions stopped)", stopped);
    }

    fn spawn_connection(&self, stream: TcpStream, addr: SocketAddr, shutdown: CancellationToken) {
        let active = self.connections.fetch_add(1, Ordering::SeqCst) + 1;
        let slot = ConnectionSlot(Arc::clone(&self.connections));
        let over_limit = active > self.config.max_connections;
        let registry = Arc::clone(&self.registry);

        tokio::spawn(async move {
            let _slot = slot;
            let result = if over_limit {
                tracing::warn!("Refusing connection from {}: connection limit reached", addr);
                refuse_connection(stream).await
            } else {
                handle_connection(stream, addr, registry, shutdown).await
            };
            if let Err(e) = result {
                tracing::error!("Connection error from {}: {}", addr, e);
            }
        });
    }
}

async fn refuse_connection(stream: TcpStream) -> Result<(), String> {
    let mut ws_stream = tokio_tungstenite::accept_async(stream)
        .await
        .map_err(|e| format!("WebSocket handshake failed: {}", e))?;
    let notice = WireMessage::error("Too many connections").encode().map_err(|e| e.to_string())?;
    ws_stream
        .send(WsMessage::Text(notice))
        .await
        .map_err(|e| format!("Send error: {}", e))?;
    let _ = ws_stream.close(None).await;
    Ok(())
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    registry: Arc<SessionRegistry>,
    shutdown: CancellationToken,
) -> Result<(), String> {
    let ws_stream = tokio_tungstenite::accept_async(stream)
        .await
        .map_err(|e| format!("WebSocket handshake failed: {}", e))?;

    let (mut ws_tx, mut ws_rx) = ws_stream.split();
    let channel_id = format!("ws_{}_{}", addr, uuid::Uuid::new_v4());
    let (queued, mut rx) = QueuedChannel::new(channel_id.clone());
    let channel: Arc<dyn MessageChannel> = queued.clone();

    tracing::info!("New WebSocket connection from {} ({})", addr, channel_id);

    // 所有出站消息经同一写任务，帧不会交错
    let writer = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if ws_tx.send(WsMessage::Text(msg)).await.is_err() {
                break;
            }
        }
        let _ = ws_tx.close().await;
    });

    loop {
        let msg = tokio::select! {
            _ = shutdown.cancelled() => break,
            msg = ws_rx.next() => msg,
        };
        let msg = match msg {
            Some(Ok(m)) => m,
            Some(Err(e)) => {
                tracing::warn!("WebSocket receive error: {}", e);
                break;
            }
            None => break,
        };

        match msg {
            WsMessage::Text(text) => registry.handle_text(&channel, &text).await,
            WsMessage::Binary(_) => {
                let _ = channel.send(WireMessage::warn("Binary frames are not supported"));
            }
            WsMessage::Close(_) => break,
            _ => {}
        }
    }

    queued.close();
    registry.channel_closed(&channel_id).await;
    drop(channel);
    drop(queued);
    let _ = writer.await;

    tracing::info!("WebSocket connection closed: {}", addr);
    Ok(())
}
