//! 会话注册表：每条通道至多一个未停止的会话
//!
//! 负责把入站消息分发到对应会话（生命周期消息、截图回复、通知），
//! 并在会话循环自行结束（通道断开）时把它从表中移除。

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::RwLock;

use super::channel::{ChannelId, MessageChannel};
use super::message::{NoticeLevel, WireMessage};
use crate::config::PlayerPolicy;
use crate::core::PlayerError;
use crate::player::{DecisionOracle, PlayerSession};

/// 会话注册表
pub struct SessionRegistry {
    sessions: Arc<RwLock<HashMap<ChannelId, Arc<PlayerSession>>>>,
    oracle: Arc<dyn DecisionOracle>,
    policy: PlayerPolicy,
    name_prefix: String,
    next_player: AtomicU64,
}

impl SessionRegistry {
    pub fn new(oracle: Arc<dyn DecisionOracle>, policy: PlayerPolicy, name_prefix: impl Into<String>) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            oracle,
            policy,
            name_prefix: name_prefix.into(),
            next_player: AtomicU64::new(1),
        }
    }

    /// 为通道创建并启动会话；已有未停止的会话时回复 WARN 并拒绝
    pub async fn begin_play(&self, channel: &Arc<dyn MessageChannel>) -> Result<String, PlayerError> {
        let channel_id = channel.id().to_string();
        let mut sessions = self.sessions.write().await;

        if let Some(existing) = sessions.get(&channel_id) {
            if !existing.is_stopped() {
                tracing::warn!(
                    "BEGIN_PLAY on channel {} ignored: '{}' is already playing",
                    channel_id,
                    existing.name()
                );
                let _ = channel.send(WireMessage::warn(format!(
                    "Player '{}' is already active on this connection",
                    existing.name()
                )));
                return Err(PlayerError::SessionAlreadyActive(channel_id));
            }
        }

        let n = self.next_player.fetch_add(1, Ordering::Relaxed);
        let name = format!("{}-{}", self.name_prefix, n);
        let session = PlayerSession::new(
            name.clone(),
            channel,
            Arc::clone(&self.oracle),
            self.policy.clone(),
        );

        channel.send(WireMessage::PlayerInit {
            player_name: name.clone(),
            message: format!("Player '{}' created and started", name),
        })?;
        session.start()?;
        sessions.insert(channel_id.clone(), Arc::clone(&session));
        drop(sessions);

        self.watch_session(channel_id.clone(), session);
        tracing::info!("Player '{}' bound to channel {}", name, channel_id);
        Ok(name)
    }

    /// 循环结束时移除会话（仅当表中仍是同一个会话）
    fn watch_session(&self, channel_id: ChannelId, session: Arc<PlayerSession>) {
        let sessions = Arc::clone(&self.sessions);
        tokio::spawn(async move {
            session.stopped().await;
            let mut sessions = sessions.write().await;
            let same = sessions
                .get(&channel_id)
                .map_or(false, |current| Arc::ptr_eq(current, &session));
            if same {
                sessions.remove(&channel_id);
                tracing::info!("Player '{}' removed from registry", session.name());
            }
        });
    }

    /// 停止并移除通道的会话；不存在时回复 WARN
    pub async fn end_play(&self, channel: &dyn MessageChannel) -> bool {
        match self.remove(channel.id()).await {
            Some(name) => {
                let _ = channel.send(WireMessage::info(format!("Player '{}' stopped", name)));
                true
            }
            None => {
                tracing::warn!("END_PLAY on channel {} without an active session", channel.id());
                let _ = channel.send(WireMessage::warn("No active player on this connection"));
                false
            }
        }
    }

    /// 通道关闭：停止并移除会话，不回复
    pub async fn channel_closed(&self, channel_id: &str) {
        if let Some(name) = self.remove(channel_id).await {
            tracing::info!("Channel {} closed, player '{}' stopped", channel_id, name);
        }
    }

    async fn remove(&self, channel_id: &str) -> Option<String> {
        let session = self.sessions.write().await.remove(channel_id)?;
        session.stop();
        Some(session.name().to_string())
    }

    /// 分发一条入站文本消息
    pub async fn handle_text(&self, channel: &Arc<dyn MessageChannel>, text: &str) {
        let (kind, message) = match WireMessage::decode(text) {
            Ok(decoded) => decoded,
            Err(e) => {
                tracing::error!("Malformed message on channel {}: {}", channel.id(), e);
                let _ = channel.send(WireMessage::error(e.to_string()));
                return;
            }
        };

        match message {
            WireMessage::ScreenshotResponse { command_id, data, .. } => {
                let session = self.session(channel.id()).await;
                match session {
                    Some(session) => {
                        if !session.resolve_screenshot(&command_id, data) {
                            let err = PlayerError::UnknownCorrelation(command_id);
                            let _ = channel.send(WireMessage::warn(err.to_string()));
                        }
                    }
                    None => {
                        tracing::warn!(
                            "Screenshot {} on channel {} without an active session",
                            command_id,
                            channel.id()
                        );
                        let _ = channel.send(WireMessage::warn(format!(
                            "No active player for screenshot {}",
                            command_id
                        )));
                    }
                }
            }
            WireMessage::BeginPlay => {
                if let Err(e) = self.begin_play(channel).await {
                    if !matches!(e, PlayerError::SessionAlreadyActive(_)) {
                        tracing::error!("BEGIN_PLAY on channel {} failed: {}", channel.id(), e);
                    }
                }
            }
            WireMessage::EndPlay => {
                self.end_play(channel.as_ref()).await;
            }
            WireMessage::Info { .. } | WireMessage::Warn { .. } | WireMessage::Error { .. } => {
                if let Some((level, text)) = message.as_notice() {
                    match level {
                        NoticeLevel::Info => tracing::info!("[{}] {}", channel.id(), text),
                        NoticeLevel::Warn => tracing::warn!("[{}] {}", channel.id(), text),
                        NoticeLevel::Error => tracing::error!("[{}] {}", channel.id(), text),
                    }
                }
            }
            WireMessage::Unknown => {
                tracing::warn!("Unknown message type '{}' on channel {}", kind, channel.id());
                let _ = channel.send(WireMessage::warn(format!("Unknown message type: {}", kind)));
            }
            WireMessage::RequestScreenshot { .. } | WireMessage::Action { .. } | WireMessage::PlayerInit { .. } => {
                tracing::warn!("Unexpected message '{}' on channel {}", kind, channel.id());
                let _ = channel.send(WireMessage::warn(format!("Unexpected message type: {}", kind)));
            }
        }
    }

    pub async fn session(&self, channel_id: &str) -> Option<Arc<PlayerSession>> {
        self.sessions.read().await.get(channel_id).cloned()
    }

    /// 未停止的会话数
    pub async fn active_count(&self) -> usize {
        self.sessions
            .read()
            .await
            .values()
            .filter(|s| !s.is_stopped())
            .count()
    }

    /// 停止并移除所有会话（关闭时调用），返回数量
    pub async fn stop_all(&self) -> usize {
        let drained: Vec<_> = self.sessions.write().await.drain().collect();
        for (_, session) in &drained {
            session.stop();
        }
        if !drained.is_empty() {
            tracing::info!("Stopped {} player sessions", drained.len());
        }
        drained.len()
    }
}
