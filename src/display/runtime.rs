//! 显示端运行时：执行控制端发来的指令
//!
//! - `REQUEST_SCREENSHOT` → 截图并以同一 commandId 回复 `SCREENSHOT_RESPONSE`；截图失败回复 ERROR
//! - `PRESS_BUTTON` → 按下，保持 durationMs 后松开
//! - 描述、状态与通知只记录日志
//! - 不认识的消息或动作类型回复 WARN

use std::sync::Arc;
use std::time::Duration;

use super::device::{key_code, EmulatorDevice};
use crate::core::PlayerError;
use crate::gateway::{MessageChannel, NoticeLevel, WireMessage};
use crate::player::{Action, PressButton};

pub struct DisplayRuntime {
    device: Arc<dyn EmulatorDevice>,
    channel: Arc<dyn MessageChannel>,
}

impl DisplayRuntime {
    pub fn new(device: Arc<dyn EmulatorDevice>, channel: Arc<dyn MessageChannel>) -> Self {
        Self { device, channel }
    }

    pub fn begin_play(&self) -> Result<(), PlayerError> {
        self.channel.send(WireMessage::BeginPlay)
    }

    pub fn end_play(&self) -> Result<(), PlayerError> {
        self.channel.send(WireMessage::EndPlay)
    }

    /// 处理一条入站文本；无法解析时只记录错误
    pub async fn handle_text(&self, text: &str) -> Result<(), PlayerError> {
        match WireMessage::decode(text) {
            Ok((kind, WireMessage::Unknown)) => {
                tracing::warn!("Ignoring unknown message type '{}'", kind);
                self.channel
                    .send(WireMessage::warn(format!("Unknown message type: {}", kind)))
            }
            Ok((_, message)) => self.handle(message).await,
            Err(e) => {
                tracing::error!("Malformed message from hub: {}", e);
                Ok(())
            }
        }
    }

    /// 返回 Err 仅当通道已不可用
    pub async fn handle(&self, message: WireMessage) -> Result<(), PlayerError> {
        match message {
            WireMessage::RequestScreenshot { command_id } => {
                self.answer_screenshot(command_id).await
            }
            WireMessage::Action { action } => match action {
                Action::PressButton(press) => {
                    if let Err(e) = self.press(&press) {
                        tracing::error!("Failed to press {}: {}", press.button, e);
                    }
                    Ok(())
                }
                Action::Describe { description } => {
                    tracing::info!("AI description: {}", description);
                    Ok(())
                }
                Action::StatusUpdate { status } => {
                    tracing::info!("AI status: {}", status);
                    Ok(())
                }
                Action::Unknown => {
                    tracing::warn!("Ignoring unknown action type");
                    self.channel.send(WireMessage::warn("Unknown action type"))
                }
            },
            WireMessage::PlayerInit {
                player_name,
                message,
            } => {
                tracing::info!("Player '{}' initialized: {}", player_name, message);
                Ok(())
            }
            other => {
                if let Some((level, text)) = other.as_notice() {
                    match level {
                        NoticeLevel::Info => tracing::info!("Hub: {}", text),
                        NoticeLevel::Warn => tracing::warn!("Hub: {}", text),
                        NoticeLevel::Error => tracing::error!("Hub: {}", text),
                    }
                } else {
                    tracing::debug!("Ignoring {:?}", other);
                }
                Ok(())
            }
        }
    }

    async fn answer_screenshot(&self, command_id: String) -> Result<(), PlayerError> {
        match self.device.capture_screenshot().await {
            Ok(data) => self.channel.send(WireMessage::ScreenshotResponse {
                command_id,
                data,
                timestamp: Some(chrono::Utc::now().timestamp_millis()),
            }),
            Err(e) => {
                tracing::error!("Screenshot {} failed: {}", command_id, e);
                self.channel.send(WireMessage::error(format!(
                    "Screenshot {} failed: {}",
                    command_id, e
                )))
            }
        }
    }

    /// 按下后由后台任务在 durationMs 后松开（0 表示立即松开）
    fn press(&self, press: &PressButton) -> Result<(), PlayerError> {
        let code = key_code(press.button);
        let player = press.player;
        self.device.simulate_input(player, code, true)?;

        if press.duration_ms == 0 {
            return self.device.simulate_input(player, code, false);
        }

        let device = Arc::clone(&self.device);
        let hold = Duration::from_millis(press.duration_ms);
        let button = press.button;
        tokio::spawn(async move {
            tokio::time::sleep(hold).await;
            if let Err(e) = device.simulate_input(player, code, false) {
                tracing::error!("Failed to release {}: {}", button, e);
            }
        });
        Ok(())
    }
}
