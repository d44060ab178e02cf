//! 通道消息协议定义
//!
//! 每次写入一条 JSON 对象，以 `type` 字段区分。未知 `type` 解码为 Unknown，
//! 由注册表回复 WARN 后忽略，保证对新消息类型向前兼容。

use serde::{Deserialize, Serialize};

use crate::core::{CommandId, PlayerError};
use crate::player::Action;

/// 诊断通知级别
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Warn,
    Error,
}

/// 通道上的消息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WireMessage {
    /// 控制端 → 显示端：请求截一帧
    RequestScreenshot {
        #[serde(rename = "commandId")]
        command_id: CommandId,
    },

    /// 显示端 → 控制端：按 commandId 关联的截图
    ScreenshotResponse {
        #[serde(rename = "commandId")]
        command_id: CommandId,
        /// 图像数据（通常是 data URL）
        data: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<i64>,
    },

    /// 控制端 → 显示端：动作信封（按键 / 描述 / 状态）
    Action { action: Action },

    /// 为该通道创建并启动会话
    BeginPlay,

    /// 停止并移除该通道的会话
    EndPlay,

    /// 会话创建确认
    PlayerInit {
        #[serde(rename = "playerName")]
        player_name: String,
        message: String,
    },

    Info {
        payload: serde_json::Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<i64>,
    },

    Warn {
        payload: serde_json::Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<i64>,
    },

    Error {
        payload: serde_json::Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<i64>,
    },

    /// 无法识别的 type
    #[serde(other)]
    Unknown,
}

impl WireMessage {
    pub fn notice(level: NoticeLevel, text: impl Into<String>) -> Self {
        let payload = serde_json::Value::String(text.into());
        let timestamp = Some(chrono::Utc::now().timestamp_millis());
        match level {
            NoticeLevel::Info => WireMessage::Info { payload, timestamp },
            NoticeLevel::Warn => WireMessage::Warn { payload, timestamp },
            NoticeLevel::Error => WireMessage::Error { payload, timestamp },
        }
    }

    pub fn info(text: impl Into<String>) -> Self {
        Self::notice(NoticeLevel::Info, text)
    }

    pub fn warn(text: impl Into<String>) -> Self {
        Self::notice(NoticeLevel::Warn, text)
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self::notice(NoticeLevel::Error, text)
    }

    pub fn action(action: Action) -> Self {
        WireMessage::Action { action }
    }

    /// 通知消息的级别与文本（非通知返回 None）
    pub fn as_notice(&self) -> Option<(NoticeLevel, String)> {
        let (level, payload) = match self {
            WireMessage::Info { payload, .. } => (NoticeLevel::Info, payload),
            WireMessage::Warn { payload, .. } => (NoticeLevel::Warn, payload),
            WireMessage::Error { payload, .. } => (NoticeLevel::Error, payload),
            _ => return None,
        };
        let text = match payload {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        Some((level, text))
    }

    pub fn encode(&self) -> Result<String, PlayerError> {
        serde_json::to_string(self).map_err(|e| PlayerError::Decode(e.to_string()))
    }

    /// 解码一条入站文本，同时返回原始 type 字段（Unknown 时用于告警）
    pub fn decode(text: &str) -> Result<(String, WireMessage), PlayerError> {
        let value: serde_json::Value =
            serde_json::from_str(text).map_err(|e| PlayerError::Decode(e.to_string()))?;
        let kind = value
            .get("type")
            .and_then(|t| t.as_str())
            .ok_or_else(|| PlayerError::Decode("missing string field 'type'".to_string()))?
            .to_string();
        let message = serde_json::from_value(value)
            .map_err(|e| PlayerError::Decode(format!("{}: {}", kind, e)))?;
        Ok((kind, message))
    }
}
