//! 玩家会话错误类型与恢复动作
//!
//! 与 RecoveryPolicy 配合：根据 PlayerError 决定 SkipCycle / RetryNow / Cooldown / Stop。

use std::time::Duration;

use thiserror::Error;

/// 关联请求 ID（嵌入 REQUEST_SCREENSHOT 与 SCREENSHOT_RESPONSE 的 commandId）
pub type CommandId = String;

/// 会话运行过程中可能出现的错误（超时、取消、决策失败、通道断开等）
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlayerError {
    /// 关联请求在截止时间前没有收到回复
    #[error("Command {id} timed out after {elapsed:?}")]
    Timeout { id: CommandId, elapsed: Duration },

    /// 会话停止（或单个请求被撤销）时仍在等待的请求
    #[error("Command {id} was cancelled")]
    Cancelled { id: CommandId },

    /// 回复引用了不存在的 commandId（过期、重复或来自别处）
    #[error("No pending command for id {0}")]
    UnknownCorrelation(CommandId),

    /// 决策端失败或返回了非法按键
    #[error("Decision oracle failed: {0}")]
    OracleFailure(String),

    /// 向已关闭/断开的通道发送消息
    #[error("Channel unavailable: {0}")]
    ChannelUnavailable(String),

    /// 在已停止的会话上发起请求或重新启动（调用方违反约定）
    #[error("Session {0} is stopped")]
    SessionStopped(String),

    /// 同一通道上已有活跃会话
    #[error("Channel {0} already has an active session")]
    SessionAlreadyActive(String),

    /// 入站消息无法解析
    #[error("Malformed message: {0}")]
    Decode(String),

    /// 模拟器设备（显示端）操作失败
    #[error("Device error: {0}")]
    Device(String),

    #[error("Config error: {0}")]
    Config(String),
}

impl PlayerError {
    /// 是否属于会话停止引起的错误（不视为用户可见错误）
    pub fn is_cancellation(&self) -> bool {
        matches!(self, PlayerError::Cancelled { .. } | PlayerError::SessionStopped(_))
    }
}

/// 恢复策略根据错误类型给出的建议动作
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryAction {
    /// 放弃本轮，按正常间隔进入下一轮
    SkipCycle,
    /// 立即开始下一轮（不等待间隔）
    RetryNow,
    /// 连续失败过多，暂停一段时间后再继续
    Cooldown(Duration),
    /// 结束循环（通道已不可用或会话已停止）
    Stop,
}
