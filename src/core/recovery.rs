//! 失败恢复策略
//!
//! 根据 PlayerError 与连续失败次数返回 RecoveryAction，供会话循环决定跳过、立即重试、冷却还是结束。

use std::time::Duration;

use serde::Deserialize;

use crate::core::{PlayerError, RecoveryAction};

/// 截图超时后的处理方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeoutPolicy {
    /// 放弃本轮，等待正常间隔
    #[default]
    Skip,
    /// 立即发起下一轮
    Retry,
}

/// 连续失败计数 + 冷却的恢复策略
#[derive(Debug, Clone)]
pub struct RecoveryPolicy {
    pub on_timeout: TimeoutPolicy,
    /// 连续降级轮次达到该值时进入冷却（0 表示从不冷却）
    pub max_consecutive_failures: u32,
    pub cooldown: Duration,
}

impl Default for RecoveryPolicy {
    fn default() -> Self {
        Self {
            on_timeout: TimeoutPolicy::Skip,
            max_consecutive_failures: 5,
            cooldown: Duration::from_secs(5),
        }
    }
}

impl RecoveryPolicy {
    /// consecutive：包含本次在内的连续失败次数
    pub fn handle(&self, err: &PlayerError, consecutive: u32) -> RecoveryAction {
        match err {
            PlayerError::ChannelUnavailable(_) => return RecoveryAction::Stop,
            e if e.is_cancellation() => return RecoveryAction::Stop,
            _ => {}
        }

        if self.max_consecutive_failures > 0 && consecutive >= self.max_consecutive_failures {
            return RecoveryAction::Cooldown(self.cooldown);
        }

        match err {
            PlayerError::Timeout { .. } => match self.on_timeout {
                TimeoutPolicy::Skip => RecoveryAction::SkipCycle,
                TimeoutPolicy::Retry => RecoveryAction::RetryNow,
            },
            _ => RecoveryAction::SkipCycle,
        }
    }

    /// 决策端被默认按键替代的轮次：动作已发出，只检查是否需要冷却
    pub fn handle_degraded(&self, consecutive: u32) -> Option<RecoveryAction> {
        (self.max_consecutive_failures > 0 && consecutive >= self.max_consecutive_failures)
            .then_some(RecoveryAction::Cooldown(self.cooldown))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timeout_err() -> PlayerError {
        PlayerError::Timeout {
            id: "c1".to_string(),
            elapsed: Duration::from_millis(200),
        }
    }

    #[test]
    fn test_recovery_timeout_skip() {
        let policy = RecoveryPolicy::default();
        assert_eq!(policy.handle(&timeout_err(), 1), RecoveryAction::SkipCycle);
    }

    #[test]
    fn test_recovery_timeout_retry() {
        let policy = RecoveryPolicy {
            on_timeout: TimeoutPolicy::Retry,
            ..Default::default()
        };
        assert_eq!(policy.handle(&timeout_err(), 2), RecoveryAction::RetryNow);
    }

    #[test]
    fn test_recovery_cooldown_after_limit() {
        let policy = RecoveryPolicy {
            on_timeout: TimeoutPolicy::Retry,
            max_consecutive_failures: 3,
            cooldown: Duration::from_secs(2),
        };
        assert_eq!(
            policy.handle(&timeout_err(), 3),
            RecoveryAction::Cooldown(Duration::from_secs(2))
        );
        assert_eq!(
            policy.handle_degraded(3),
            Some(RecoveryAction::Cooldown(Duration::from_secs(2)))
        );
        assert_eq!(policy.handle_degraded(2), None);
    }

    #[test]
    fn test_recovery_zero_limit_never_cools_down() {
        let policy = RecoveryPolicy {
            max_consecutive_failures: 0,
            ..Default::default()
        };
        assert_eq!(policy.handle(&timeout_err(), 100), RecoveryAction::SkipCycle);
        assert_eq!(policy.handle_degraded(100), None);
    }

    #[test]
    fn test_recovery_channel_unavailable_stops() {
        let policy = RecoveryPolicy::default();
        let err = PlayerError::ChannelUnavailable("closed".to_string());
        assert_eq!(policy.handle(&err, 1), RecoveryAction::Stop);
    }

    #[test]
    fn test_recovery_cancelled_stops() {
        let policy = RecoveryPolicy::default();
        let err = PlayerError::Cancelled { id: "c1".to_string() };
        assert_eq!(policy.handle(&err, 1), RecoveryAction::Stop);
        let err = PlayerError::SessionStopped("p1".to_string());
        assert_eq!(policy.handle(&err, 1), RecoveryAction::Stop);
    }
}
