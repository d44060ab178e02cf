//! 玩家会话编排器
//!
//! 一个会话绑定一条通道，状态机 `Idle -> Active -> Stopped`（Stopped 为终态）。
//! Active 时后台任务逐轮执行：请求截图 → 描述画面 → 选择按键 → 发出按键，轮与轮之间按配置间隔等待。
//! 每个挂起点（等截图、等决策端、轮间等待）都与会话的 CancellationToken 竞争，stop 后不再发出任何消息。

use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::action::{Action, Button};
use super::oracle::{validate_choice, DecisionOracle};
use crate::config::PlayerPolicy;
use crate::core::{CommandCorrelator, PlayerError, RecoveryAction};
use crate::gateway::{MessageChannel, NoticeLevel, WireMessage};

const STATUS_DESCRIBING: &str = "Describing scene...";
const STATUS_DECIDING: &str = "Deciding next move...";

/// 会话状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Active,
    Stopped,
}

/// 单轮结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CycleOutcome {
    /// 决策端给出了合法按键
    Completed,
    /// 决策端失败或输出非法，已用默认按键代替
    Degraded,
}

/// 下一轮开始前的等待方式
enum NextCycle {
    AfterInterval,
    Immediately,
    AfterCooldown(Duration),
}

/// 玩家会话
pub struct PlayerSession {
    name: String,
    /// 不持有通道：通道随连接关闭而释放，之后的发送得到 ChannelUnavailable
    channel: Weak<dyn MessageChannel>,
    correlator: CommandCorrelator<String>,
    oracle: Arc<dyn DecisionOracle>,
    policy: PlayerPolicy,
    state: watch::Sender<SessionState>,
    cancel: CancellationToken,
}

impl PlayerSession {
    pub fn new(
        name: impl Into<String>,
        channel: &Arc<dyn MessageChannel>,
        oracle: Arc<dyn DecisionOracle>,
        policy: PlayerPolicy,
    ) -> Arc<Self> {
        let name = name.into();
        let (state, _) = watch::channel(SessionState::Idle);
        Arc::new(Self {
            correlator: CommandCorrelator::new(&name),
            name,
            channel: Arc::downgrade(channel),
            oracle,
            policy,
            state,
            cancel: CancellationToken::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn is_stopped(&self) -> bool {
        self.state() == SessionState::Stopped
    }

    /// 等待中的截图请求数
    pub fn pending_count(&self) -> usize {
        self.correlator.pending_count()
    }

    /// Idle → Active 并启动循环；已 Active 时为空操作，已 Stopped 时返回 SessionStopped
    pub fn start(self: &Arc<Self>) -> Result<(), PlayerError> {
        let mut previous = SessionState::Idle;
        self.state.send_if_modified(|state| {
            previous = *state;
            if *state == SessionState::Idle {
                *state = SessionState::Active;
                true
            } else {
                false
            }
        });

        match previous {
            SessionState::Idle => {
                tracing::info!("Player '{}' started playing", self.name);
                tokio::spawn(Arc::clone(self).run());
                Ok(())
            }
            SessionState::Active => {
                tracing::warn!("Player '{}' is already playing", self.name);
                Ok(())
            }
            SessionState::Stopped => Err(PlayerError::SessionStopped(self.name.clone())),
        }
    }

    /// 任意状态 → Stopped：取消当前等待并以 Cancelled 失败所有待处理请求（幂等）
    pub fn stop(&self) {
        let changed = self.state.send_if_modified(|state| {
            if *state != SessionState::Stopped {
                *state = SessionState::Stopped;
                true
            } else {
                false
            }
        });
        self.cancel.cancel();
        let cancelled = self.correlator.close();
        if changed {
            tracing::info!(
                "Player '{}' stopped playing ({} pending requests cancelled)",
                self.name,
                cancelled
            );
        }
    }

    /// 等待会话进入 Stopped（显式 stop 或循环因通道不可用而结束）
    pub async fn stopped(&self) {
        let mut rx = self.state.subscribe();
        let _ = rx.wait_for(|state| *state == SessionState::Stopped).await;
    }

    /// 入站截图回复：交给关联器；未知或过期的 id 只记录警告
    pub fn resolve_screenshot(&self, command_id: &str, data: String) -> bool {
        self.correlator.resolve(command_id, data)
    }

    /// 关联请求：发出 REQUEST_SCREENSHOT 并等待同 id 的回复（受超时与 stop 约束）
    pub async fn request_screenshot(&self) -> Result<String, PlayerError> {
        let (command_id, response) = self.correlator.issue(self.policy.screenshot_timeout)?;
        if let Err(e) = self.send(WireMessage::RequestScreenshot {
            command_id: command_id.clone(),
        }) {
            self.correlator.cancel(&command_id);
            return Err(e);
        }

        tokio::select! {
            _ = self.cancel.cancelled() => Err(PlayerError::SessionStopped(self.name.clone())),
            result = response => result,
        }
    }

    /// 只发不等的动作
    pub fn emit(&self, action: Action) -> Result<(), PlayerError> {
        self.send(WireMessage::action(action))
    }

    /// 诊断通知：发送失败只记录日志，不影响循环
    fn notify(&self, level: NoticeLevel, text: impl Into<String>) {
        if let Err(e) = self.send(WireMessage::notice(level, text)) {
            tracing::debug!("Player '{}': notice dropped: {}", self.name, e);
        }
    }

    fn send(&self, message: WireMessage) -> Result<(), PlayerError> {
        if self.cancel.is_cancelled() {
            return Err(PlayerError::SessionStopped(self.name.clone()));
        }
        let channel = self.channel.upgrade().ok_or_else(|| {
            PlayerError::ChannelUnavailable(format!("channel of '{}' was dropped", self.name))
        })?;
        channel.send(message)
    }

    async fn run(self: Arc<Self>) {
        let recovery = self.policy.recovery.clone();
        let mut consecutive_failures: u32 = 0;
        let mut cycle: u64 = 0;

        while !self.cancel.is_cancelled() {
            cycle += 1;
            tracing::debug!("Player '{}': cycle {} starting", self.name, cycle);

            let next = match self.run_cycle().await {
                Ok(CycleOutcome::Completed) => {
                    consecutive_failures = 0;
                    NextCycle::AfterInterval
                }
                Ok(CycleOutcome::Degraded) => {
                    consecutive_failures += 1;
                    match recovery.handle_degraded(consecutive_failures) {
                        Some(RecoveryAction::Cooldown(d)) => NextCycle::AfterCooldown(d),
                        _ => NextCycle::AfterInterval,
                    }
                }
                Err(e) => {
                    if !e.is_cancellation() {
                        consecutive_failures += 1;
                        tracing::warn!("Player '{}': cycle {} failed: {}", self.name, cycle, e);
                    }
                    match recovery.handle(&e, consecutive_failures) {
                        RecoveryAction::Stop => {
                            if !e.is_cancellation() {
                                tracing::error!("Player '{}': loop ending: {}", self.name, e);
                            }
                            break;
                        }
                        RecoveryAction::SkipCycle => NextCycle::AfterInterval,
                        RecoveryAction::RetryNow => NextCycle::Immediately,
                        RecoveryAction::Cooldown(d) => NextCycle::AfterCooldown(d),
                    }
                }
            };

            let keep_going = match next {
                NextCycle::AfterInterval => self.pause(self.policy.cycle_interval).await,
                NextCycle::Immediately => self.pause(Duration::ZERO).await,
                NextCycle::AfterCooldown(d) => {
                    tracing::warn!(
                        "Player '{}': {} consecutive degraded cycles, cooling down for {:?}",
                        self.name,
                        consecutive_failures,
                        d
                    );
                    self.notify(
                        NoticeLevel::Warn,
                        format!(
                            "{}: {} consecutive degraded cycles, pausing for {} ms",
                            self.name,
                            consecutive_failures,
                            d.as_millis()
                        ),
                    );
                    consecutive_failures = 0;
                    self.pause(d).await
                }
            };
            if !keep_going {
                break;
            }
        }

        // 循环自行结束（通道不可用）时也要进入终态，注册表据此移除会话
        self.stop();
    }

    async fn run_cycle(&self) -> Result<CycleOutcome, PlayerError> {
        let screenshot = self.request_screenshot().await?;
        tracing::debug!(
            "Player '{}': received screenshot ({} bytes)",
            self.name,
            screenshot.len()
        );

        let default = self.policy.default_button;
        self.emit(Action::status(STATUS_DESCRIBING))?;
        let description = match self.consult("describe", self.oracle.describe(&screenshot)).await {
            Ok(text) => Some(text),
            Err(e) if e.is_cancellation() => return Err(e),
            Err(e) => {
                tracing::warn!("Player '{}': {}, defaulting to {}", self.name, e, default);
                None
            }
        };

        let (button, degraded) = match description {
            Some(description) => {
                tracing::info!("Player '{}': scene: {}", self.name, description);
                self.emit(Action::describe(description.as_str()))?;
                self.emit(Action::status(STATUS_DECIDING))?;
                match self
                    .consult("choose_button", self.oracle.choose_button(&description))
                    .await
                {
                    Ok(raw) => validate_choice(&raw, default),
                    Err(e) if e.is_cancellation() => return Err(e),
                    Err(e) => {
                        tracing::warn!("Player '{}': {}, defaulting to {}", self.name, e, default);
                        (default, true)
                    }
                }
            }
            None => (default, true),
        };

        self.press(button)?;
        Ok(if degraded {
            CycleOutcome::Degraded
        } else {
            CycleOutcome::Completed
        })
    }

    fn press(&self, button: Button) -> Result<(), PlayerError> {
        tracing::info!("Player '{}': pressing {}", self.name, button);
        self.emit(Action::press(
            button,
            self.policy.player_index,
            self.policy.press_duration_ms,
        ))
    }

    /// 调用决策端：受 oracle_timeout 限制，并随 stop 立即返回
    async fn consult<F, T>(&self, step: &str, call: F) -> Result<T, PlayerError>
    where
        F: std::future::Future<Output = Result<T, PlayerError>>,
    {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(PlayerError::SessionStopped(self.name.clone())),
            result = tokio::time::timeout(self.policy.oracle_timeout, call) => match result {
                Ok(inner) => inner,
                Err(_) => Err(PlayerError::OracleFailure(format!(
                    "{} timed out after {:?}",
                    step, self.policy.oracle_timeout
                ))),
            },
        }
    }

    /// 轮间等待；返回 false 表示期间被 stop。间隔为 0 时让出调度器一次。
    async fn pause(&self, duration: Duration) -> bool {
        if duration.is_zero() {
            tokio::task::yield_now().await;
            return !self.cancel.is_cancelled();
        }
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{RecoveryPolicy, TimeoutPolicy};
    use crate::player::ScriptedOracle;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingChannel {
        sent: Mutex<Vec<WireMessage>>,
    }

    impl RecordingChannel {
        fn messages(&self) -> Vec<WireMessage> {
            self.sent.lock().unwrap().clone()
        }

        fn screenshot_requests(&self) -> Vec<String> {
            self.messages()
                .into_iter()
                .filter_map(|m| match m {
                    WireMessage::RequestScreenshot { command_id } => Some(command_id),
                    _ => None,
                })
                .collect()
        }

        fn presses(&self) -> Vec<Button> {
            self.messages()
                .into_iter()
                .filter_map(|m| match m {
                    WireMessage::Action {
                        action: Action::PressButton(p),
                    } => Some(p.button),
                    _ => None,
                })
                .collect()
        }

        fn warnings(&self) -> usize {
            self.messages()
                .iter()
                .filter(|m| matches!(m, WireMessage::Warn { .. }))
                .count()
        }
    }

    impl MessageChannel for RecordingChannel {
        fn id(&self) -> &str {
            "test"
        }

        fn send(&self, message: WireMessage) -> Result<(), PlayerError> {
            self.sent.lock().unwrap().push(message);
            Ok(())
        }

        fn is_open(&self) -> bool {
            true
        }
    }

    /// 可配置的决策端：固定回复或永不返回
    struct FixedOracle {
        choice: Result<String, PlayerError>,
        hang: bool,
    }

    #[async_trait]
    impl DecisionOracle for FixedOracle {
        async fn describe(&self, _screenshot: &str) -> Result<String, PlayerError> {
            if self.hang {
                std::future::pending::<()>().await;
            }
            Ok("a castle courtyard".to_string())
        }

        async fn choose_button(&self, _description: &str) -> Result<String, PlayerError> {
            self.choice.clone()
        }
    }

    fn policy() -> PlayerPolicy {
        PlayerPolicy {
            screenshot_timeout: Duration::from_millis(1_000),
            cycle_interval: Duration::from_millis(1_000),
            oracle_timeout: Duration::from_secs(10),
            ..PlayerPolicy::default()
        }
    }

    fn session_with(
        oracle: Arc<dyn DecisionOracle>,
        policy: PlayerPolicy,
    ) -> (Arc<PlayerSession>, Arc<RecordingChannel>, Arc<dyn MessageChannel>) {
        let recording = Arc::new(RecordingChannel::default());
        let channel: Arc<dyn MessageChannel> = recording.clone();
        let session = PlayerSession::new("player-1", &channel, oracle, policy);
        (session, recording, channel)
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_cycle_emits_status_description_and_press() {
        let oracle = Arc::new(ScriptedOracle::new(vec![Button::DpadLeft]));
        let (session, recording, _channel) = session_with(oracle, policy());

        session.start().unwrap();
        assert_eq!(session.state(), SessionState::Active);
        settle().await;

        let ids = recording.screenshot_requests();
        assert_eq!(ids.len(), 1);
        assert_eq!(session.pending_count(), 1);
        assert!(session.resolve_screenshot(&ids[0], "data:image/jpeg;base64,AAAA".to_string()));
        settle().await;

        let messages = recording.messages();
        assert_eq!(messages.len(), 5);
        assert_eq!(messages[1], WireMessage::action(Action::status(STATUS_DESCRIBING)));
        assert!(matches!(
            &messages[2],
            WireMessage::Action { action: Action::Describe { .. } }
        ));
        assert_eq!(messages[3], WireMessage::action(Action::status(STATUS_DECIDING)));
        assert_eq!(messages[4], WireMessage::action(Action::press(Button::DpadLeft, 0, 100)));
        assert_eq!(session.pending_count(), 0);

        // 下一轮在间隔之后
        tokio::time::sleep(Duration::from_millis(1_000)).await;
        assert_eq!(recording.screenshot_requests().len(), 2);
        session.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_oracle_button_falls_back_to_default() {
        let oracle = Arc::new(FixedOracle {
            choice: Ok("JUMP_HIGH".to_string()),
            hang: false,
        });
        let (session, recording, _channel) = session_with(oracle, policy());
        session.start().unwrap();
        settle().await;
        let id = recording.screenshot_requests()[0].clone();
        session.resolve_screenshot(&id, "AAAA".to_string());
        settle().await;

        assert_eq!(recording.presses(), vec![Button::Start]);
        session.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_oracle_failure_and_timeout_use_default_button() {
        let failing = Arc::new(FixedOracle {
            choice: Err(PlayerError::OracleFailure("rate limited".to_string())),
            hang: false,
        });
        let (session, recording, _channel) = session_with(failing, policy());
        session.start().unwrap();
        settle().await;
        let id = recording.screenshot_requests()[0].clone();
        session.resolve_screenshot(&id, "AAAA".to_string());
        settle().await;
        assert_eq!(recording.presses(), vec![Button::Start]);
        session.stop();

        let hanging = Arc::new(FixedOracle {
            choice: Ok("A".to_string()),
            hang: true,
        });
        let (session, recording, _channel) = session_with(hanging, policy());
        session.start().unwrap();
        settle().await;
        let id = recording.screenshot_requests()[0].clone();
        session.resolve_screenshot(&id, "AAAA".to_string());
        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(recording.presses(), vec![Button::Start]);
        session.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_screenshot_timeout_skips_cycle_and_continues() {
        let oracle = Arc::new(ScriptedOracle::default());
        let mut p = policy();
        p.screenshot_timeout = Duration::from_millis(200);
        let (session, recording, _channel) = session_with(oracle, p);

        session.start().unwrap();
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(session.pending_count(), 0);
        assert_eq!(recording.screenshot_requests().len(), 1);
        assert_eq!(session.state(), SessionState::Active);

        // skip：等正常间隔后才发下一次
        tokio::time::sleep(Duration::from_millis(1_000)).await;
        assert_eq!(recording.screenshot_requests().len(), 2);
        assert!(recording.presses().is_empty());
        session.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_timeouts_trigger_cooldown() {
        let oracle = Arc::new(ScriptedOracle::default());
        let mut p = policy();
        p.screenshot_timeout = Duration::from_millis(100);
        p.recovery = RecoveryPolicy {
            on_timeout: TimeoutPolicy::Retry,
            max_consecutive_failures: 2,
            cooldown: Duration::from_secs(5),
        };
        let (session, recording, _channel) = session_with(oracle, p);

        session.start().unwrap();
        // retry：超时后立即重发，第二次超时后进入冷却
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(recording.screenshot_requests().len(), 2);
        assert_eq!(recording.warnings(), 1);

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(recording.screenshot_requests().len(), 2);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(recording.screenshot_requests().len(), 3);
        session.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_is_idempotent_and_clears_pending() {
        let oracle = Arc::new(ScriptedOracle::default());
        let (session, recording, _channel) = session_with(oracle, policy());

        session.start().unwrap();
        // 已 Active 时再次 start 不会启动第二个循环
        session.start().unwrap();
        settle().await;
        assert_eq!(session.pending_count(), 1);
        let id = recording.screenshot_requests()[0].clone();

        session.stop();
        session.stop();
        assert_eq!(session.state(), SessionState::Stopped);
        assert_eq!(session.pending_count(), 0);
        assert!(matches!(session.start(), Err(PlayerError::SessionStopped(_))));

        // 迟到的回复是无害的空操作
        assert!(!session.resolve_screenshot(&id, "AAAA".to_string()));

        let sent_before = recording.messages().len();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(recording.messages().len(), sent_before);
        assert!(matches!(
            session.request_screenshot().await,
            Err(PlayerError::SessionStopped(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_before_start() {
        let oracle = Arc::new(ScriptedOracle::default());
        let (session, recording, _channel) = session_with(oracle, policy());
        session.stop();
        assert_eq!(session.state(), SessionState::Stopped);
        assert!(session.start().is_err());
        settle().await;
        assert!(recording.messages().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_channel_ends_loop() {
        let oracle = Arc::new(ScriptedOracle::default());
        let (session, recording, channel) = session_with(oracle, policy());
        drop(channel);
        drop(recording);

        session.start().unwrap();
        tokio::time::timeout(Duration::from_secs(1), session.stopped())
            .await
            .unwrap();
        assert_eq!(session.state(), SessionState::Stopped);
        assert_eq!(session.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_interval_still_observes_stop() {
        let oracle = Arc::new(ScriptedOracle::default());
        let mut p = policy();
        p.cycle_interval = Duration::ZERO;
        let (session, recording, _channel) = session_with(oracle, p);

        session.start().unwrap();
        for _ in 0..3 {
            settle().await;
            let ids = recording.screenshot_requests();
            let last = ids.last().unwrap().clone();
            session.resolve_screenshot(&last, "AAAA".to_string());
        }
        settle().await;
        assert!(recording.presses().len() >= 3);

        session.stop();
        let sent = recording.messages().len();
        settle().await;
        assert_eq!(recording.messages().len(), sent);
    }
}
