//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `EMU_PILOT__*` 覆盖（双下划线表示嵌套，如 `EMU_PILOT__PLAYER__CYCLE_INTERVAL_MS=500`）。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::core::{PlayerError, RecoveryPolicy, TimeoutPolicy};
use crate::player::Button;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub gateway: GatewaySection,
    pub player: PlayerSection,
    pub llm: LlmSection,
    pub display: DisplaySection,
}

/// [app] 段
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppSection {
    pub name: Option<String>,
}

/// [gateway] 段：控制端中枢监听地址与连接上限
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GatewaySection {
    pub bind_addr: String,
    /// 超出时新连接收到 ERROR 后被关闭
    pub max_connections: usize,
}

impl Default for GatewaySection {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9000".to_string(),
            max_connections: 64,
        }
    }
}

/// 决策端实现
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OracleKind {
    /// 视觉 LLM 描述画面并选键
    #[default]
    Llm,
    /// 固定轮换按键（无需 API）
    Scripted,
}

/// [player] 段：循环节奏、超时与失败策略
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PlayerSection {
    pub screenshot_timeout_ms: u64,
    /// 两轮之间的间隔；0 表示完成后立即进入下一轮
    pub cycle_interval_ms: u64,
    pub press_duration_ms: u64,
    pub player_index: u8,
    /// 决策失败或非法输出时使用的按键
    pub default_button: String,
    pub on_timeout: TimeoutPolicy,
    pub max_consecutive_failures: u32,
    pub failure_cooldown_ms: u64,
    /// 会话名前缀，实际名为 `<prefix>-<n>`
    pub name_prefix: String,
    pub oracle: OracleKind,
}

impl Default for PlayerSection {
    fn default() -> Self {
        Self {
            screenshot_timeout_ms: 20_000,
            cycle_interval_ms: 1_000,
            press_duration_ms: 100,
            player_index: 0,
            default_button: "START".to_string(),
            on_timeout: TimeoutPolicy::Skip,
            max_consecutive_failures: 5,
            failure_cooldown_ms: 5_000,
            name_prefix: "player".to_string(),
            oracle: OracleKind::Llm,
        }
    }
}

/// [llm] 段：后端选择与超时
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// openai / mock
    pub provider: String,
    /// 需支持图片输入
    pub model: String,
    pub base_url: Option<String>,
    pub timeouts: LlmTimeoutsSection,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4o-mini".to_string(),
            base_url: None,
            timeouts: LlmTimeoutsSection::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmTimeoutsSection {
    /// 单次决策调用超时（秒）
    #[serde(default = "default_request_timeout")]
    pub request: u64,
}

impl Default for LlmTimeoutsSection {
    fn default() -> Self {
        Self {
            request: default_request_timeout(),
        }
    }
}

fn default_request_timeout() -> u64 {
    60
}

/// [display] 段：显示端客户端
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DisplaySection {
    pub hub_url: String,
    /// 作为截图返回的图片文件，未设置时返回内置 1x1 PNG
    pub screenshot_path: Option<PathBuf>,
}

impl Default for DisplaySection {
    fn default() -> Self {
        Self {
            hub_url: "ws://127.0.0.1:9000".to_string(),
            screenshot_path: None,
        }
    }
}

/// 会话运行参数（由 [player] 段解析而来，按键名已校验）
#[derive(Debug, Clone)]
pub struct PlayerPolicy {
    pub screenshot_timeout: Duration,
    pub cycle_interval: Duration,
    pub press_duration_ms: u64,
    pub player_index: u8,
    pub default_button: Button,
    /// 每次决策调用的上限
    pub oracle_timeout: Duration,
    pub recovery: RecoveryPolicy,
}

impl Default for PlayerPolicy {
    fn default() -> Self {
        Self {
            screenshot_timeout: Duration::from_millis(20_000),
            cycle_interval: Duration::from_millis(1_000),
            press_duration_ms: 100,
            player_index: 0,
            default_button: Button::Start,
            oracle_timeout: Duration::from_secs(default_request_timeout()),
            recovery: RecoveryPolicy::default(),
        }
    }
}

impl PlayerPolicy {
    pub fn from_config(cfg: &AppConfig) -> Result<Self, PlayerError> {
        let p = &cfg.player;
        let default_button = p
            .default_button
            .parse::<Button>()
            .map_err(|e| PlayerError::Config(format!("player.default_button: {}", e)))?;
        if p.screenshot_timeout_ms == 0 {
            return Err(PlayerError::Config(
                "player.screenshot_timeout_ms must be greater than 0".to_string(),
            ));
        }
        Ok(Self {
            screenshot_timeout: Duration::from_millis(p.screenshot_timeout_ms),
            cycle_interval: Duration::from_millis(p.cycle_interval_ms),
            press_duration_ms: p.press_duration_ms,
            player_index: p.player_index,
            default_button,
            oracle_timeout: Duration::from_secs(cfg.llm.timeouts.request.max(1)),
            recovery: RecoveryPolicy {
                on_timeout: p.on_timeout,
                max_consecutive_failures: p.max_consecutive_failures,
                cooldown: Duration::from_millis(p.failure_cooldown_ms),
            },
        })
    }
}

/// 从 config 目录加载配置，环境变量 EMU_PILOT__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 EMU_PILOT__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("EMU_PILOT")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
