//! 网关：通道、消息协议、会话注册表与 WebSocket 中枢
//!
//! ## 数据流
//!
//! - 显示端连接 Hub 后发送 `BEGIN_PLAY`，注册表为该连接创建玩家会话并回复 `PLAYER_INIT`
//! - 会话循环发出 `REQUEST_SCREENSHOT`，显示端以同一 commandId 回复 `SCREENSHOT_RESPONSE`
//! - 会话根据决策端结果发出 `ACTION`（按键 / 描述 / 状态）
//! - `END_PLAY` 或连接断开时停止会话

mod channel;
mod hub;
mod message;
mod registry;

pub use channel::{ChannelId, MessageChannel, QueuedChannel};
pub use hub::{Hub, HubConfig};
pub use message::{NoticeLevel, WireMessage};
pub use registry::SessionRegistry;
