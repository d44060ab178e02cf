//! emu-pilot - 远程 AI 玩家控制模拟器
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 命令关联器、错误类型、恢复策略、优雅关闭
//! - **display**: 显示端（模拟器设备边界、按键映射、指令执行）
//! - **gateway**: 通道抽象、消息协议、会话注册表、WebSocket 中枢
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / Mock）
//! - **observability**: tracing 日志初始化
//! - **player**: 动作与按键、决策端、玩家会话编排

pub mod config;
pub mod core;
pub mod display;
pub mod gateway;
pub mod llm;
pub mod observability;
pub mod player;
