//! 可观测性：tracing 订阅器初始化
//!
//! 默认只输出本 crate 的 info 日志，可用 RUST_LOG 覆盖（如 `RUST_LOG=emu_pilot=debug`）。

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const DEFAULT_FILTER: &str = "emu_pilot=info";

pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    // 测试或重复调用时订阅器可能已安装
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .try_init();
}
