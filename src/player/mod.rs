//! 玩家：动作、决策端与会话编排

pub mod action;
pub mod oracle;
pub mod session;

use std::sync::Arc;

pub use action::{Action, Button, InvalidButton, PressButton};
pub use oracle::{validate_choice, DecisionOracle, LlmOracle, ScriptedOracle};
pub use session::{PlayerSession, SessionState};

use crate::config::{AppConfig, OracleKind};

/// 根据 [player].oracle 选择决策端
pub fn create_oracle_from_config(cfg: &AppConfig) -> Arc<dyn DecisionOracle> {
    match cfg.player.oracle {
        OracleKind::Llm => Arc::new(LlmOracle::new(crate::llm::create_llm_from_config(cfg))),
        OracleKind::Scripted => {
            tracing::info!("Using scripted oracle");
            Arc::new(ScriptedOracle::default())
        }
    }
}
