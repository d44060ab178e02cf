//! 核心层：错误与恢复、命令关联、优雅关闭

pub mod correlator;
pub mod error;
pub mod recovery;
pub mod shutdown;

pub use correlator::{CommandCorrelator, ResponseHandle};
pub use error::{CommandId, PlayerError, RecoveryAction};
pub use recovery::{RecoveryPolicy, TimeoutPolicy};
pub use shutdown::{ShutdownManager, ShutdownReason};
