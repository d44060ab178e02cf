//! 消息通道抽象
//!
//! 通道只负责「把一条完整消息交给对端」：每条消息先整体序列化，再推入单一写任务的队列，
//! 因此多个发送方并发调用 send 也不会交错帧。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

use super::message::WireMessage;
use crate::core::PlayerError;

/// 通道 ID（每条连接唯一）
pub type ChannelId = String;

/// 双向消息通道的发送侧
pub trait MessageChannel: Send + Sync {
    fn id(&self) -> &str;

    /// 发送一条消息；通道已关闭时返回 ChannelUnavailable
    fn send(&self, message: WireMessage) -> Result<(), PlayerError>;

    fn is_open(&self) -> bool;
}

/// 基于无界队列的通道：接收端交给写任务（WebSocket）或测试直接读取
pub struct QueuedChannel {
    id: ChannelId,
    tx: mpsc::UnboundedSender<String>,
    closed: AtomicBool,
}

impl QueuedChannel {
    pub fn new(id: impl Into<ChannelId>) -> (Arc<Self>, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let channel = Arc::new(Self {
            id: id.into(),
            tx,
            closed: AtomicBool::new(false),
        });
        (channel, rx)
    }

    /// 标记关闭（连接断开时调用），之后的 send 全部失败
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

impl MessageChannel for QueuedChannel {
    fn id(&self) -> &str {
        &self.id
    }

    fn send(&self, message: WireMessage) -> Result<(), PlayerError> {
        if !self.is_open() {
            return Err(PlayerError::ChannelUnavailable(format!("channel {} is closed", self.id)));
        }
        let json = message.encode()?;
        self.tx
            .send(json)
            .map_err(|_| PlayerError::ChannelUnavailable(format!("channel {} writer is gone", self.id)))
    }

    fn is_open(&self) -> bool {
        !self.closed.load(Ordering::SeqCst) && !self.tx.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queued_channel_send_and_close() {
        let (channel, mut rx) = QueuedChannel::new("c1");
        assert_eq!(channel.id(), "c1");
        channel.send(WireMessage::BeginPlay).unwrap();
        assert_eq!(rx.try_recv().unwrap(), r#"{"type":"BEGIN_PLAY"}"#);

        channel.close();
        assert!(!channel.is_open());
        assert!(matches!(
            channel.send(WireMessage::EndPlay),
            Err(PlayerError::ChannelUnavailable(_))
        ));
    }

    #[test]
    fn test_queued_channel_receiver_dropped() {
        let (channel, rx) = QueuedChannel::new("c2");
        drop(rx);
        assert!(!channel.is_open());
        assert!(matches!(
            channel.send(WireMessage::info("hello")),
            Err(PlayerError::ChannelUnavailable(_))
        ));
    }
}
