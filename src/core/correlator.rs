//! 命令关联器：把「发送请求 / 在另一条路径上收到回复」变成可等待的调用
//!
//! 每个请求持有一个 oneshot 完成槽与独立的超时定时器。resolve、超时与 cancel_all
//! 三者竞争同一个 map 条目，谁先从 map 中移除条目谁生效，其余路径看到条目已不存在即不做任何事。

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tokio::time::Instant;

use super::error::{CommandId, PlayerError};

/// 单个等待中的请求
struct PendingRequest<T> {
    /// 创建序号：定时器只移除自己创建的那一条
    seq: u64,
    issued_at: Instant,
    responder: oneshot::Sender<Result<T, PlayerError>>,
    timer: AbortHandle,
}

struct Inner<T> {
    pending: HashMap<CommandId, PendingRequest<T>>,
    next_seq: u64,
    /// close() 之后拒绝新的 issue
    closed: bool,
}

/// 命令关联器（可克隆，内部共享同一张 pending 表）
pub struct CommandCorrelator<T> {
    /// 所属会话名，仅用于日志
    owner: Arc<str>,
    inner: Arc<Mutex<Inner<T>>>,
}

impl<T> Clone for CommandCorrelator<T> {
    fn clone(&self) -> Self {
        Self {
            owner: Arc::clone(&self.owner),
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Send + 'static> CommandCorrelator<T> {
    pub fn new(owner: &str) -> Self {
        Self {
            owner: Arc::from(owner),
            inner: Arc::new(Mutex::new(Inner {
                pending: HashMap::new(),
                next_seq: 0,
                closed: false,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<T>> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// 发起一个关联请求：返回要嵌入出站消息的 id 与可等待的句柄
    ///
    /// 必须在 tokio 运行时内调用（会为超时启动一个定时任务）。
    /// 关联器已 close 时返回 SessionStopped。
    pub fn issue(&self, timeout: Duration) -> Result<(CommandId, ResponseHandle<T>), PlayerError> {
        let (tx, rx) = oneshot::channel();
        let mut inner = self.lock();
        if inner.closed {
            return Err(PlayerError::SessionStopped(self.owner.to_string()));
        }

        let id = loop {
            let candidate = uuid::Uuid::new_v4().to_string();
            if !inner.pending.contains_key(&candidate) {
                break candidate;
            }
        };
        let seq = inner.next_seq;
        inner.next_seq += 1;

        let issued_at = Instant::now();
        let deadline = issued_at + timeout;
        let timer = tokio::spawn(expire(self.clone(), id.clone(), seq, deadline)).abort_handle();

        inner.pending.insert(
            id.clone(),
            PendingRequest {
                seq,
                issued_at,
                responder: tx,
                timer,
            },
        );
        drop(inner);

        tracing::debug!("[{}] issued command {} (timeout {:?})", self.owner, id, timeout);
        Ok((id.clone(), ResponseHandle { id, rx }))
    }

    /// 用回复完成对应请求；返回 true 表示确有条目被完成
    ///
    /// 未知、已完成或已超时的 id 只记录警告，不影响任何其它条目。
    pub fn resolve(&self, id: &str, payload: T) -> bool {
        let entry = self.lock().pending.remove(id);
        match entry {
            Some(entry) => {
                entry.timer.abort();
                tracing::debug!(
                    "[{}] resolved command {} after {:?}",
                    self.owner,
                    id,
                    entry.issued_at.elapsed()
                );
                let _ = entry.responder.send(Ok(payload));
                true
            }
            None => {
                tracing::warn!(
                    "[{}] received response for unknown or expired command {}",
                    self.owner,
                    id
                );
                false
            }
        }
    }

    /// 撤销单个请求（以 Cancelled 失败）；条目不存在时返回 false
    pub fn cancel(&self, id: &str) -> bool {
        let entry = self.lock().pending.remove(id);
        match entry {
            Some(entry) => {
                entry.timer.abort();
                let _ = entry.responder.send(Err(PlayerError::Cancelled { id: id.to_string() }));
                true
            }
            None => false,
        }
    }

    /// 以 Cancelled 失败所有等待中的请求并清空表；返回被取消的数量
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<(CommandId, PendingRequest<T>)> = self.lock().pending.drain().collect();
        let count = drained.len();
        for (id, entry) in drained {
            entry.timer.abort();
            let _ = entry.responder.send(Err(PlayerError::Cancelled { id }));
        }
        if count > 0 {
            tracing::info!("[{}] cancelled {} pending commands", self.owner, count);
        }
        count
    }

    /// cancel_all 并拒绝之后的 issue（会话停止时调用）
    pub fn close(&self) -> usize {
        self.lock().closed = true;
        self.cancel_all()
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// 当前等待中的请求数
    pub fn pending_count(&self) -> usize {
        self.lock().pending.len()
    }

    /// 定时器到期：条目仍在且序号一致时移除并以 Timeout 失败
    fn expire_entry(&self, id: &str, seq: u64) {
        let entry = {
            let mut inner = self.lock();
            match inner.pending.get(id) {
                Some(p) if p.seq == seq => inner.pending.remove(id),
                _ => None,
            }
        };
        if let Some(entry) = entry {
            let elapsed = entry.issued_at.elapsed();
            tracing::warn!("[{}] command {} timed out after {:?}", self.owner, id, elapsed);
            let _ = entry.responder.send(Err(PlayerError::Timeout {
                id: id.to_string(),
                elapsed,
            }));
        }
    }
}

async fn expire<T: Send + 'static>(
    correlator: CommandCorrelator<T>,
    id: CommandId,
    seq: u64,
    deadline: Instant,
) {
    tokio::time::sleep_until(deadline).await;
    correlator.expire_entry(&id, seq);
}

/// issue 返回的等待句柄：完成值为回复载荷，或 Timeout / Cancelled
#[derive(Debug)]
pub struct ResponseHandle<T> {
    id: CommandId,
    rx: oneshot::Receiver<Result<T, PlayerError>>,
}

impl<T> ResponseHandle<T> {
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl<T> Future for ResponseHandle<T> {
    type Output = Result<T, PlayerError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        Pin::new(&mut this.rx).poll(cx).map(|result| match result {
            Ok(outcome) => outcome,
            // 发送端被丢弃只可能发生在关联器整体被释放时
            Err(_) => Err(PlayerError::Cancelled {
                id: this.id.clone(),
            }),
        })
    }
}
