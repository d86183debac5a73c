//! Worker → 前端的事件通道
//!
//! 每个会话一条有界 FIFO：Worker 写入状态文本或哨兵，SSE 端非阻塞地取出。
//! 队列满时丢弃新的状态文本并告警，Worker 永远不会因为前端不读而阻塞；
//! 哨兵不会被丢弃：队列满时放进单独的终止槽，取出时排在队列末尾。

use std::fmt;
use std::sync::Mutex as SyncMutex;

use serde::Serialize;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Mutex;

/// 默认队列容量
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// 哨兵事件：区别于普通文本的终止 / 特殊状态标记
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Sentinel {
    /// 账号或密码错误，前端应提示重新输入
    PasswordError,
    /// 其它致命错误
    CriticalError,
    /// 客户端心跳超时，会话被回收
    ConnectionLost,
    /// 用户主动停止（或进程关闭）
    Stopped,
}

impl Sentinel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sentinel::PasswordError => "PASSWORD_ERROR",
            Sentinel::CriticalError => "CRITICAL_ERROR",
            Sentinel::ConnectionLost => "CONNECTION_LOST",
            Sentinel::Stopped => "STOPPED",
        }
    }
}

impl fmt::Display for Sentinel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 通道中的单个事件
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum StreamEvent {
    /// 普通状态文本
    Status(String),
    /// 哨兵
    Sentinel(Sentinel),
}

impl StreamEvent {
    pub fn status(text: impl Into<String>) -> Self {
        StreamEvent::Status(text.into())
    }

    /// SSE 的 `event:` 字段
    pub fn sse_name(&self) -> &'static str {
        match self {
            StreamEvent::Status(_) => "status",
            StreamEvent::Sentinel(_) => "sentinel",
        }
    }

    /// SSE 的 `data:` 字段
    pub fn payload(&self) -> &str {
        match self {
            StreamEvent::Status(text) => text,
            StreamEvent::Sentinel(s) => s.as_str(),
        }
    }

    pub fn sentinel(&self) -> Option<Sentinel> {
        match self {
            StreamEvent::Sentinel(s) => Some(*s),
            StreamEvent::Status(_) => None,
        }
    }
}

/// 单生产者 / 单消费者的有界事件队列
#[derive(Debug)]
pub struct EventChannel {
    tx: mpsc::Sender<StreamEvent>,
    rx: Mutex<mpsc::Receiver<StreamEvent>>,
    /// 队列满时暂存的哨兵
    terminal: SyncMutex<Option<Sentinel>>,
}

impl EventChannel {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            tx,
            rx: Mutex::new(rx),
            terminal: SyncMutex::new(None),
        }
    }

    /// 写入事件；状态文本在队列已满时丢弃并返回 false，哨兵总会被保留
    pub fn push(&self, event: StreamEvent) -> bool {
        let mut terminal = self.terminal.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(held) = *terminal {
            // 终止槽已占用时后续事件排不到哨兵前面
            tracing::warn!("terminal {} pending, dropping {} event", held, event.sse_name());
            return false;
        }
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(StreamEvent::Sentinel(sentinel))) => {
                tracing::warn!(
                    "event channel full ({} pending), holding {} sentinel",
                    self.pending(),
                    sentinel
                );
                *terminal = Some(sentinel);
                true
            }
            Err(TrySendError::Full(dropped)) => {
                tracing::warn!(
                    "event channel full ({} pending), dropping {} event",
                    self.pending(),
                    dropped.sse_name()
                );
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// 非阻塞取出当前所有事件（保持 FIFO 顺序）；另一个消费者正在读时返回空
    pub fn try_drain(&self) -> Vec<StreamEvent> {
        let Ok(mut rx) = self.rx.try_lock() else {
            return Vec::new();
        };
        let mut drained = Vec::new();
        while let Ok(event) = rx.try_recv() {
            drained.push(event);
        }
        let held = self
            .terminal
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        drained.extend(held.map(StreamEvent::Sentinel));
        drained
    }

    /// 尚未被取走的事件数
    pub fn pending(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }
}

impl Default for EventChannel {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}
