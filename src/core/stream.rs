//! 事件流消费端
//!
//! 按会话从注册表取当前事件通道并非阻塞地取出事件，空时每 100ms 再看一次。
//! 通道被清理或被新 Worker 替换时，先把旧通道剩余的事件（含终止哨兵）取完再切换。

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use crate::core::events::{EventChannel, StreamEvent};
use crate::core::registry::WorkerRegistry;
use crate::core::state::SessionKey;

pub const STREAM_POLL_INTERVAL: Duration = Duration::from_millis(100);

pub struct StreamConsumer {
    registry: Arc<WorkerRegistry>,
    key: SessionKey,
    current: Option<Arc<EventChannel>>,
    pending: VecDeque<StreamEvent>,
    poll_interval: Duration,
}

impl StreamConsumer {
    pub fn new(registry: Arc<WorkerRegistry>, key: SessionKey) -> Self {
        Self {
            registry,
            key,
            current: None,
            pending: VecDeque::new(),
            poll_interval: STREAM_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    /// 非阻塞：有事件就返回一个
    pub async fn try_next(&mut self) -> Option<StreamEvent> {
        if let Some(event) = self.pending.pop_front() {
            return Some(event);
        }
        self.refresh().await;
        if let Some(channel) = &self.current {
            self.pending.extend(channel.try_drain());
        }
        self.pending.pop_front()
    }

    /// 等到下一个事件
    pub async fn next_event(&mut self) -> StreamEvent {
        loop {
            if let Some(event) = self.try_next().await {
                return event;
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn refresh(&mut self) {
        let latest = self.registry.channel(&self.key).await;
        let unchanged = match (&self.current, &latest) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        };
        if unchanged {
            return;
        }
        if let Some(old) = self.current.take() {
            self.pending.extend(old.try_drain());
        }
        self.current = latest;
    }
}
