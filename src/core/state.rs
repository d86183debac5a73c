//! 会话键与 Worker 状态
//!
//! WorkerState 由 WorkerRegistry 独占持有；Worker 追加消息、读取停止标志，
//! 停止请求方（HTTP 停止、心跳回收、进程关闭）只写停止标志。
//! WorkerStatus 是给前端的轻量投影。

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::core::events::Sentinel;

/// 会话键：索引一个客户端的全部状态
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionKey(String);

impl SessionKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// 随机会话令牌（Web 层写入 cookie）
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// 以网络来源作为会话键；同一 NAT 后的用户会共用一个键
    pub fn from_addr(addr: &SocketAddr) -> Self {
        Self(addr.ip().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Worker 状态机阶段
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum WorkerPhase {
    Authenticating,
    Polling,
    Reserving,
    Retrying,
    Terminated,
}

/// 停止原因；决定 cleanup 推送哪个终止哨兵
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum StopReason {
    /// 用户点击停止
    Requested,
    /// 心跳超时
    ConnectionLost,
    /// 致命错误（哨兵已由 Worker 推送）
    Fatal(Sentinel),
    /// Worker 任务 panic
    Crashed,
    /// 进程关闭
    Shutdown,
}

impl StopReason {
    /// cleanup 时补推的终止哨兵
    pub fn terminal_sentinel(&self) -> Option<Sentinel> {
        match self {
            StopReason::Requested | StopReason::Shutdown => Some(Sentinel::Stopped),
            StopReason::ConnectionLost => Some(Sentinel::ConnectionLost),
            StopReason::Crashed => Some(Sentinel::CriticalError),
            StopReason::Fatal(_) => None,
        }
    }
}

/// 单个会话的 Worker 状态
#[derive(Debug)]
pub struct WorkerState {
    key: SessionKey,
    worker_id: String,
    stop: CancellationToken,
    stop_reason: RwLock<Option<StopReason>>,
    phase: RwLock<WorkerPhase>,
    messages: RwLock<Vec<String>>,
    created_at: DateTime<Local>,
    last_activity: RwLock<DateTime<Local>>,
    cleaned: AtomicBool,
}

impl WorkerState {
    pub fn new(key: SessionKey) -> Self {
        let now = Local::now();
        Self {
            key,
            worker_id: format!("worker_{}", uuid::Uuid::new_v4()),
            stop: CancellationToken::new(),
            stop_reason: RwLock::new(None),
            phase: RwLock::new(WorkerPhase::Authenticating),
            messages: RwLock::new(Vec::new()),
            created_at: now,
            last_activity: RwLock::new(now),
            cleaned: AtomicBool::new(false),
        }
    }

    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// 停止令牌：Worker 的等待会被它提前唤醒
    pub fn stop_token(&self) -> CancellationToken {
        self.stop.clone()
    }

    pub fn is_stop_requested(&self) -> bool {
        self.stop.is_cancelled()
    }

    /// 请求停止（幂等，首个原因生效）；返回本次是否为首次请求
    pub async fn request_stop(&self, reason: StopReason) -> bool {
        let mut slot = self.stop_reason.write().await;
        let first = slot.is_none();
        if first {
            *slot = Some(reason);
        }
        drop(slot);
        self.stop.cancel();
        first
    }

    pub async fn stop_reason(&self) -> Option<StopReason> {
        *self.stop_reason.read().await
    }

    pub async fn phase(&self) -> WorkerPhase {
        *self.phase.read().await
    }

    pub async fn set_phase(&self, phase: WorkerPhase) {
        *self.phase.write().await = phase;
        self.touch_activity().await;
    }

    /// 追加一条消息（只追加，不修改已有内容）
    pub async fn append_message(&self, message: impl Into<String>) {
        self.messages.write().await.push(message.into());
        self.touch_activity().await;
    }

    pub async fn messages(&self) -> Vec<String> {
        self.messages.read().await.clone()
    }

    pub async fn touch_activity(&self) {
        *self.last_activity.write().await = Local::now();
    }

    pub async fn last_activity(&self) -> DateTime<Local> {
        *self.last_activity.read().await
    }

    /// 标记已清理；只有第一次调用返回 true
    pub fn mark_cleaned(&self) -> bool {
        !self.cleaned.swap(true, Ordering::SeqCst)
    }

    /// 投影为前端可渲染的状态
    pub async fn project(&self) -> WorkerStatus {
        let messages = self.messages.read().await;
        WorkerStatus {
            session: self.key.clone(),
            worker_id: self.worker_id.clone(),
            phase: self.phase().await,
            running: !self.is_stop_requested(),
            stop_reason: self.stop_reason().await,
            message_count: messages.len(),
            last_message: messages.last().cloned(),
            created_at: self.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            last_activity: self.last_activity().await.format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }
}

/// 前端看到的 Worker 状态
#[derive(Clone, Debug, Serialize)]
pub struct WorkerStatus {
    pub session: SessionKey,
    pub worker_id: String,
    pub phase: WorkerPhase,
    pub running: bool,
    pub stop_reason: Option<StopReason>,
    pub message_count: usize,
    pub last_message: Option<String>,
    pub created_at: String,
    pub last_activity: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_first_stop_reason_wins() {
        let state = WorkerState::new(SessionKey::new("s1"));
        assert!(!state.is_stop_requested());

        assert!(state.request_stop(StopReason::ConnectionLost).await);
        assert!(!state.request_stop(StopReason::Requested).await);

        assert!(state.is_stop_requested());
        assert_eq!(state.stop_reason().await, Some(StopReason::ConnectionLost));
        assert!(state.stop_token().is_cancelled());
    }

    #[tokio::test]
    async fn test_messages_are_append_only() {
        let state = WorkerState::new(SessionKey::new("s1"));
        state.append_message("one").await;
        state.append_message("two").await;
        assert_eq!(state.messages().await, vec!["one", "two"]);

        let status = state.project().await;
        assert_eq!(status.message_count, 2);
        assert_eq!(status.last_message.as_deref(), Some("two"));
        assert!(status.running);
        assert_eq!(status.phase, WorkerPhase::Authenticating);
    }

    #[test]
    fn test_mark_cleaned_once() {
        let state = WorkerState::new(SessionKey::new("s1"));
        assert!(state.mark_cleaned());
        assert!(!state.mark_cleaned());
    }

    #[test]
    fn test_terminal_sentinels() {
        assert_eq!(StopReason::Requested.terminal_sentinel(), Some(Sentinel::Stopped));
        assert_eq!(
            StopReason::ConnectionLost.terminal_sentinel(),
            Some(Sentinel::ConnectionLost)
        );
        assert_eq!(
            StopReason::Crashed.terminal_sentinel(),
            Some(Sentinel::CriticalError)
        );
        assert_eq!(
            StopReason::Fatal(Sentinel::PasswordError).terminal_sentinel(),
            None
        );
    }

    #[test]
    fn test_session_key_from_addr_uses_ip_only() {
        let addr: SocketAddr = "10.0.0.7:51234".parse().unwrap();
        assert_eq!(SessionKey::from_addr(&addr).as_str(), "10.0.0.7");
        assert_ne!(SessionKey::generate(), SessionKey::generate());
    }
}
