//! Worker 注册表
//!
//! 进程内唯一，按 SessionKey 索引每个会话的 WorkerState、事件通道与任务句柄，
//! 同时维护心跳记录（lastSeen）。
//!
//! ```text
//! start ──► WorkerState + EventChannel ──► spawn(supervised worker)
//! request_stop ──► stop token
//! worker 退出 / 心跳回收 ──► cleanup（每个 Worker 恰好一次）
//!                             ├─► 推送终止哨兵
//!                             ├─► 移除心跳记录
//!                             └─► 分离事件通道（消息保留到下一次 start）
//! ```
//!
//! Worker 的清理只作用于它自己那一代条目（按 Arc 指针比对），
//! 旧 Worker 迟到的清理不会影响同一会话上新启动的 Worker。

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use crate::booking::BookingClient;
use crate::core::error::RegistryError;
use crate::core::events::{EventChannel, StreamEvent};
use crate::core::state::{SessionKey, StopReason, WorkerState, WorkerStatus};
use crate::core::worker::{ReservationWorker, WorkerSettings};
use crate::integrations::NotifierFactory;
use crate::reservation::ReservationRequest;

/// start 成功的返回
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Started {
    pub worker_id: String,
}

struct WorkerEntry {
    state: Arc<WorkerState>,
    /// cleanup 后为 None
    channel: Option<Arc<EventChannel>>,
    handle: Option<JoinHandle<()>>,
}

/// 进程级 Worker 注册表
pub struct WorkerRegistry {
    me: Weak<WorkerRegistry>,
    workers: RwLock<HashMap<SessionKey, WorkerEntry>>,
    liveness: RwLock<HashMap<SessionKey, Instant>>,
    client: Arc<dyn BookingClient>,
    notifier_factory: NotifierFactory,
    settings: WorkerSettings,
    closed: AtomicBool,
}

/// cleanup 写入消息历史的终止行
fn terminal_line(reason: StopReason) -> Option<&'static str> {
    match reason {
        StopReason::Requested => Some("예약 프로세스가 중단되었습니다."),
        StopReason::ConnectionLost => Some("연결이 끊어져 예약 프로세스가 중단되었습니다."),
        StopReason::Shutdown => Some("서버 종료로 예약 프로세스가 중단되었습니다."),
        StopReason::Crashed => Some("심각한 오류 발생: worker crashed"),
        StopReason::Fatal(_) => None,
    }
}

impl WorkerRegistry {
    pub fn new(
        client: Arc<dyn BookingClient>,
        notifier_factory: NotifierFactory,
        settings: WorkerSettings,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            workers: RwLock::new(HashMap::new()),
            liveness: RwLock::new(HashMap::new()),
            client,
            notifier_factory,
            settings,
            closed: AtomicBool::new(false),
        })
    }

    pub fn settings(&self) -> &WorkerSettings {
        &self.settings
    }

    /// 启动 Worker；该会话已有未停止的 Worker 时返回 AlreadyRunning
    pub async fn start(
        &self,
        key: SessionKey,
        request: ReservationRequest,
    ) -> Result<Started, RegistryError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(RegistryError::ShuttingDown);
        }

        let mut workers = self.workers.write().await;
        if let Some(existing) = workers.get(&key) {
            if !existing.state.is_stop_requested() {
                return Err(RegistryError::AlreadyRunning(key));
            }
            tracing::debug!(
                "replacing stopped worker {} for session {}",
                existing.state.worker_id(),
                key
            );
        }

        let state = Arc::new(WorkerState::new(key.clone()));
        let channel = Arc::new(EventChannel::new(self.settings.event_capacity));
        let notifier = (self.notifier_factory)(&request.notification);
        let worker = ReservationWorker::new(
            Arc::clone(&state),
            Arc::clone(&channel),
            Arc::new(request),
            Arc::clone(&self.client),
            notifier,
            self.settings.clone(),
            self.me.clone(),
        );
        // 先登记心跳，Worker 立即失败时 cleanup 才能把它移除
        self.touch(&key).await;
        let handle = self.spawn_supervised(worker, Arc::clone(&state));
        let worker_id = state.worker_id().to_string();

        workers.insert(
            key.clone(),
            WorkerEntry {
                state,
                channel: Some(channel),
                handle: Some(handle),
            },
        );
        drop(workers);

        tracing::info!("started worker {} for session {}", worker_id, key);
        Ok(Started { worker_id })
    }

    /// Worker 在独立任务中运行；panic 时按 Crashed 停止并清理
    fn spawn_supervised(&self, worker: ReservationWorker, state: Arc<WorkerState>) -> JoinHandle<()> {
        let registry = self.me.clone();
        tokio::spawn(async move {
            let outcome = tokio::spawn(worker.run()).await;
            if let Err(e) = outcome {
                if e.is_panic() {
                    tracing::error!("worker {} panicked", state.worker_id());
                    state.request_stop(StopReason::Crashed).await;
                    if let Some(registry) = registry.upgrade() {
                        registry.finish(state.key(), &state).await;
                    }
                }
            }
        })
    }

    /// 请求停止（幂等）；没有条目时返回 false
    pub async fn request_stop(&self, key: &SessionKey, reason: StopReason) -> bool {
        let state = self.state_of(key).await;
        match state {
            Some(state) => {
                if state.request_stop(reason).await {
                    tracing::info!("stop requested for session {} ({:?})", key, reason);
                }
                true
            }
            None => false,
        }
    }

    /// 心跳：更新 lastSeen，不存在时创建
    pub async fn touch(&self, key: &SessionKey) {
        self.liveness.write().await.insert(key.clone(), Instant::now());
    }

    pub async fn last_seen(&self, key: &SessionKey) -> Option<Instant> {
        self.liveness.read().await.get(key).copied()
    }

    /// 清理当前这一代 Worker（幂等）
    pub async fn cleanup(&self, key: &SessionKey) {
        match self.state_of(key).await {
            Some(state) => self.finish(key, &state).await,
            None => {
                self.liveness.write().await.remove(key);
            }
        }
    }

    /// 针对某一代 Worker 的清理；只有第一次调用生效
    pub(crate) async fn finish(&self, key: &SessionKey, state: &Arc<WorkerState>) {
        if !state.mark_cleaned() {
            return;
        }
        // 没有停止原因说明 Worker 自行退出，按主动停止处理
        state.request_stop(StopReason::Requested).await;
        let reason = state.stop_reason().await.unwrap_or(StopReason::Requested);

        if let Some(line) = terminal_line(reason) {
            state.append_message(line).await;
        }

        let mut workers = self.workers.write().await;
        let current = match workers.get_mut(key) {
            Some(entry) if Arc::ptr_eq(&entry.state, state) => Some(entry.channel.take()),
            _ => None,
        };
        drop(workers);

        match current {
            Some(channel) => {
                if let (Some(channel), Some(sentinel)) = (channel, reason.terminal_sentinel()) {
                    channel.push(StreamEvent::Sentinel(sentinel));
                }
                self.liveness.write().await.remove(key);
                tracing::info!(
                    "cleaned up worker {} for session {} ({:?})",
                    state.worker_id(),
                    key,
                    reason
                );
            }
            None => tracing::debug!(
                "worker {} for session {} was superseded, skipping cleanup",
                state.worker_id(),
                key
            ),
        }
    }

    /// 回收超过 threshold 没有心跳的会话，返回被回收的键
    pub async fn reap_inactive(&self, threshold: Duration) -> Vec<SessionKey> {
        let candidates: Vec<SessionKey> = self
            .liveness
            .read()
            .await
            .iter()
            .filter(|(_, seen)| seen.elapsed() > threshold)
            .map(|(key, _)| key.clone())
            .collect();

        let mut reaped = Vec::new();
        for key in candidates {
            // 收集与加写锁之间可能刚收到心跳
            let still_stale = {
                let mut liveness = self.liveness.write().await;
                match liveness.get(&key) {
                    Some(seen) if seen.elapsed() > threshold => {
                        liveness.remove(&key);
                        true
                    }
                    _ => false,
                }
            };
            if !still_stale {
                continue;
            }

            tracing::warn!("session {} missed heartbeats, reaping", key);
            self.request_stop(&key, StopReason::ConnectionLost).await;
            self.cleanup(&key).await;
            reaped.push(key);
        }
        reaped
    }

    /// 消息历史；没有条目时为空
    pub async fn messages(&self, key: &SessionKey) -> Vec<String> {
        match self.state_of(key).await {
            Some(state) => state.messages().await,
            None => Vec::new(),
        }
    }

    pub async fn status(&self, key: &SessionKey) -> Option<WorkerStatus> {
        let state = self.state_of(key).await?;
        Some(state.project().await)
    }

    /// 当前事件通道；清理后为 None
    pub async fn channel(&self, key: &SessionKey) -> Option<Arc<EventChannel>> {
        self.workers
            .read()
            .await
            .get(key)
            .and_then(|entry| entry.channel.clone())
    }

    pub async fn is_running(&self, key: &SessionKey) -> bool {
        self.workers
            .read()
            .await
            .get(key)
            .map(|entry| !entry.state.is_stop_requested())
            .unwrap_or(false)
    }

    /// 未停止的 Worker 数
    pub async fn active_count(&self) -> usize {
        self.workers
            .read()
            .await
            .values()
            .filter(|entry| !entry.state.is_stop_requested())
            .count()
    }

    /// 关闭：拒绝新 Worker，停止全部 Worker 并等待它们退出（每个最多 grace）
    pub async fn stop_all(&self, grace: Duration) {
        self.closed.store(true, Ordering::SeqCst);

        let running: Vec<(Arc<WorkerState>, Option<JoinHandle<()>>)> = {
            let mut workers = self.workers.write().await;
            workers
                .values_mut()
                .map(|entry| (Arc::clone(&entry.state), entry.handle.take()))
                .collect()
        };
        tracing::info!("stopping {} workers", running.len());

        for (state, _) in &running {
            state.request_stop(StopReason::Shutdown).await;
        }
        for (state, handle) in running {
            let Some(handle) = handle else { continue };
            if tokio::time::timeout(grace, handle).await.is_err() {
                tracing::warn!(
                    "worker {} did not stop within {:?}",
                    state.worker_id(),
                    grace
                );
            }
        }
    }

    async fn state_of(&self, key: &SessionKey) -> Option<Arc<WorkerState>> {
        self.workers
            .read()
            .await
            .get(key)
            .map(|entry| Arc::clone(&entry.state))
    }
}
