//! 预约 Worker：单个会话的轮询状态机
//!
//! ```text
//! Authenticating → Polling → (Reserving | Retrying) → Terminated
//! ```
//!
//! - 每个轮询周期前、每个候选车次前检查停止标志
//! - 所有等待都会被停止令牌提前唤醒
//! - 预约成功后不退出，继续轮询
//! - 退出时恰好一次：尽力登出，然后让注册表清理本 Worker 的条目

use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::Local;

use crate::booking::{BookingClient, BookingError, BookingSession, Candidate, StandbyOptions};
use crate::core::events::{EventChannel, Sentinel, StreamEvent, DEFAULT_EVENT_CAPACITY};
use crate::core::recovery::{classify, RecoveryAction, RecoveryEngine};
use crate::core::registry::WorkerRegistry;
use crate::core::state::{StopReason, WorkerPhase, WorkerState};
use crate::integrations::{spawn_notify, Notifier};
use crate::reservation::ReservationRequest;

/// 解析失败时记录的消息
pub const PARSE_ERROR_MESSAGE: &str = "Expecting value 오류";

/// Worker 节奏参数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSettings {
    /// 两次查询之间的间隔
    pub poll_interval: Duration,
    /// 用户过多时的退避
    pub overload_backoff: Duration,
    /// 其它查询错误的退避
    pub error_backoff: Duration,
    pub event_capacity: usize,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            overload_backoff: Duration::from_secs(5),
            error_backoff: Duration::from_secs(10),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl WorkerSettings {
    pub fn recovery(&self) -> RecoveryEngine {
        RecoveryEngine::new(self.overload_backoff, self.error_backoff)
    }
}

/// 候选车次循环的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

/// 单个会话的预约 Worker
pub struct ReservationWorker {
    state: Arc<WorkerState>,
    channel: Arc<EventChannel>,
    request: Arc<ReservationRequest>,
    client: Arc<dyn BookingClient>,
    notifier: Option<Arc<dyn Notifier>>,
    recovery: RecoveryEngine,
    settings: WorkerSettings,
    registry: Weak<WorkerRegistry>,
}

impl ReservationWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        state: Arc<WorkerState>,
        channel: Arc<EventChannel>,
        request: Arc<ReservationRequest>,
        client: Arc<dyn BookingClient>,
        notifier: Option<Arc<dyn Notifier>>,
        settings: WorkerSettings,
        registry: Weak<WorkerRegistry>,
    ) -> Self {
        Self {
            recovery: settings.recovery(),
            state,
            channel,
            request,
            client,
            notifier,
            settings,
            registry,
        }
    }

    /// 运行到终止
    pub async fn run(self) {
        tracing::info!(
            "worker {} started for session {} ({})",
            self.state.worker_id(),
            self.state.key(),
            self.request.summary()
        );

        let session = match self.authenticate().await {
            Some(session) => Some(self.poll_loop(session).await),
            None => None,
        };

        self.teardown(session).await;
    }

    async fn authenticate(&self) -> Option<Box<dyn BookingSession>> {
        self.state.set_phase(WorkerPhase::Authenticating).await;
        match self.client.authenticate(&self.request.credentials).await {
            Ok(session) => Some(session),
            Err(err) => {
                let sentinel = self.recovery.on_auth_failure(classify(&err));
                self.apply_fatal(sentinel, &err).await;
                None
            }
        }
    }

    /// 轮询直到停止；返回当前持有的会话供登出
    async fn poll_loop(&self, mut session: Box<dyn BookingSession>) -> Box<dyn BookingSession> {
        let query = self.request.search_query();

        while !self.state.is_stop_requested() {
            self.state.set_phase(WorkerPhase::Polling).await;
            self.emit(format!(
                "예약시도..... @{}",
                Local::now().format("%Y-%m-%d %H:%M:%S")
            ));
            if !self.pause(self.settings.poll_interval).await {
                break;
            }

            let result = session.search_candidates(&query).await;
            match result {
                Ok(candidates) => {
                    for candidate in &candidates {
                        self.emit(candidate.to_string());
                    }
                    if self.reserve_candidates(session.as_ref(), &candidates).await == Flow::Stop {
                        break;
                    }
                }
                Err(BookingError::Parse(detail)) => {
                    tracing::error!("search response could not be parsed: {}", detail);
                    self.record(PARSE_ERROR_MESSAGE).await;
                }
                Err(err) => {
                    let message = format!("메인 루프에서 오류 발생: {}", err);
                    tracing::error!("{}", message);
                    self.record(message.clone()).await;

                    match self.recovery.on_search_failure(classify(&err)) {
                        RecoveryAction::Reconnect { after, notify } => {
                            self.state.set_phase(WorkerPhase::Retrying).await;
                            if notify {
                                self.notify(message);
                            }
                            if !self.pause(after).await {
                                break;
                            }
                            match self.client.authenticate(&self.request.credentials).await {
                                Ok(fresh) => {
                                    tracing::info!("worker {} re-authenticated", self.state.worker_id());
                                    session = fresh;
                                }
                                Err(auth_err) => {
                                    let sentinel = self.recovery.on_auth_failure(classify(&auth_err));
                                    self.apply_fatal(sentinel, &auth_err).await;
                                    break;
                                }
                            }
                        }
                        RecoveryAction::Escalate(sentinel) => {
                            self.apply_fatal(sentinel, &err).await;
                            break;
                        }
                    }
                }
            }
        }

        session
    }

    async fn reserve_candidates(&self, session: &dyn BookingSession, candidates: &[Candidate]) -> Flow {
        if candidates.is_empty() {
            return Flow::Continue;
        }
        self.state.set_phase(WorkerPhase::Reserving).await;

        for candidate in candidates {
            if self.state.is_stop_requested() {
                return Flow::Stop;
            }

            match self.reserve_one(session, candidate).await {
                Ok(()) => {
                    let message = format!("SRT 예약 대기 완료 {}", candidate);
                    tracing::info!("{}", message);
                    self.record(message.clone()).await;
                    self.notify(message);
                    tracing::info!("예약 성공했지만 계속 진행합니다.");
                    break;
                }
                Err(err) => {
                    let message = format!("열차 {}에 대한 오류 발생: {}", candidate, err);
                    tracing::warn!("{}", message);
                    self.record(message).await;

                    if let Some(sentinel) = self.recovery.on_candidate_failure(classify(&err)) {
                        self.apply_fatal(sentinel, &err).await;
                        return Flow::Stop;
                    }
                }
            }
        }

        Flow::Continue
    }

    async fn reserve_one(&self, session: &dyn BookingSession, candidate: &Candidate) -> Result<(), BookingError> {
        let reservation = session.reserve_standby(candidate).await?;
        session
            .configure_options(&reservation, &self.request.phone_number, StandbyOptions::default())
            .await
    }

    /// 致命处理：记录、推送哨兵、请求停止、通知
    async fn apply_fatal(&self, sentinel: Sentinel, err: &BookingError) {
        let message = format!("심각한 오류 발생: {}", err);
        tracing::error!("worker {}: {}", self.state.worker_id(), message);
        self.record(message.clone()).await;
        self.channel.push(StreamEvent::Sentinel(sentinel));
        self.state.request_stop(StopReason::Fatal(sentinel)).await;
        self.notify(message);
    }

    /// 等待；被停止请求打断时返回 false
    async fn pause(&self, duration: Duration) -> bool {
        let stop = self.state.stop_token();
        tokio::select! {
            _ = stop.cancelled() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }

    /// 只推送事件
    fn emit(&self, text: String) {
        tracing::debug!("{}", text);
        self.channel.push(StreamEvent::status(text));
    }

    /// 记录到消息历史并推送事件
    async fn record(&self, text: impl Into<String>) {
        let text = text.into();
        self.state.append_message(text.clone()).await;
        self.channel.push(StreamEvent::status(text));
    }

    fn notify(&self, text: String) {
        if let Some(notifier) = &self.notifier {
            spawn_notify(Arc::clone(notifier), text);
        }
    }

    async fn teardown(&self, session: Option<Box<dyn BookingSession>>) {
        self.state.set_phase(WorkerPhase::Terminated).await;

        if let Some(session) = session {
            if let Err(e) = session.logout().await {
                tracing::warn!("logout failed for worker {}: {}", self.state.worker_id(), e);
            }
        }

        match self.registry.upgrade() {
            Some(registry) => registry.finish(self.state.key(), &self.state).await,
            None => tracing::debug!("registry dropped before worker {} finished", self.state.worker_id()),
        }
        tracing::info!("worker {} terminated", self.state.worker_id());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::booking::{sample_candidate, Credentials, MockBookingClient};
    use crate::core::state::SessionKey;
    use crate::reservation::NotificationPrefs;

    fn request() -> Arc<ReservationRequest> {
        Arc::new(ReservationRequest {
            credentials: Credentials::new("user", "pw"),
            departure: "수서".into(),
            arrival: "부산".into(),
            date: "20240315".into(),
            time_start: "080000".into(),
            time_end: "120000".into(),
            phone_number: "010-1234-5678".into(),
            notification: NotificationPrefs::default(),
        })
    }

    fn fast() -> WorkerSettings {
        WorkerSettings {
            poll_interval: Duration::from_millis(5),
            overload_backoff: Duration::from_millis(5),
            error_backoff: Duration::from_millis(5),
            event_capacity: 1024,
        }
    }

    fn worker(client: MockBookingClient) -> (ReservationWorker, Arc<WorkerState>, Arc<EventChannel>) {
        let state = Arc::new(WorkerState::new(SessionKey::new("s")));
        let channel = Arc::new(EventChannel::new(1024));
        let w = ReservationWorker::new(
            Arc::clone(&state),
            Arc::clone(&channel),
            request(),
            Arc::new(client),
            None,
            fast(),
            Weak::new(),
        );
        (w, state, channel)
    }

    #[tokio::test]
    async fn test_auth_failure_is_fatal() {
        let client = MockBookingClient::new().push_auth(Err(BookingError::Auth("비밀번호 오류".into())));
        let (w, state, channel) = worker(client.clone());
        w.run().await;

        assert_eq!(state.stop_reason().await, Some(StopReason::Fatal(Sentinel::PasswordError)));
        assert_eq!(state.phase().await, WorkerPhase::Terminated);
        let events = channel.try_drain();
        assert_eq!(events.last().and_then(|e| e.sentinel()), Some(Sentinel::PasswordError));
        assert_eq!(client.logouts(), 0);
    }

    #[tokio::test]
    async fn test_parse_error_keeps_polling() {
        let client = MockBookingClient::new().push_search(Err(BookingError::Parse("Expecting value".into())));
        let (w, state, channel) = worker(client.clone());
        let handle = tokio::spawn(w.run());

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(client.search_calls() >= 2);
        assert!(!state.is_stop_requested());
        assert_eq!(state.messages().await, vec![PARSE_ERROR_MESSAGE.to_string()]);

        state.request_stop(StopReason::Requested).await;
        handle.await.unwrap();
        assert!(channel.try_drain().iter().all(|e| e.sentinel().is_none()));
        assert_eq!(client.logouts(), 1);
    }

    #[tokio::test]
    async fn test_success_continues_polling() {
        let client = MockBookingClient::new()
            .push_search(Ok(vec![sample_candidate("301"), sample_candidate("305")]));
        let (w, state, _channel) = worker(client.clone());
        let handle = tokio::spawn(w.run());

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(client.reserve_calls(), vec!["301".to_string()]);
        assert!(client.search_calls() >= 2);
        let messages = state.messages().await;
        assert_eq!(messages.len(), 1);
        assert!(messages[0].starts_with("SRT 예약 대기 완료 [SRT 301]"));

        state.request_stop(StopReason::Requested).await;
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_overload_reconnects() {
        let client = MockBookingClient::new()
            .push_search(Err(BookingError::Remote("사용자가 많아 접속이 원활하지 않습니다.".into())));
        let (w, state, _channel) = worker(client.clone());
        let handle = tokio::spawn(w.run());

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(client.logins(), 2);
        assert!(!state.is_stop_requested());
        assert!(state.messages().await[0].starts_with("메인 루프에서 오류 발생"));

        state.request_stop(StopReason::Requested).await;
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_reauth_is_fatal() {
        let client = MockBookingClient::new()
            .push_auth(Ok(()))
            .push_auth(Err(BookingError::Transport("connection refused".into())))
            .push_search(Err(BookingError::Transport("connection reset".into())));
        let (w, state, channel) = worker(client.clone());
        w.run().await;

        assert_eq!(state.stop_reason().await, Some(StopReason::Fatal(Sentinel::CriticalError)));
        let sentinels: Vec<_> = channel.try_drain().iter().filter_map(|e| e.sentinel()).collect();
        assert_eq!(sentinels, vec![Sentinel::CriticalError]);
        assert_eq!(client.logouts(), 1);
    }

    #[tokio::test]
    async fn test_fatal_sentinel_survives_full_channel() {
        let client = MockBookingClient::new()
            .push_search(Ok(vec![]))
            .push_search(Ok(vec![]))
            .push_search(Ok(vec![]))
            .push_search(Ok(vec![]))
            .push_search(Err(BookingError::Remote("비밀번호 오류".into())));
        let state = Arc::new(WorkerState::new(SessionKey::new("s")));
        let channel = Arc::new(EventChannel::new(4));
        let w = ReservationWorker::new(
            Arc::clone(&state),
            Arc::clone(&channel),
            request(),
            Arc::new(client),
            None,
            fast(),
            Weak::new(),
        );
        w.run().await;

        assert_eq!(state.stop_reason().await, Some(StopReason::Fatal(Sentinel::PasswordError)));
        let events = channel.try_drain();
        assert_eq!(events.len(), 5);
        let sentinels: Vec<_> = events.iter().filter_map(|e| e.sentinel()).collect();
        assert_eq!(sentinels, vec![Sentinel::PasswordError]);
        assert_eq!(events.last().and_then(|e| e.sentinel()), Some(Sentinel::PasswordError));
    }

    #[tokio::test]
    async fn test_stop_wakes_long_pause() {
        let client = MockBookingClient::new();
        let state = Arc::new(WorkerState::new(SessionKey::new("s")));
        let w = ReservationWorker::new(
            Arc::clone(&state),
            Arc::new(EventChannel::default()),
            request(),
            Arc::new(client),
            None,
            WorkerSettings {
                poll_interval: Duration::from_secs(60),
                ..WorkerSettings::default()
            },
            Weak::new(),
        );
        let handle = tokio::spawn(w.run());
        tokio::time::sleep(Duration::from_millis(20)).await;
        state.request_stop(StopReason::Requested).await;

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("worker should wake on stop")
            .unwrap();
    }
}
