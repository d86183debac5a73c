//! Web 层：表单页、启动 / 停止 / 心跳接口、消息历史与 SSE 事件流
//!
//! 会话以 cookie `standby_sid` 标识；没有 cookie 的请求会分配一个新的会话键，
//! 并在响应里写回 cookie。

use std::convert::Infallible;
use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    extract::{FromRequestParts, State},
    http::{header, request::Parts, HeaderMap, HeaderValue, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        Html, IntoResponse, Response,
    },
    routing::{get, post},
    Form, Json, Router,
};
use futures_util::stream::{self, Stream};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::core::{RegistryError, SessionKey, StopReason, StreamConsumer, WorkerRegistry, WorkerStatus};
use crate::reservation::{RequestDefaults, ReservationForm};

/// 会话 cookie 名
pub const SESSION_COOKIE: &str = "standby_sid";

pub struct AppState {
    pub registry: Arc<WorkerRegistry>,
    pub defaults: RequestDefaults,
    /// 取消后 SSE 流结束，服务器才能完成优雅关闭
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(registry: Arc<WorkerRegistry>, defaults: RequestDefaults, shutdown: CancellationToken) -> Self {
        Self {
            registry,
            defaults,
            shutdown,
        }
    }
}

/// 从 Cookie 头中取指定名字的值
fn read_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(k, v)| *k == name && !v.is_empty())
        .map(|(_, v)| v.to_string())
}

/// 请求所属会话
#[derive(Debug, Clone)]
pub struct Session {
    key: SessionKey,
    fresh: bool,
}

impl Session {
    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    /// 新分配的会话需要写回 cookie
    fn set_cookie(&self) -> Option<HeaderValue> {
        if !self.fresh {
            return None;
        }
        HeaderValue::from_str(&format!(
            "{}={}; Path=/; HttpOnly; SameSite=Lax",
            SESSION_COOKIE, self.key
        ))
        .ok()
    }

    fn respond(&self, resp: impl IntoResponse) -> Response {
        let mut resp = resp.into_response();
        if let Some(cookie) = self.set_cookie() {
            resp.headers_mut().insert(header::SET_COOKIE, cookie);
        }
        resp
    }
}

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for Session {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(match read_cookie(&parts.headers, SESSION_COOKIE) {
            Some(value) => Session {
                key: SessionKey::new(value),
                fresh: false,
            },
            None => Session {
                key: SessionKey::generate(),
                fresh: true,
            },
        })
    }
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<String>,
}

impl MessageResponse {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            worker_id: None,
        }
    }
}

/// 表单默认值（不返回密码与 token 本身）
#[derive(Debug, Serialize)]
pub struct DefaultsResponse {
    pub srt_id: String,
    pub has_password: bool,
    pub phone_number: String,
    pub telegram_chat_id: String,
    pub has_bot_token: bool,
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/api/defaults", get(api_defaults))
        .route("/api/reservation", post(api_reservation))
        .route("/api/stop", post(api_stop))
        .route("/api/heartbeat", post(api_heartbeat))
        .route("/api/messages", get(api_messages))
        .route("/api/status", get(api_status))
        .route("/stream", get(stream_events))
        .route("/api/health", get(|| async { "OK" }))
        .with_state(state)
}

async fn index(session: Session) -> Response {
    session.respond(Html(include_str!("../../static/index.html")))
}

/// GET /api/defaults
async fn api_defaults(State(state): State<Arc<AppState>>) -> Json<DefaultsResponse> {
    let d = &state.defaults;
    Json(DefaultsResponse {
        srt_id: d.srt_id.clone(),
        has_password: !d.srt_password.is_empty(),
        phone_number: d.phone_number.clone(),
        telegram_chat_id: d.chat_id.clone(),
        has_bot_token: !d.bot_token.is_empty(),
    })
}

/// POST /api/reservation：200 已启动 / 409 已在运行 / 400 表单无效
async fn api_reservation(
    State(state): State<Arc<AppState>>,
    session: Session,
    Form(form): Form<ReservationForm>,
) -> Response {
    let request = match form.into_request(&state.defaults) {
        Ok(request) => request,
        Err(e) => {
            tracing::info!("rejected reservation form: {}", e);
            return session.respond((StatusCode::BAD_REQUEST, Json(MessageResponse::new(e.to_string()))));
        }
    };

    let result = state.registry.start(session.key().clone(), request).await;
    let resp = match result {
        Ok(started) => (
            StatusCode::OK,
            Json(MessageResponse {
                message: "예약 프로세스가 시작되었습니다.".to_string(),
                worker_id: Some(started.worker_id),
            }),
        ),
        Err(RegistryError::AlreadyRunning(_)) => (
            StatusCode::CONFLICT,
            Json(MessageResponse::new("이미 예약 프로세스가 실행 중입니다.")),
        ),
        Err(e @ RegistryError::ShuttingDown) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(MessageResponse::new(e.to_string())),
        ),
    };
    session.respond(resp)
}

/// POST /api/stop
async fn api_stop(State(state): State<Arc<AppState>>, session: Session) -> Response {
    let found = state
        .registry
        .request_stop(session.key(), StopReason::Requested)
        .await;
    if !found {
        tracing::debug!("stop for session {} without a worker", session.key());
    }
    session.respond(Json(MessageResponse::new("예약 프로세스가 중단되었습니다.")))
}

/// POST /api/heartbeat
async fn api_heartbeat(State(state): State<Arc<AppState>>, session: Session) -> Response {
    state.registry.touch(session.key()).await;
    session.respond(StatusCode::NO_CONTENT)
}

#[derive(Debug, Serialize)]
pub struct MessagesResponse {
    pub messages: Vec<String>,
}

/// GET /api/messages
async fn api_messages(State(state): State<Arc<AppState>>, session: Session) -> Response {
    let messages = state.registry.messages(session.key()).await;
    session.respond(Json(MessagesResponse { messages }))
}

/// GET /api/status：没有 Worker 时为 null
async fn api_status(State(state): State<Arc<AppState>>, session: Session) -> Response {
    let status: Option<WorkerStatus> = state.registry.status(session.key()).await;
    session.respond(Json(status))
}

/// GET /stream：`event: status` 为普通文本，`event: sentinel` 为终止标记
async fn stream_events(State(state): State<Arc<AppState>>, session: Session) -> Response {
    let consumer = StreamConsumer::new(Arc::clone(&state.registry), session.key().clone());
    let sse = Sse::new(event_stream(consumer, state.shutdown.clone())).keep_alive(
        KeepAlive::new()
            .interval(std::time::Duration::from_secs(15))
            .text("keepalive"),
    );
    session.respond(sse)
}

fn event_stream(
    consumer: StreamConsumer,
    shutdown: CancellationToken,
) -> impl Stream<Item = Result<Event, Infallible>> {
    stream::unfold((consumer, shutdown), |(mut consumer, shutdown)| async move {
        let ev = tokio::select! {
            _ = shutdown.cancelled() => None,
            ev = consumer.next_event() => Some(ev),
        }?;
        let event = Event::default().event(ev.sse_name()).data(ev.payload());
        Some((Ok(event), (consumer, shutdown)))
    })
}
