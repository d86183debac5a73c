//! Standby - SRT 예약대기（候补）自动申请
//!
//! 模块划分：
//! - **booking**: 订票后端抽象与实现（SRT / Mock）
//! - **config**: 应用配置加载（TOML / INI + 环境变量）
//! - **core**: 会话注册表、预约 Worker 状态机、事件通道、心跳回收、优雅关闭
//! - **integrations**: 外部通知（Telegram）
//! - **observability**: 日志初始化
//! - **reservation**: 预约表单解析与校验
//! - **web**: axum 路由与 SSE 事件流（feature `web`）

pub mod booking;
pub mod config;
pub mod core;
pub mod integrations;
pub mod observability;
pub mod reservation;
#[cfg(feature = "web")]
pub mod web;

pub use crate::core::{RegistryError, SessionKey, WorkerRegistry, WorkerSettings};
pub use reservation::{ReservationForm, ReservationRequest};
