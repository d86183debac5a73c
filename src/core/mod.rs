//! 核心层：会话注册表、预约 Worker 状态机、事件通道、心跳回收与关闭

pub mod error;
pub mod events;
pub mod liveness;
pub mod recovery;
pub mod registry;
pub mod shutdown;
pub mod state;
pub mod stream;
pub mod worker;

pub use error::RegistryError;
pub use events::{EventChannel, Sentinel, StreamEvent, DEFAULT_EVENT_CAPACITY};
pub use liveness::LivenessMonitor;
pub use recovery::{classify, classify_text, FailureClass, RecoveryAction, RecoveryEngine};
pub use registry::{Started, WorkerRegistry};
pub use shutdown::{RegistryCleanup, ShutdownCoordinator, ShutdownManager, ShutdownReason};
pub use state::{SessionKey, StopReason, WorkerPhase, WorkerState, WorkerStatus};
pub use stream::{StreamConsumer, STREAM_POLL_INTERVAL};
pub use worker::{ReservationWorker, WorkerSettings, PARSE_ERROR_MESSAGE};
