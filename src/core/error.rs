//! 注册表错误

use thiserror::Error;

use crate::core::state::SessionKey;

/// WorkerRegistry 同步返回的错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// 该会话已有未停止的 Worker
    #[error("a reservation worker is already running for session {0}")]
    AlreadyRunning(SessionKey),

    /// 进程正在关闭，不再接受新的 Worker
    #[error("registry is shutting down")]
    ShuttingDown,
}
