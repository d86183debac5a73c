//! 优雅关闭
//!
//! Ctrl+C / SIGTERM 触发关闭令牌：HTTP 服务停止接受连接，心跳回收退出，
//! 然后由 ShutdownCoordinator 依次执行清理任务（停止全部 Worker 并等待登出）。

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::core::registry::WorkerRegistry;

/// 关闭原因
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownReason {
    /// Ctrl+C
    UserInitiated,
    /// SIGTERM
    Signal,
    FatalError(String),
}

/// 关闭信号管理器
#[derive(Clone, Default)]
pub struct ShutdownManager {
    shutdown_token: CancellationToken,
}

impl ShutdownManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// 关闭令牌（后台任务据此退出）
    pub fn token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    pub fn shutdown(&self, reason: ShutdownReason) {
        if !self.shutdown_token.is_cancelled() {
            tracing::info!("shutdown requested: {:?}", reason);
        }
        self.shutdown_token.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown_token.is_cancelled()
    }

    pub async fn wait_for_shutdown(&self) {
        self.shutdown_token.cancelled().await;
    }

    /// 安装系统信号处理器 (Ctrl+C, SIGTERM)
    pub fn install_signal_handlers(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            if let Ok(()) = tokio::signal::ctrl_c().await {
                tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
                manager.shutdown(ShutdownReason::UserInitiated);
            }
        });

        #[cfg(unix)]
        {
            let manager = Arc::clone(self);
            tokio::spawn(async move {
                use tokio::signal::unix::{signal, SignalKind};
                if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                    sigterm.recv().await;
                    tracing::info!("Received SIGTERM, initiating graceful shutdown...");
                    manager.shutdown(ShutdownReason::Signal);
                }
            });
        }
    }
}

/// 关闭时执行的清理任务
#[async_trait::async_trait]
pub trait ShutdownCleanup: Send + Sync {
    async fn cleanup(&self) -> anyhow::Result<()>;

    /// 用于日志
    fn name(&self) -> &'static str;
}

/// 依次执行清理任务，每个任务有超时
pub struct ShutdownCoordinator {
    manager: Arc<ShutdownManager>,
    cleanup_tasks: Vec<Arc<dyn ShutdownCleanup>>,
    timeout: Duration,
}

impl ShutdownCoordinator {
    pub fn new(manager: Arc<ShutdownManager>) -> Self {
        Self {
            manager,
            cleanup_tasks: Vec::new(),
            timeout: Duration::from_secs(5),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn register<T: ShutdownCleanup + 'static>(&mut self, task: T) {
        self.cleanup_tasks.push(Arc::new(task));
    }

    pub async fn run_cleanup(&self) {
        tracing::info!("Running {} cleanup tasks...", self.cleanup_tasks.len());

        for task in &self.cleanup_tasks {
            let name = task.name();
            match tokio::time::timeout(self.timeout, task.cleanup()).await {
                Ok(Ok(())) => tracing::info!("Cleanup task '{}' completed", name),
                Ok(Err(e)) => tracing::warn!("Cleanup task '{}' failed: {}", name, e),
                Err(_) => tracing::warn!("Cleanup task '{}' timed out after {:?}", name, self.timeout),
            }
        }
    }

    pub fn manager(&self) -> &Arc<ShutdownManager> {
        &self.manager
    }
}

/// 停止全部 Worker，并等待它们登出
pub struct RegistryCleanup {
    registry: Arc<WorkerRegistry>,
    grace: Duration,
}

impl RegistryCleanup {
    pub fn new(registry: Arc<WorkerRegistry>, grace: Duration) -> Self {
        Self { registry, grace }
    }
}

#[async_trait::async_trait]
impl ShutdownCleanup for RegistryCleanup {
    async fn cleanup(&self) -> anyhow::Result<()> {
        self.registry.stop_all(self.grace).await;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "WorkerRegistry"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::booking::{Credentials, MockBookingClient};
    use crate::core::state::{SessionKey, StopReason};
    use crate::core::worker::WorkerSettings;
    use crate::integrations::disabled_factory;
    use crate::reservation::{NotificationPrefs, ReservationRequest};

    #[test]
    fn test_shutdown_manager_token() {
        let manager = ShutdownManager::new();
        let token = manager.token();
        assert!(!manager.is_shutdown());
        manager.shutdown(ShutdownReason::UserInitiated);
        assert!(manager.is_shutdown());
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn test_registry_cleanup_stops_workers() {
        let client = MockBookingClient::new();
        let registry = WorkerRegistry::new(
            Arc::new(client.clone()),
            disabled_factory(),
            WorkerSettings::default(),
        );
        let key = SessionKey::new("a");
        let request = ReservationRequest {
            credentials: Credentials::new("user", "pw"),
            departure: "수서".into(),
            arrival: "부산".into(),
            date: "20240315".into(),
            time_start: "080000".into(),
            time_end: "120000".into(),
            phone_number: "010-1234-5678".into(),
            notification: NotificationPrefs::default(),
        };
        registry.start(key.clone(), request).await.unwrap();

        let mut coordinator = ShutdownCoordinator::new(Arc::new(ShutdownManager::new()));
        coordinator.register(RegistryCleanup::new(Arc::clone(&registry), Duration::from_secs(2)));
        coordinator.run_cleanup().await;

        assert_eq!(registry.active_count().await, 0);
        let status = registry.status(&key).await.unwrap();
        assert_eq!(status.stop_reason, Some(StopReason::Shutdown));
        assert_eq!(client.logouts(), 1);
    }
}
