//! 心跳回收
//!
//! 定期扫描注册表的 lastSeen，超时的会话走与主动停止相同的 stop + cleanup 路径，
//! 终止哨兵为 CONNECTION_LOST。

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::core::registry::WorkerRegistry;
use crate::core::state::SessionKey;

pub struct LivenessMonitor {
    registry: Arc<WorkerRegistry>,
    check_interval: Duration,
    inactivity_timeout: Duration,
}

impl LivenessMonitor {
    pub fn new(registry: Arc<WorkerRegistry>, check_interval: Duration, inactivity_timeout: Duration) -> Self {
        Self {
            registry,
            check_interval,
            inactivity_timeout,
        }
    }

    /// 单次扫描，返回被回收的会话
    pub async fn tick(&self) -> Vec<SessionKey> {
        let reaped = self.registry.reap_inactive(self.inactivity_timeout).await;
        if !reaped.is_empty() {
            tracing::info!("liveness check reaped {} session(s)", reaped.len());
        }
        reaped
    }

    /// 后台运行，直到 shutdown 被取消
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.check_interval);
            // 第一次 tick 立即返回
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = interval.tick() => {
                        self.tick().await;
                    }
                }
            }
            tracing::debug!("liveness monitor stopped");
        })
    }
}
