//! Standby Web 服务
//!
//! 启动: cargo run -- [配置文件]
//! 浏览器访问 http://127.0.0.1:5000

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use standby::booking::create_booking_client;
use standby::config::{config_path_from_env, load_config};
use standby::core::{
    LivenessMonitor, RegistryCleanup, ShutdownCoordinator, ShutdownManager, ShutdownReason,
    WorkerRegistry,
};
use standby::integrations::telegram_factory;
use standby::reservation::RequestDefaults;
use standby::web::{create_router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = load_config(config_path_from_env()).context("Failed to load config")?;
    standby::observability::init(&cfg.log.level);

    let shutdown = Arc::new(ShutdownManager::new());
    shutdown.install_signal_handlers();

    let client = create_booking_client(&cfg.booking);
    let registry = WorkerRegistry::new(client, telegram_factory(), cfg.worker.settings());

    let monitor = LivenessMonitor::new(
        Arc::clone(&registry),
        cfg.liveness.check_interval(),
        cfg.liveness.inactivity_timeout(),
    )
    .spawn(shutdown.token());

    let state = Arc::new(AppState::new(
        Arc::clone(&registry),
        RequestDefaults::from(&cfg),
        shutdown.token(),
    ));
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind((cfg.web.host.as_str(), cfg.web.port))
        .await
        .with_context(|| format!("Failed to bind {}:{}", cfg.web.host, cfg.web.port))?;
    tracing::info!("Starting SRT standby service on http://{}:{}", cfg.web.host, cfg.web.port);

    let token = shutdown.token();
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async move { token.cancelled().await })
        .await;
    if let Err(e) = &served {
        shutdown.shutdown(ShutdownReason::FatalError(e.to_string()));
    }

    let _ = monitor.await;

    let mut coordinator =
        ShutdownCoordinator::new(Arc::clone(&shutdown)).with_timeout(Duration::from_secs(10));
    coordinator.register(RegistryCleanup::new(registry, Duration::from_secs(5)));
    coordinator.run_cleanup().await;

    tracing::info!("Shutdown complete");
    served.context("Server error")
}
