//! minichat 事件 worker
//!
//! 消费用量/审计事件并持久化到 PostgreSQL。

use std::sync::Arc;

use anyhow::Result;
use minichat_shared::{config::AppConfig, database::Database, observability};
use tokio::signal;
use tokio::sync::watch;
use tracing::{info, warn};

use minichat_worker::{
    consumer::EventConsumer,
    store::PgEventStore,
    supervisor::{SupervisorExit, supervise},
};

const SERVICE_NAME: &str = "minichat-worker";

#[tokio::main]
async fn main() -> Result<()> {
    // 1. 加载配置：配置文件 + 环境变量
    let config = AppConfig::load(SERVICE_NAME)?;

    // 2. 初始化日志与指标
    let _guard = observability::init(&config.service_name, &config.observability).await?;

    info!(
        environment = %config.environment,
        usage_queue = %config.rabbitmq.usage_queue,
        audit_queue = %config.rabbitmq.audit_queue,
        "Starting minichat-worker..."
    );

    // 3. 连接数据库，不可达时直接退出
    let db = Database::connect(&config.database).await?;
    info!("Database connection established");

    // 4. 组装消费者
    let store = Arc::new(PgEventStore::new(db.pool().clone()));
    let consumer = EventConsumer::new(&config, store);

    // 5. 关闭信号 -> watch channel
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    // 6. 运行直到关闭
    let exit = supervise(config.worker.retry_delay(), shutdown_rx, |rx| consumer.run(rx)).await;
    match exit {
        SupervisorExit::Completed => info!("worker exited gracefully"),
        SupervisorExit::Cancelled => info!("worker stopped"),
    }

    db.close().await;
    info!("Service shutdown complete");
    Ok(())
}

/// 优雅关闭信号处理
///
/// 监听 Ctrl+C 和 SIGTERM 信号，用于 Kubernetes 优雅关闭
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, starting graceful shutdown...");
        }
    }
}
