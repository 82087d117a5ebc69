//! 消费循环守护
//!
//! 循环因连接级故障退出时，等待固定间隔后重新启动；收到关闭信号后不再重启。
//! 等待期间同时监听关闭信号，保证重启不会与关闭流程竞争。

use std::future::Future;
use std::time::Duration;

use minichat_shared::observability::metrics;
use tokio::sync::watch;
use tracing::{error, info};

use crate::error::WorkerError;

/// supervisor 的退出原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorExit {
    /// 消费循环正常结束
    Completed,
    /// 在重启等待期间或启动前收到关闭信号
    Cancelled,
}

/// 持续运行 `run_once` 直到其正常结束或收到关闭信号
///
/// `run_once` 每次调用都会拿到一份关闭信号的接收端。
pub async fn supervise<F, Fut>(
    retry_delay: Duration,
    mut shutdown: watch::Receiver<bool>,
    mut run_once: F,
) -> SupervisorExit
where
    F: FnMut(watch::Receiver<bool>) -> Fut,
    Fut: Future<Output = Result<(), WorkerError>>,
{
    loop {
        if *shutdown.borrow() {
            info!("worker 已停止");
            return SupervisorExit::Cancelled;
        }

        match run_once(shutdown.clone()).await {
            Ok(()) => {
                info!("worker 正常退出");
                return SupervisorExit::Completed;
            }
            Err(e) => {
                error!(
                    error = %e,
                    retry_delay_ms = retry_delay.as_millis() as u64,
                    "消费循环失败，稍后重试"
                );
                metrics::record_loop_restart();
            }
        }

        tokio::select! {
            _ = shutdown.wait_for(|stopped| *stopped) => {
                info!("等待重试期间收到关闭信号，worker 已停止");
                return SupervisorExit::Cancelled;
            }
            _ = tokio::time::sleep(retry_delay) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn stream_closed() -> WorkerError {
        WorkerError::StreamClosed {
            queue: "usage_event".to_string(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_restarts_after_failure_until_success() {
        let attempts = Arc::new(AtomicU32::new(0));
        let (_tx, rx) = watch::channel(false);
        let started = tokio::time::Instant::now();

        let counter = attempts.clone();
        let exit = supervise(Duration::from_secs(5), rx, move |_| {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(stream_closed())
                } else {
                    Ok(())
                }
            }
        })
        .await;

        assert_eq!(exit, SupervisorExit::Completed);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        // 两次失败各等待一次重试间隔
        assert!(started.elapsed() >= Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_retry_delay_stops_restarts() {
        let attempts = Arc::new(AtomicU32::new(0));
        let (tx, rx) = watch::channel(false);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            tx.send(true).unwrap();
            tokio::time::sleep(Duration::from_secs(600)).await;
        });

        let counter = attempts.clone();
        let exit = supervise(Duration::from_secs(30), rx, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err(stream_closed()) }
        })
        .await;

        assert_eq!(exit, SupervisorExit::Cancelled);
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_started_when_already_cancelled() {
        let (_tx, rx) = watch::channel(true);
        let mut called = false;

        let exit = supervise(Duration::from_secs(1), rx, |_| {
            called = true;
            async { Ok(()) }
        })
        .await;

        assert_eq!(exit, SupervisorExit::Cancelled);
        assert!(!called);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_once_receives_shutdown_signal() {
        let (tx, rx) = watch::channel(false);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            tx.send(true).unwrap();
            tokio::time::sleep(Duration::from_secs(600)).await;
        });

        let exit = supervise(Duration::from_secs(1), rx, |mut shutdown| async move {
            // 模拟消费循环：阻塞直到收到关闭信号
            let _ = shutdown.wait_for(|stopped| *stopped).await;
            Ok(())
        })
        .await;

        assert_eq!(exit, SupervisorExit::Completed);
    }
}
