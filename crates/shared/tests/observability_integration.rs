//! 可观测性模块集成测试
//!
//! 全局 recorder 只能安装一次，因此放在独立的测试二进制中。

use minichat_shared::observability::metrics;
use minichat_shared::observability::tracing::{build_env_filter, normalize_level};

#[tokio::test]
async fn test_metrics_rendered_after_init() {
    // 端口 0 由系统分配，避免与本机服务冲突
    let _handle = metrics::init("minichat-worker-test", 0)
        .await
        .expect("初始化指标失败");

    metrics::record_message("usage_event", "ack", 0.012);
    metrics::record_message("usage_event", "requeue", 0.5);
    metrics::record_message("audit_event", "drop", 0.001);
    metrics::record_loop_restart();

    let rendered = metrics::get_handle().expect("handle 未注册").render();

    assert!(rendered.contains("worker_messages_total"));
    assert!(rendered.contains(r#"outcome="requeue""#));
    assert!(rendered.contains(r#"queue="audit_event""#));
    assert!(rendered.contains("worker_message_duration_seconds"));
    assert!(rendered.contains("worker_loop_restarts_total"));
    assert!(rendered.contains(r#"service="minichat-worker-test""#));
}

#[test]
fn test_log_level_normalization() {
    assert_eq!(normalize_level("WARNING"), "warn");
    assert_eq!(normalize_level("debug"), "debug");
    assert_eq!(normalize_level("verbose"), "info");

    // 构造过滤器不应 panic
    let _ = build_env_filter("error");
}
