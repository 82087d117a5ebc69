//! 统一错误处理模块
//!
//! 定义基础设施层（配置、数据库、可观测性）共享的错误类型，使用 thiserror 提供良好的错误信息。
//! 业务相关的错误分类（校验失败、可重试、终止拒绝）由 worker crate 自行定义。

use std::time::Duration;

use thiserror::Error;

/// 基础设施错误类型
#[derive(Debug, Error)]
pub enum SharedError {
    // ==================== 数据库错误 ====================
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("数据库健康检查超时: {0:?}")]
    HealthCheckTimeout(Duration),

    // ==================== 配置错误 ====================
    #[error("配置加载失败: {0}")]
    Config(#[from] config::ConfigError),

    #[error("无效的配置项: {field} - {message}")]
    InvalidConfig { field: String, message: String },
}

/// 错误结果类型别名
pub type Result<T> = std::result::Result<T, SharedError>;

impl SharedError {
    /// 获取错误码
    pub fn code(&self) -> &'static str {
        match self {
            Self::Database(_) => "DATABASE_ERROR",
            Self::HealthCheckTimeout(_) => "HEALTH_CHECK_TIMEOUT",
            Self::Config(_) => "CONFIG_ERROR",
            Self::InvalidConfig { .. } => "INVALID_CONFIG",
        }
    }

    /// 是否为可重试错误
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Database(_) | Self::HealthCheckTimeout(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code() {
        let err = SharedError::InvalidConfig {
            field: "rabbitmq.prefetch_count".to_string(),
            message: "必须大于 0".to_string(),
        };
        assert_eq!(err.code(), "INVALID_CONFIG");
        assert_eq!(
            err.to_string(),
            "无效的配置项: rabbitmq.prefetch_count - 必须大于 0"
        );
    }

    #[test]
    fn test_is_retryable() {
        let db_err = SharedError::Database(sqlx::Error::PoolTimedOut);
        assert!(db_err.is_retryable());

        let timeout = SharedError::HealthCheckTimeout(Duration::from_secs(5));
        assert!(timeout.is_retryable());

        let invalid = SharedError::InvalidConfig {
            field: "worker.handle_timeout_ms".to_string(),
            message: "必须大于 0".to_string(),
        };
        assert!(!invalid.is_retryable());
    }
}
