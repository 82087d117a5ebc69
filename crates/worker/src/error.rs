//! worker 错误类型
//!
//! 按处理结果划分错误：
//! - `ValidationError`：负载格式或语义非法，重投也无法修复，直接丢弃
//! - `StoreError`：持久化失败，区分可重试、终止拒绝和致命三类
//! - `WorkerError`：broker 连接级故障，向上传播给 supervisor 整体重启

use std::time::Duration;

use sqlx::error::ErrorKind;
use thiserror::Error;

/// 消息解码/校验失败
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("负载解码失败: {0}")]
    Decode(String),

    #[error("事件类型不匹配: 期望 {expected}, 实际 {actual:?}")]
    WrongType {
        expected: &'static str,
        actual: String,
    },

    #[error("无效的 UUID 字段: {field}={value:?}")]
    BadId { field: &'static str, value: String },

    #[error("token 数不能为负: input={input}, output={output}")]
    NegativeTokens { input: i64, output: i64 },

    #[error("缺少必填字段: {0}")]
    MissingField(&'static str),
}

impl ValidationError {
    /// 稳定的原因标识，用于日志与指标
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Decode(_) => "decode",
            Self::WrongType { .. } => "wrong_type",
            Self::BadId { .. } => "bad_id",
            Self::NegativeTokens { .. } => "negative_tokens",
            Self::MissingField(_) => "missing_field",
        }
    }
}

/// 持久化失败
#[derive(Debug, Error)]
pub enum StoreError {
    /// 瞬时故障（连接中断、约束冲突、事务失败），消息应重新投递
    #[error("持久化失败，可重试: {0}")]
    Retriable(#[source] sqlx::Error),

    /// 引用的用户已不存在，重试永远无法成功
    #[error("引用的用户不存在，事件被拒绝: {0}")]
    Rejected(#[source] sqlx::Error),

    /// 连接池已关闭，当前消费循环无法继续
    #[error("数据库连接池已关闭: {0}")]
    Fatal(#[source] sqlx::Error),

    /// 解码 + 持久化超出时间预算，按可重试处理
    #[error("消息处理超时: {0:?}")]
    Timeout(Duration),
}

impl StoreError {
    /// 用量事件事务中的任何失败都应重投
    pub fn from_usage_failure(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolClosed => Self::Fatal(err),
            other => Self::Retriable(other),
        }
    }

    /// 审计事件：user_id 外键失效属于终止拒绝，其余按可重试处理
    pub fn from_audit_failure(err: sqlx::Error) -> Self {
        let fk_violation = matches!(
            &err,
            sqlx::Error::Database(db) if db.kind() == ErrorKind::ForeignKeyViolation
        );
        if fk_violation {
            return Self::Rejected(err);
        }
        Self::from_usage_failure(err)
    }

    /// 是否应丢弃消息而不重投
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Rejected(_))
    }

    /// 是否需要终止当前消费循环
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_))
    }
}

/// 消费循环级别的错误，出现时循环退出并交由 supervisor 延迟重启
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("RabbitMQ 错误: {0}")]
    Broker(#[from] lapin::Error),

    #[error("消息流意外关闭: queue={queue}")]
    StreamClosed { queue: String },

    #[error("接收消息失败: queue={queue}, 原因={reason}")]
    Consume { queue: String, reason: String },

    #[error("消息确认失败: {0}")]
    Ack(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}
