//! 事件持久化
//!
//! 每种事件对应一个写操作：用量事件写流水并累加日汇总，审计事件追加审计日志。
//! worker 只写不读，失败统一转换为 `StoreError` 交给消费循环决定确认方式。

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::{info, instrument};

use crate::error::StoreError;
use crate::events::{AuditEvent, UsageEvent};

/// 事件存储接口
///
/// 消费循环依赖该抽象，便于在测试中替换为 mock。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EventStore: Send + Sync {
    /// 在同一事务内写入用量流水并累加当日汇总
    async fn commit_usage(&self, event: &UsageEvent) -> Result<(), StoreError>;

    /// 追加一条审计日志
    async fn commit_audit(&self, event: &AuditEvent) -> Result<(), StoreError>;
}

/// PostgreSQL 事件存储
pub struct PgEventStore {
    pool: PgPool,
}

impl PgEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn insert_usage(&self, event: &UsageEvent) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO usage_events (user_id, generation_id, input_tokens, output_tokens, model)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(event.user_id)
        .bind(event.generation_id)
        .bind(event.input_tokens)
        .bind(event.output_tokens)
        .bind(&event.model)
        .execute(&mut *tx)
        .await?;

        // 日汇总按累加方式更新，重复投递会重复计数（至少一次语义）
        sqlx::query(
            r#"
            INSERT INTO daily_usage (user_id, day, input_tokens, output_tokens)
            VALUES ($1, CURRENT_DATE, $2, $3)
            ON CONFLICT (user_id, day) DO UPDATE SET
                input_tokens = daily_usage.input_tokens + EXCLUDED.input_tokens,
                output_tokens = daily_usage.output_tokens + EXCLUDED.output_tokens
            "#,
        )
        .bind(event.user_id)
        .bind(event.input_tokens)
        .bind(event.output_tokens)
        .execute(&mut *tx)
        .await?;

        // 提交前的任何失败都会在 tx drop 时回滚
        tx.commit().await
    }
}

#[async_trait]
impl EventStore for PgEventStore {
    #[instrument(skip_all, fields(user_id = %event.user_id, generation_id = %event.generation_id))]
    async fn commit_usage(&self, event: &UsageEvent) -> Result<(), StoreError> {
        self.insert_usage(event)
            .await
            .map_err(StoreError::from_usage_failure)?;

        info!(
            input_tokens = event.input_tokens,
            output_tokens = event.output_tokens,
            model = %event.model,
            "用量事件已持久化"
        );
        Ok(())
    }

    #[instrument(skip_all, fields(action = %event.action))]
    async fn commit_audit(&self, event: &AuditEvent) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO audit_logs (user_id, action, metadata_json)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(event.user_id)
        .bind(&event.action)
        .bind(&event.metadata)
        .execute(&self.pool)
        .await
        .map_err(StoreError::from_audit_failure)?;

        info!(user_id = ?event.user_id, "审计事件已持久化");
        Ok(())
    }
}
