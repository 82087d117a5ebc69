//! 事件消费循环
//!
//! 同一连接、同一通道上订阅用量与审计两个队列，公平地等待任一队列的下一条消息或关闭信号。
//! 消息严格串行处理：解码 -> 持久化 -> 确认/拒绝，处理完一条才会取下一条，
//! prefetch 只限制 broker 侧的未确认积压，不引入并发。

use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use futures::{Stream, StreamExt};
use minichat_shared::config::{AppConfig, RabbitMqConfig};
use minichat_shared::observability::metrics;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::broker::{BrokerSession, InboundDelivery};
use crate::error::{StoreError, ValidationError, WorkerError};
use crate::events::{parse_audit, parse_usage};
use crate::store::EventStore;

/// 消息来源队列
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Usage,
    Audit,
}

impl EventKind {
    fn parse_operation(self) -> &'static str {
        match self {
            Self::Usage => "parse_usage_event",
            Self::Audit => "parse_audit_event",
        }
    }

    fn persist_operation(self) -> &'static str {
        match self {
            Self::Usage => "persist_usage_event",
            Self::Audit => "persist_audit_event",
        }
    }
}

/// 对一条消息的确认方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckDecision {
    /// 确认，消息从队列移除
    Ack,
    /// 拒绝并重新入队
    Requeue,
    /// 拒绝且不重新入队，消息被丢弃
    Drop,
}

impl AckDecision {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ack => "ack",
            Self::Requeue => "requeue",
            Self::Drop => "drop",
        }
    }
}

/// 单条消息的处理结果
#[derive(Debug)]
pub enum Outcome {
    Committed,
    Invalid(ValidationError),
    Failed(StoreError),
}

impl Outcome {
    /// 根据处理结果决定确认方式
    ///
    /// - 格式非法：丢弃，重投也无法修复
    /// - 终止拒绝（引用的用户已不存在）：丢弃
    /// - 其他持久化失败（含超时、连接池关闭）：重新入队
    pub fn decision(&self) -> AckDecision {
        match self {
            Self::Committed => AckDecision::Ack,
            Self::Invalid(_) => AckDecision::Drop,
            Self::Failed(e) if e.is_terminal() => AckDecision::Drop,
            Self::Failed(_) => AckDecision::Requeue,
        }
    }
}

/// 用量/审计事件消费者
///
/// 由 supervisor 持有并反复调用 `run`，每次调用对应一次完整的连接生命周期。
pub struct EventConsumer {
    rabbitmq: RabbitMqConfig,
    handle_timeout: Duration,
    store: Arc<dyn EventStore>,
}

impl EventConsumer {
    pub fn new(config: &AppConfig, store: Arc<dyn EventStore>) -> Self {
        Self {
            rabbitmq: config.rabbitmq.clone(),
            handle_timeout: config.worker.handle_timeout(),
            store,
        }
    }

    /// 建立连接并消费，直到收到关闭信号（返回 Ok）或连接级故障（返回 Err）
    ///
    /// 连接失败直接返回错误，不在内部重试。无论结果如何都会关闭通道与连接。
    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> Result<(), WorkerError> {
        let session = BrokerSession::connect(&self.rabbitmq).await?;
        let result = self.subscribe_and_consume(&session, shutdown).await;
        session.close().await;
        result
    }

    async fn subscribe_and_consume(
        &self,
        session: &BrokerSession,
        shutdown: watch::Receiver<bool>,
    ) -> Result<(), WorkerError> {
        session.prepare(&self.rabbitmq).await?;
        let usage = session.consume(&self.rabbitmq.usage_queue).await?;
        let audit = session.consume(&self.rabbitmq.audit_queue).await?;

        info!(
            usage_queue = %self.rabbitmq.usage_queue,
            audit_queue = %self.rabbitmq.audit_queue,
            prefetch = self.rabbitmq.prefetch_count,
            "worker 消费者已启动"
        );

        self.consume_loop(usage, audit, shutdown).await
    }

    /// 多路等待两个订阅流与关闭信号
    ///
    /// 关闭信号只在等待阶段生效，正在处理的消息总会处理完毕。
    /// 任一订阅流结束或出错视为连接丢失，返回错误交由上层重启。
    pub async fn consume_loop<U, A, D, E>(
        &self,
        mut usage: U,
        mut audit: A,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), WorkerError>
    where
        U: Stream<Item = Result<D, E>> + Unpin,
        A: Stream<Item = Result<D, E>> + Unpin,
        D: InboundDelivery,
        E: Display,
    {
        loop {
            if *shutdown.borrow() {
                info!("worker 消费者停止");
                return Ok(());
            }

            tokio::select! {
                // 发送端被释放同样视为关闭
                _ = shutdown.wait_for(|stopped| *stopped) => {
                    info!("worker 消费者停止");
                    return Ok(());
                }
                next = usage.next() => self.on_next(EventKind::Usage, next).await?,
                next = audit.next() => self.on_next(EventKind::Audit, next).await?,
            }
        }
    }

    async fn on_next<D, E>(
        &self,
        kind: EventKind,
        next: Option<Result<D, E>>,
    ) -> Result<(), WorkerError>
    where
        D: InboundDelivery,
        E: Display,
    {
        match next {
            Some(Ok(delivery)) => self.dispatch(kind, delivery).await,
            Some(Err(e)) => Err(WorkerError::Consume {
                queue: self.queue_name(kind).to_string(),
                reason: e.to_string(),
            }),
            None => Err(WorkerError::StreamClosed {
                queue: self.queue_name(kind).to_string(),
            }),
        }
    }

    /// 处理一条消息并完成确认
    ///
    /// 确认本身失败只记录日志，消息去向交给 broker 的超时机制。
    /// 只有连接池关闭这类致命错误会让循环退出。
    async fn dispatch<D: InboundDelivery>(
        &self,
        kind: EventKind,
        delivery: D,
    ) -> Result<(), WorkerError> {
        let started = Instant::now();
        let outcome = self.process(kind, delivery.body()).await;
        let elapsed = started.elapsed();
        let decision = outcome.decision();

        let operation = match &outcome {
            Outcome::Committed => {
                debug!(queue = self.queue_name(kind), "消息处理成功");
                None
            }
            Outcome::Invalid(e) => {
                error!(
                    operation = kind.parse_operation(),
                    requeue = false,
                    reason = e.reason(),
                    error = %e,
                    "消息处理失败"
                );
                Some(kind.parse_operation())
            }
            Outcome::Failed(e) => {
                error!(
                    operation = kind.persist_operation(),
                    requeue = decision == AckDecision::Requeue,
                    error = %e,
                    "消息处理失败"
                );
                Some(kind.persist_operation())
            }
        };

        let settled = match decision {
            AckDecision::Ack => delivery.ack().await,
            AckDecision::Requeue => delivery.nack(true).await,
            AckDecision::Drop => delivery.nack(false).await,
        };
        if let Err(e) = settled {
            warn!(
                queue = self.queue_name(kind),
                operation = operation.unwrap_or("ack"),
                decision = decision.as_str(),
                error = %e,
                "消息确认失败"
            );
        }

        // 耗时只覆盖解码与持久化，不含确认往返
        metrics::record_message(self.queue_name(kind), decision.as_str(), elapsed.as_secs_f64());

        match outcome {
            Outcome::Failed(e) if e.is_fatal() => Err(WorkerError::Store(e)),
            _ => Ok(()),
        }
    }

    /// 在时间预算内解码并持久化一条消息
    ///
    /// 超时按可重试失败处理。
    pub async fn process(&self, kind: EventKind, body: &[u8]) -> Outcome {
        match tokio::time::timeout(self.handle_timeout, self.decode_and_commit(kind, body)).await {
            Ok(outcome) => outcome,
            Err(_) => Outcome::Failed(StoreError::Timeout(self.handle_timeout)),
        }
    }

    async fn decode_and_commit(&self, kind: EventKind, body: &[u8]) -> Outcome {
        let committed = match kind {
            EventKind::Usage => match parse_usage(body) {
                Ok(event) => self.store.commit_usage(&event).await,
                Err(e) => return Outcome::Invalid(e),
            },
            EventKind::Audit => match parse_audit(body) {
                Ok(event) => self.store.commit_audit(&event).await,
                Err(e) => return Outcome::Invalid(e),
            },
        };

        match committed {
            Ok(()) => Outcome::Committed,
            Err(e) => Outcome::Failed(e),
        }
    }

    fn queue_name(&self, kind: EventKind) -> &str {
        match kind {
            EventKind::Usage => &self.rabbitmq.usage_queue,
            EventKind::Audit => &self.rabbitmq.audit_queue,
        }
    }
}
