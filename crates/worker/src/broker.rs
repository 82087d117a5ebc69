//! RabbitMQ 基础设施封装
//!
//! 负责建立连接和通道、声明队列、设置 prefetch 并开启订阅；
//! 同时把 lapin 的投递抽象为 `InboundDelivery`，让消费循环与具体 broker 解耦。

use async_trait::async_trait;
use lapin::{
    Channel, Connection, ConnectionProperties, Consumer,
    message::Delivery,
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicQosOptions,
        QueueDeclareOptions,
    },
    types::FieldTable,
};
use minichat_shared::config::RabbitMqConfig;
use tracing::{debug, info, warn};

use crate::error::WorkerError;

/// 一条待确认的入站消息
#[async_trait]
pub trait InboundDelivery: Send {
    /// 消息负载
    fn body(&self) -> &[u8];

    /// 确认消息，broker 将其从队列移除
    async fn ack(&self) -> Result<(), WorkerError>;

    /// 拒绝消息；`requeue` 为 true 时重新入队等待再次投递
    async fn nack(&self, requeue: bool) -> Result<(), WorkerError>;
}

#[async_trait]
impl InboundDelivery for Delivery {
    fn body(&self) -> &[u8] {
        &self.data
    }

    async fn ack(&self) -> Result<(), WorkerError> {
        self.acker
            .ack(BasicAckOptions::default())
            .await
            .map_err(|e| WorkerError::Ack(e.to_string()))?;
        Ok(())
    }

    async fn nack(&self, requeue: bool) -> Result<(), WorkerError> {
        self.acker
            .nack(BasicNackOptions {
                requeue,
                ..Default::default()
            })
            .await
            .map_err(|e| WorkerError::Ack(e.to_string()))?;
        Ok(())
    }
}

/// 单连接单通道的 RabbitMQ 会话
pub struct BrokerSession {
    connection: Connection,
    channel: Channel,
}

impl BrokerSession {
    /// 建立连接并打开通道
    pub async fn connect(config: &RabbitMqConfig) -> Result<Self, WorkerError> {
        let connection = Connection::connect(&config.url, ConnectionProperties::default()).await?;
        let channel = connection.create_channel().await?;

        info!("RabbitMQ 连接已建立");
        Ok(Self {
            connection,
            channel,
        })
    }

    /// 设置 prefetch 并幂等声明队列
    ///
    /// 队列为持久化、非独占、非自动删除，与发布端的声明保持一致。
    pub async fn prepare(&self, config: &RabbitMqConfig) -> Result<(), WorkerError> {
        self.channel
            .basic_qos(config.prefetch_count, BasicQosOptions::default())
            .await?;

        for queue in [config.usage_queue.as_str(), config.audit_queue.as_str()] {
            self.channel
                .queue_declare(
                    queue,
                    QueueDeclareOptions {
                        durable: true,
                        exclusive: false,
                        auto_delete: false,
                        ..Default::default()
                    },
                    FieldTable::default(),
                )
                .await?;
            debug!(queue, "队列已声明");
        }
        Ok(())
    }

    /// 订阅队列，需要显式确认
    pub async fn consume(&self, queue: &str) -> Result<Consumer, WorkerError> {
        let consumer = self
            .channel
            .basic_consume(
                queue,
                "",
                BasicConsumeOptions {
                    no_ack: false,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;

        info!(queue, "已订阅队列");
        Ok(consumer)
    }

    /// 关闭通道与连接，失败只记录日志
    pub async fn close(self) {
        if let Err(e) = self.channel.close(200, "worker shutdown").await {
            warn!(error = %e, "关闭 RabbitMQ 通道失败");
        }
        if let Err(e) = self.connection.close(200, "worker shutdown").await {
            warn!(error = %e, "关闭 RabbitMQ 连接失败");
        }
        info!("RabbitMQ 连接已关闭");
    }
}
