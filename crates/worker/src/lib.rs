//! minichat 事件 worker
//!
//! 从 RabbitMQ 消费用量事件与审计事件，校验后事务性写入 PostgreSQL，
//! 再根据处理结果确认、重新入队或丢弃消息。
//! 连接级故障时消费循环整体退出，由 supervisor 延迟后重启。

pub mod broker;
pub mod consumer;
pub mod error;
pub mod events;
pub mod store;
pub mod supervisor;
