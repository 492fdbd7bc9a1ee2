//! 事件总线（EventBus）协议
//!
//! 发布方把事件连同提交时的执行上下文封装为 `EventEnvelope` 发布，
//! 订阅方得到 'static 生命周期的信封流，便于在 tokio::spawn 中消费。
//!
use crate::error::DomainResult as Result;
use crate::event::EventEnvelope;
use async_trait::async_trait;
use futures_core::stream::BoxStream;

/// 事件总线：负责分发事件与订阅事件流
#[async_trait]
pub trait EventBus: Send + Sync {
    async fn publish(&self, envelope: EventEnvelope) -> Result<()>;

    async fn publish_batch(&self, envelopes: Vec<EventEnvelope>) -> Result<()> {
        for envelope in envelopes {
            self.publish(envelope).await?;
        }
        Ok(())
    }

    /// 返回一个 'static 生命周期的信封流
    async fn subscribe(&self) -> BoxStream<'static, Result<EventEnvelope>>;
}
