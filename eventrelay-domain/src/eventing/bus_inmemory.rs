//! 内存版事件总线（InMemoryEventBus）
//!
//! 基于 `tokio::sync::broadcast` 的轻量实现：
//! - `publish`：广播信封，无订阅者时视为非致命；
//! - `subscribe`：返回 `'static` 信封流，落后过多的订阅者会收到 `EventBus` 错误；
//! - 典型用途：测试环境、示例与本地开发。
//!
//! 总线不做持久化：订阅者落后或未启动时事件会被丢弃。发布前须先经
//! `EventDispatcher::enroll` 登记 CREATED 消费记录，丢失的事件由调度器的滞留扫描重新分发。

use crate::error::{DomainError, DomainResult as Result};
use crate::event::EventEnvelope;
use crate::eventing::EventBus;
use async_trait::async_trait;
use futures_core::stream::BoxStream;
use futures_util::StreamExt;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::trace;

const DEFAULT_CAPACITY: usize = 1024;

#[derive(Clone)]
pub struct InMemoryEventBus {
    tx: broadcast::Sender<EventEnvelope>,
}

impl Default for InMemoryEventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl InMemoryEventBus {
    /// `capacity` 为广播缓冲区容量
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

#[async_trait]
impl EventBus for InMemoryEventBus {
    async fn publish(&self, envelope: EventEnvelope) -> Result<()> {
        let event_id = envelope.event.id().to_string();
        if self.tx.send(envelope).is_err() {
            trace!(event_id, "no subscriber on in-memory bus");
        }
        Ok(())
    }

    async fn subscribe(&self) -> BoxStream<'static, Result<EventEnvelope>> {
        let rx = self.tx.subscribe();
        let stream =
            BroadcastStream::new(rx).map(|r| r.map_err(|e| DomainError::event_bus(e.to_string())));
        Box::pin(stream)
    }
}
