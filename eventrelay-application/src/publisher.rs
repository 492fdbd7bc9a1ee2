//! 事件发布器（EventPublisher）
//!
//! - `publish` / `publish_all`：先写事件存储，再在每个消费组的分发器中登记 CREATED
//!   消费记录，最后以当前执行上下文快照封装信封发布到总线；未注册类型告警后跳过。
//!   登记之后总线即使丢失事件，也会由各消费组的调度器按滞留记录补发；
//! - `run`：在应用上下文对应的执行上下文中执行业务闭包，收集期间 `raise` 的事件，
//!   仅在闭包成功时发布，失败时丢弃。带幂等键的请求只发布一次。
//!
use crate::context::AppContext;
use crate::error::AppResult;
use crate::event_store::{EventStore, StoredEvent};
use bon::Builder;
use eventrelay_domain::context::ExecutionContext;
use eventrelay_domain::event::{Event, EventEnvelope, TypeRegistry};
use eventrelay_domain::eventing::{EventBus, EventDispatcher};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Builder)]
pub struct EventPublisher {
    registry: Arc<TypeRegistry>,
    event_store: Arc<dyn EventStore>,
    event_bus: Arc<dyn EventBus>,
    /// 每个消费组一个分发器
    consumers: Vec<Arc<EventDispatcher>>,
}

impl EventPublisher {
    pub async fn publish(&self, event: Event) -> AppResult<()> {
        self.publish_all(vec![event]).await
    }

    pub async fn publish_all(&self, events: Vec<Event>) -> AppResult<()> {
        self.publish_keyed(events, None).await
    }

    async fn publish_keyed(
        &self,
        events: Vec<Event>,
        idempotency_key: Option<&str>,
    ) -> AppResult<()> {
        let events: Vec<Event> = events
            .into_iter()
            .filter(|event| {
                let known = self.registry.contains(event.event_type());
                if !known {
                    warn!(
                        event_id = event.id(),
                        event_type = event.event_type(),
                        "skipping event of unregistered type"
                    );
                }
                known
            })
            .collect();
        if events.is_empty() {
            return Ok(());
        }

        if let Some(key) = idempotency_key {
            let earlier = self.event_store.find_by_idempotency_key(key).await?;
            if !earlier.is_empty() {
                info!(
                    idempotency_key = key,
                    stored = earlier.len(),
                    discarded = events.len(),
                    "request already published, skipping"
                );
                return Ok(());
            }
        }

        let trace_id = ExecutionContext::current_trace_id();
        let user_id = ExecutionContext::current_user_id();
        let stored = events
            .iter()
            .map(|event| -> AppResult<StoredEvent> {
                Ok(StoredEvent::builder()
                    .event_id(event.id())
                    .event_type(event.event_type())
                    .payload(self.registry.serialize(event)?)
                    .occurred_at(event.occurred_at())
                    .maybe_trace_id(trace_id.clone())
                    .maybe_user_id(user_id.clone())
                    .maybe_idempotency_key(idempotency_key)
                    .build())
            })
            .collect::<AppResult<Vec<_>>>()?;
        self.event_store.append(&stored).await?;

        for event in &events {
            for consumer in &self.consumers {
                consumer.enroll(event).await?;
            }
        }

        for event in events {
            debug!(
                event_id = event.id(),
                event_type = event.event_type(),
                "publishing event"
            );
            let event_id = event.id().to_string();
            if let Err(err) = self.event_bus.publish(EventEnvelope::capture(event)).await {
                // 消费记录已登记，调度器会补发
                warn!(event_id, error = %err, "event bus publish failed");
            }
        }
        Ok(())
    }

    /// 在 `ctx` 对应的执行上下文中执行业务闭包，成功后发布其间收集的事件
    pub async fn run<T, F, Fut>(&self, ctx: &AppContext, body: F) -> AppResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = AppResult<T>>,
    {
        ctx.execution_context()
            .call(async move {
                let result = body().await;
                let events = ExecutionContext::take_events();
                match result {
                    Ok(value) => {
                        self.publish_keyed(events, ctx.idempotency_key.as_deref())
                            .await?;
                        Ok(value)
                    }
                    Err(err) => {
                        if !events.is_empty() {
                            debug!(
                                discarded = events.len(),
                                error = %err,
                                "business operation failed, discarding raised events"
                            );
                        }
                        Err(err)
                    }
                }
            })
            .await
    }
}
