/// 分发引擎（内存版）示例
/// 展示 Bus -> Dispatcher -> Handlers -> ConsumeRecord 的闭环，以及失败后按退避策略重放
use anyhow::Result as AnyResult;
use async_trait::async_trait;
use eventrelay_domain::codec::JsonCodec;
use eventrelay_domain::context::ExecutionContext;
use eventrelay_domain::event::{DomainEvent, Event, EventEnvelope, TypeRegistry};
use eventrelay_domain::eventing::{
    DispatchEngine, DispatchEngineConfig, EventBus, EventDispatcher, EventHandler,
    ExponentialBackoff, HandledEventType, InMemoryEventBus, RetryScheduler, RetryStrategy,
};
use eventrelay_domain::persist::InMemoryConsumeRecordStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ============================================================================
// 领域事件
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
struct UserCreated {
    user_id: String,
    email: String,
}

impl DomainEvent for UserCreated {
    const EVENT_TYPE: &'static str = "user.created";
    const DESCRIPTION: &'static str = "user account created";
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct UserDeleted {
    user_id: String,
}

impl DomainEvent for UserDeleted {
    const EVENT_TYPE: &'static str = "user.deleted";
    const MAX_RETRIES: Option<u32> = Some(3);
}

// ============================================================================
// 示例处理器
// ============================================================================

struct PrintHandler;

#[async_trait]
impl EventHandler for PrintHandler {
    fn handler_name(&self) -> &str {
        "printer"
    }
    fn handled_event_type(&self) -> HandledEventType {
        HandledEventType::All
    }
    async fn handle(&self, event: &Event) -> anyhow::Result<()> {
        println!(
            "handler=printer type={} id={} trace={:?} payload={:?}",
            event.event_type(),
            event.id(),
            ExecutionContext::current_trace_id(),
            event.payload()
        );
        Ok(())
    }
}

/// 前两次失败，第三次成功
#[derive(Default)]
struct FlakyMailer {
    calls: AtomicUsize,
}

#[async_trait]
impl EventHandler for FlakyMailer {
    fn handler_name(&self) -> &str {
        "mailer"
    }
    fn handled_event_type(&self) -> HandledEventType {
        HandledEventType::Many(vec![
            UserCreated::EVENT_TYPE.to_string(),
            UserDeleted::EVENT_TYPE.to_string(),
        ])
    }
    async fn handle(&self, event: &Event) -> anyhow::Result<()> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if n <= 2 {
            anyhow::bail!("smtp timeout (attempt {n})");
        }
        if let Some(created) = event.payload_as::<UserCreated>() {
            println!("handler=mailer welcome mail sent to {}", created.email);
        }
        Ok(())
    }
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> AnyResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    println!("=== 分发引擎（内存版）示例 ===\n");

    let registry = Arc::new(
        TypeRegistry::builder()
            .codec(JsonCodec)
            .register::<UserCreated>()
            .register::<UserDeleted>()
            .build()?,
    );
    let store = Arc::new(InMemoryConsumeRecordStore::new());
    let bus = Arc::new(InMemoryEventBus::new(1024));

    let handlers: Vec<Arc<dyn EventHandler>> =
        vec![Arc::new(PrintHandler), Arc::new(FlakyMailer::default())];

    let dispatcher = Arc::new(
        EventDispatcher::builder()
            .registry(registry)
            .store(store.clone())
            .retry_strategy(RetryStrategy::ExponentialBackoff(ExponentialBackoff::new(
                vec![Duration::from_millis(200), Duration::from_millis(400)],
            )?))
            .event_handlers(handlers)
            .build(),
    );
    let engine = Arc::new(
        DispatchEngine::builder()
            .event_bus(bus.clone())
            .scheduler(Arc::new(
                RetryScheduler::builder().dispatcher(dispatcher.clone()).build(),
            ))
            .config(DispatchEngineConfig {
                retry_interval: Duration::from_millis(100),
                listener_concurrency: 16,
            })
            .build(),
    );

    let handle = engine.start();
    println!("✅ 引擎已启动");
    tokio::time::sleep(Duration::from_millis(50)).await;

    ExecutionContext::for_user("u-1", "trace-demo-1")
        .call(async {
            let created = Event::new(UserCreated {
                user_id: "u-1".into(),
                email: "alice@example.com".into(),
            });
            // 先登记消费记录，总线丢失时由调度器补发
            dispatcher.enroll(&created).await?;
            bus.publish(EventEnvelope::capture(created)).await
        })
        .await?;
    println!("✅ 发布事件: user.created");

    tokio::time::sleep(Duration::from_secs(2)).await;
    handle.shutdown();
    handle.join().await;

    println!("\n=== 消费记录 ===");
    for record in store.records()? {
        println!(
            "event={} type={} status={} attempts={}/{} message={:?}",
            record.event_id(),
            record.event_type(),
            record.status(),
            record.retry_count(),
            record.max_retry_times(),
            record.message()
        );
    }
    println!("\n✅ 优雅关闭完成");
    Ok(())
}
