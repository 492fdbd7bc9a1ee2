//! 事件分发器（EventDispatcher）
//!
//! 对调用方而言是“发出即忘”：处理器错误在这里被吸收并转化为消费记录的
//! 状态迁移，从不向发布方、监听器或调度器抛出。一次尝试的流程：
//! 1. 解析事件类型，未注册则告警并丢弃；
//! 2. 首次分发且来源非内部时忽略；
//! 3. 认领（事件 id, 消费组）的消费记录，不存在则新建；终态、PROCESSING、
//!    租约被他方持有的记录直接跳过，首次分发遇到 RETRYING 记录也跳过，退避由调度器负责；
//! 4. 迁移到 PROCESSING 并递增尝试次数，独立调用所有匹配的处理器；
//! 5. 全部成功 → SUCCESS；任一失败 → 按策略 RETRYING 或 FAILED；
//! 6. 每次尝试恰好一次 upsert。
//!
//! 尝试进行中被取消（分发 future 被丢弃）时按同一策略写回：仍可重试则 RETRYING，
//! 否则 FAILED。
//!
use super::handler::{EventHandler, HandlerRegistry};
use super::retry::RetryStrategy;
use crate::context::ExecutionContext;
use crate::error::{DomainError, DomainResult};
use crate::event::{Event, TypeEntry, TypeRegistry};
use crate::persist::{Claim, ConsumeRecord, ConsumeRecordStore, ConsumeStatus};
use bon::Builder;
use chrono::{DateTime, Utc};
use futures_util::{FutureExt, StreamExt, stream};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tracing::{Instrument, debug, error, info_span, warn};

// 导入由 bon::Builder 生成的 typestate 模块与状态转换别名
use self::event_dispatcher_builder::{IsUnset, SetHandlers, State as BuilderState};

/// 单次分发的结果，供观测与测试使用；分发本身从不返回错误
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// 类型未注册、载荷无法编码或无法重建，事件被丢弃
    Dropped,
    /// 首次分发遇到外部来源事件，忽略
    Ignored,
    /// 记录已处于该状态，不再调用处理器
    Skipped(ConsumeStatus),
    Succeeded,
    Retrying { next_retry_time: DateTime<Utc> },
    Failed,
    /// 读取或写入消费记录失败，本次尝试不被视为成功
    StoreUnavailable,
    /// 分发任务异常终止
    Aborted,
}

/// 分发器配置
#[derive(Clone, Debug)]
pub struct DispatcherConfig {
    /// 消费组，与事件 id 共同构成消费记录的键
    pub consumer_group: String,
    /// 事件与类型均未声明时的最大尝试次数
    pub default_max_retries: u32,
    /// 单个事件的处理器并发
    pub handler_concurrency: usize,
    /// 单个处理器的执行时限，超时计为失败
    pub handler_timeout: Option<Duration>,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            consumer_group: "default".to_string(),
            default_max_retries: 5,
            handler_concurrency: 8,
            handler_timeout: None,
        }
    }
}

#[derive(Builder)]
pub struct EventDispatcher {
    registry: Arc<TypeRegistry>,
    store: Arc<dyn ConsumeRecordStore>,
    #[builder(default)]
    retry_strategy: RetryStrategy,
    #[builder(setters(vis = "pub(crate)"))]
    handlers: HandlerRegistry,
    #[builder(default)]
    config: DispatcherConfig,
}

impl<S: BuilderState> EventDispatcherBuilder<S> {
    pub fn event_handlers(
        self,
        handlers: Vec<Arc<dyn EventHandler>>,
    ) -> EventDispatcherBuilder<SetHandlers<S>>
    where
        <S as BuilderState>::Handlers: IsUnset,
    {
        self.handlers(HandlerRegistry::new(handlers))
    }
}

impl EventDispatcher {
    pub fn registry(&self) -> &Arc<TypeRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<dyn ConsumeRecordStore> {
        &self.store
    }

    pub fn retry_strategy(&self) -> &RetryStrategy {
        &self.retry_strategy
    }

    pub fn consumer_group(&self) -> &str {
        &self.config.consumer_group
    }

    /// 分发事件；`is_retry` 为真表示由重放路径触发
    pub async fn dispatch(&self, event: &Event, is_retry: bool) -> DispatchOutcome {
        let span = info_span!(
            "dispatch",
            event_id = %event.id(),
            event_type = %event.event_type(),
            consumer_group = %self.config.consumer_group,
            is_retry,
        );
        self.dispatch_inner(event, is_retry).instrument(span).await
    }

    /// 对调用方已认领（持有租约）的记录执行一次重试尝试
    pub async fn dispatch_claimed(
        &self,
        event: &Event,
        record: ConsumeRecord,
    ) -> DispatchOutcome {
        let span = info_span!(
            "dispatch",
            event_id = %event.id(),
            event_type = %event.event_type(),
            consumer_group = %self.config.consumer_group,
            is_retry = true,
        );
        self.attempt(event, record).instrument(span).await
    }

    /// 在首次分发之前登记事件，写入 `CREATED` 记录
    ///
    /// 之后即使总线丢失了该事件，调度器也能通过滞留记录重新分发。
    /// 外部来源事件首次分发会被忽略，不登记；已有记录时不覆盖，返回 `false`。
    pub async fn enroll(&self, event: &Event) -> DomainResult<bool> {
        let entry = self.registry.resolve(event.event_type())?;
        if !entry.origin().is_internal() {
            return Ok(false);
        }
        let record = self.new_record(event, entry)?;
        self.store.insert_if_absent(&record).await
    }

    async fn dispatch_inner(&self, event: &Event, is_retry: bool) -> DispatchOutcome {
        let entry = match self.registry.resolve(event.event_type()) {
            Ok(entry) => entry,
            Err(err) => {
                warn!(error = %err, "dropping event of unregistered type");
                return DispatchOutcome::Dropped;
            }
        };

        if !is_retry && !entry.origin().is_internal() {
            debug!(origin = %entry.origin(), "ignoring externally originated event");
            return DispatchOutcome::Ignored;
        }

        let accept: &[ConsumeStatus] = if is_retry {
            &[ConsumeStatus::Created, ConsumeStatus::Retrying]
        } else {
            &[ConsumeStatus::Created]
        };
        let claim = match self
            .store
            .claim(event.id(), &self.config.consumer_group, accept)
            .await
        {
            Ok(claim) => claim,
            Err(err) => {
                error!(error = %err, "failed to claim consume record");
                return DispatchOutcome::StoreUnavailable;
            }
        };

        let record = match claim {
            Claim::Claimed(record) => record,
            Claim::Busy(record) => {
                debug!(
                    status = %record.status(),
                    lease_until = ?record.lease_until(),
                    "consume record not claimable, skipping"
                );
                return DispatchOutcome::Skipped(record.status());
            }
            Claim::Vacant => match self.new_record(event, entry) {
                Ok(record) => record,
                Err(err) => {
                    error!(error = %err, "dropping event whose payload cannot be encoded");
                    return DispatchOutcome::Dropped;
                }
            },
        };

        self.attempt(event, record).await
    }

    async fn attempt(&self, event: &Event, mut record: ConsumeRecord) -> DispatchOutcome {
        if let Err(err) = record.start_attempt() {
            warn!(error = %err, "consume record cannot start a new attempt");
            return DispatchOutcome::Skipped(record.status());
        }

        let mut guard =
            AttemptGuard::arm(self.store.clone(), self.retry_strategy.clone(), &record);
        let failures = self.invoke_handlers(event).await;
        guard.disarm();

        let outcome = match self.settle(&mut record, failures) {
            Ok(outcome) => outcome,
            Err(err) => {
                error!(error = %err, "failed to settle consume record");
                return DispatchOutcome::Aborted;
            }
        };

        match self.store.upsert(&record).await {
            Ok(()) => outcome,
            Err(err) => {
                error!(
                    error = %err,
                    attempt = record.retry_count(),
                    "failed to persist consume record"
                );
                DispatchOutcome::StoreUnavailable
            }
        }
    }

    fn new_record(&self, event: &Event, entry: &TypeEntry) -> DomainResult<ConsumeRecord> {
        let payload = self.registry.serialize(event)?;
        let max_retry_times = event
            .max_retries()
            .or(entry.max_retries())
            .unwrap_or(self.config.default_max_retries);

        Ok(ConsumeRecord::builder()
            .event_id(event.id())
            .consumer_group(self.config.consumer_group.as_str())
            .event_type(event.event_type())
            .payload(payload)
            .max_retry_times(max_retry_times)
            .maybe_trace_id(ExecutionContext::current_trace_id())
            .occurred_at(event.occurred_at())
            .build())
    }

    fn settle(
        &self,
        record: &mut ConsumeRecord,
        failures: Vec<DomainError>,
    ) -> DomainResult<DispatchOutcome> {
        if failures.is_empty() {
            record.mark_success()?;
            return Ok(DispatchOutcome::Succeeded);
        }

        let message = failures
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ");
        let attempt = record.retry_count();
        let max = record.max_retry_times();

        if self.retry_strategy.should_retry(attempt, max) {
            let next_retry_time = self.retry_strategy.next_retry_time(attempt);
            error!(
                attempt,
                max,
                next_retry_time = %next_retry_time,
                error = %message,
                "event handling failed, scheduling retry"
            );
            record.mark_retrying(next_retry_time, message)?;
            Ok(DispatchOutcome::Retrying { next_retry_time })
        } else {
            error!(attempt, max, error = %message, "event handling failed, giving up");
            record.mark_failed(message)?;
            Ok(DispatchOutcome::Failed)
        }
    }

    /// 独立调用每个匹配的处理器，返回失败列表；一个处理器失败不影响其它处理器
    async fn invoke_handlers(&self, event: &Event) -> Vec<DomainError> {
        let handlers = self.handlers.matching(event.event_type());
        let timeout = self.config.handler_timeout;

        let invocations: Vec<_> = handlers
            .into_iter()
            .map(|handler| {
                async move { run_handler(handler.as_ref(), event, timeout).await.err() }.boxed()
            })
            .collect();

        stream::iter(invocations)
            .buffer_unordered(self.config.handler_concurrency.max(1))
            .filter_map(|failure| async move { failure })
            .collect()
            .await
    }
}

/// 尝试进行中被丢弃时按重试策略写回记录
struct AttemptGuard {
    store: Arc<dyn ConsumeRecordStore>,
    strategy: RetryStrategy,
    record: Option<ConsumeRecord>,
}

impl AttemptGuard {
    fn arm(
        store: Arc<dyn ConsumeRecordStore>,
        strategy: RetryStrategy,
        record: &ConsumeRecord,
    ) -> Self {
        Self {
            store,
            strategy,
            record: Some(record.clone()),
        }
    }

    fn disarm(&mut self) {
        self.record = None;
    }
}

impl Drop for AttemptGuard {
    fn drop(&mut self) {
        let Some(mut record) = self.record.take() else {
            return;
        };
        let attempt = record.retry_count();
        let max = record.max_retry_times();
        let settled = if self.strategy.should_retry(attempt, max) {
            let next_retry_time = self.strategy.next_retry_time(attempt);
            warn!(
                event_id = record.event_id(),
                attempt,
                max,
                next_retry_time = %next_retry_time,
                "dispatch cancelled mid-attempt, scheduling retry"
            );
            record.mark_retrying(next_retry_time, CANCELLED)
        } else {
            warn!(
                event_id = record.event_id(),
                attempt,
                max,
                "dispatch cancelled mid-attempt, giving up"
            );
            record.mark_failed(CANCELLED)
        };
        if settled.is_err() {
            return;
        }

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let store = self.store.clone();
        runtime.spawn(async move {
            if let Err(err) = store.upsert(&record).await {
                error!(
                    event_id = record.event_id(),
                    error = %err,
                    "failed to persist cancelled attempt"
                );
            }
        });
    }
}

const CANCELLED: &str = "dispatch cancelled";

async fn run_handler(
    handler: &dyn EventHandler,
    event: &Event,
    timeout: Option<Duration>,
) -> DomainResult<()> {
    let call = AssertUnwindSafe(handler.handle(event)).catch_unwind();
    let result = match timeout {
        Some(limit) => match tokio::time::timeout(limit, call).await {
            Ok(result) => result,
            Err(_) => {
                return Err(DomainError::handler_failure(
                    handler.handler_name(),
                    format!("timed out after {limit:?}"),
                ));
            }
        },
        None => call.await,
    };

    match result {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => Err(DomainError::handler_failure(
            handler.handler_name(),
            format!("{err:#}"),
        )),
        Err(_) => Err(DomainError::handler_failure(
            handler.handler_name(),
            "handler panicked",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::JsonCodec;
    use crate::event::{DomainEvent, EventOrigin};
    use crate::eventing::handler::HandledEventType;
    use crate::persist::InMemoryConsumeRecordStore;
    use async_trait::async_trait;
    use serde::{Deserialize, Serialize};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct OrderCreated {
        order_id: String,
    }

    impl DomainEvent for OrderCreated {
        const EVENT_TYPE: &'static str = "order.created";
        const MAX_RETRIES: Option<u32> = Some(2);
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct PaymentNotified {
        trade_no: String,
    }

    impl DomainEvent for PaymentNotified {
        const EVENT_TYPE: &'static str = "payment.notified";
        const ORIGIN: EventOrigin = EventOrigin::External("payment-gateway");
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Unregistered;

    impl DomainEvent for Unregistered {
        const EVENT_TYPE: &'static str = "order.unknown";
    }

    #[derive(Clone, Copy)]
    enum Behavior {
        Ok,
        Fail,
        Panic,
        Hang,
    }

    struct SpyHandler {
        name: &'static str,
        types: HandledEventType,
        behavior: Behavior,
        calls: AtomicUsize,
    }

    impl SpyHandler {
        fn new(name: &'static str, behavior: Behavior) -> Arc<Self> {
            Arc::new(Self {
                name,
                types: HandledEventType::All,
                behavior,
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl EventHandler for SpyHandler {
        fn handler_name(&self) -> &str {
            self.name
        }
        fn handled_event_type(&self) -> HandledEventType {
            self.types.clone()
        }
        async fn handle(&self, _event: &Event) -> anyhow::Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.behavior {
                Behavior::Ok => Ok(()),
                Behavior::Fail => anyhow::bail!("{} refused", self.name),
                Behavior::Panic => panic!("{} exploded", self.name),
                Behavior::Hang => {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok(())
                }
            }
        }
    }

    struct BrokenStore;

    #[async_trait]
    impl ConsumeRecordStore for BrokenStore {
        async fn find(&self, _: &str, _: &str) -> DomainResult<Option<ConsumeRecord>> {
            Ok(None)
        }
        async fn upsert(&self, _: &ConsumeRecord) -> DomainResult<()> {
            Err(DomainError::store_unavailable("disk full"))
        }
        async fn insert_if_absent(&self, _: &ConsumeRecord) -> DomainResult<bool> {
            Err(DomainError::store_unavailable("disk full"))
        }
        async fn claim(&self, _: &str, _: &str, _: &[ConsumeStatus]) -> DomainResult<Claim> {
            Ok(Claim::Vacant)
        }
        async fn find_due_for_retry(&self, _: &str, _: usize) -> DomainResult<Vec<ConsumeRecord>> {
            Err(DomainError::store_unavailable("disk full"))
        }
        async fn find_stranded(
            &self,
            _: &str,
            _: DateTime<Utc>,
            _: usize,
        ) -> DomainResult<Vec<ConsumeRecord>> {
            Err(DomainError::store_unavailable("disk full"))
        }
    }

    fn registry() -> Arc<TypeRegistry> {
        Arc::new(
            TypeRegistry::builder()
                .codec(JsonCodec)
                .register::<OrderCreated>()
                .register::<PaymentNotified>()
                .build()
                .unwrap(),
        )
    }

    fn dispatcher(
        store: Arc<dyn ConsumeRecordStore>,
        handlers: Vec<Arc<dyn EventHandler>>,
        config: DispatcherConfig,
    ) -> EventDispatcher {
        EventDispatcher::builder()
            .registry(registry())
            .store(store)
            .event_handlers(handlers)
            .config(config)
            .build()
    }

    fn order() -> Event {
        Event::new(OrderCreated {
            order_id: "o-1".into(),
        })
    }

    async fn record_of(store: &InMemoryConsumeRecordStore, event: &Event) -> ConsumeRecord {
        store.find(event.id(), "default").await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn unregistered_type_is_dropped_without_a_record() {
        let store = Arc::new(InMemoryConsumeRecordStore::new());
        let handler = SpyHandler::new("h", Behavior::Ok);
        let d = dispatcher(store.clone(), vec![handler.clone()], Default::default());

        let outcome = d.dispatch(&Event::new(Unregistered), false).await;

        assert_eq!(outcome, DispatchOutcome::Dropped);
        assert!(store.records().unwrap().is_empty());
        assert_eq!(handler.calls(), 0);
    }

    #[tokio::test]
    async fn external_events_are_ignored_on_first_pass_only() {
        let store = Arc::new(InMemoryConsumeRecordStore::new());
        let handler = SpyHandler::new("h", Behavior::Ok);
        let d = dispatcher(store.clone(), vec![handler.clone()], Default::default());
        let event = Event::new(PaymentNotified {
            trade_no: "t-1".into(),
        });

        assert_eq!(d.dispatch(&event, false).await, DispatchOutcome::Ignored);
        assert!(store.records().unwrap().is_empty());

        assert_eq!(d.dispatch(&event, true).await, DispatchOutcome::Succeeded);
        assert_eq!(handler.calls(), 1);
    }

    #[tokio::test]
    async fn success_is_recorded_with_one_attempt() {
        let store = Arc::new(InMemoryConsumeRecordStore::new());
        let handler = SpyHandler::new("h", Behavior::Ok);
        let d = dispatcher(store.clone(), vec![handler.clone()], Default::default());
        let event = order();

        let outcome = ExecutionContext::for_user("u1", "trace-1")
            .call(d.dispatch(&event, false))
            .await;

        assert_eq!(outcome, DispatchOutcome::Succeeded);
        let record = record_of(&store, &event).await;
        assert_eq!(record.status(), ConsumeStatus::Success);
        assert_eq!(record.retry_count(), 1);
        assert_eq!(record.max_retry_times(), 2);
        assert_eq!(record.trace_id(), Some("trace-1"));
        assert!(record.next_retry_time().is_none());
        assert_eq!(record.payload(), r#"{"order_id":"o-1"}"#);
    }

    #[tokio::test]
    async fn failure_schedules_retry_until_the_limit_then_fails() {
        let store = Arc::new(InMemoryConsumeRecordStore::new());
        let handler = SpyHandler::new("h", Behavior::Fail);
        let d = dispatcher(store.clone(), vec![handler.clone()], Default::default());
        let event = order();

        let first = d.dispatch(&event, false).await;
        assert!(matches!(first, DispatchOutcome::Retrying { .. }));
        let record = record_of(&store, &event).await;
        assert_eq!(record.status(), ConsumeStatus::Retrying);
        assert!(record.next_retry_time().is_some());
        assert!(record.message().unwrap().contains("h refused"));

        let second = d.dispatch(&event, true).await;
        assert_eq!(second, DispatchOutcome::Failed);
        let record = record_of(&store, &event).await;
        assert_eq!(record.status(), ConsumeStatus::Failed);
        assert_eq!(record.retry_count(), 2);
        assert!(record.next_retry_time().is_none());
    }

    #[tokio::test]
    async fn settled_records_are_not_replayed() {
        let store = Arc::new(InMemoryConsumeRecordStore::new());
        let handler = SpyHandler::new("h", Behavior::Ok);
        let d = dispatcher(store.clone(), vec![handler.clone()], Default::default());
        let event = order();

        d.dispatch(&event, false).await;
        let replay = d.dispatch(&event, true).await;

        assert_eq!(replay, DispatchOutcome::Skipped(ConsumeStatus::Success));
        assert_eq!(handler.calls(), 1);
        assert_eq!(record_of(&store, &event).await.retry_count(), 1);
    }

    #[tokio::test]
    async fn one_failing_handler_does_not_stop_the_others() {
        let store = Arc::new(InMemoryConsumeRecordStore::new());
        let ok = SpyHandler::new("ok", Behavior::Ok);
        let bad = SpyHandler::new("bad", Behavior::Fail);
        let boom = SpyHandler::new("boom", Behavior::Panic);
        let d = dispatcher(
            store.clone(),
            vec![bad.clone(), boom.clone(), ok.clone()],
            Default::default(),
        );
        let event = order();

        let outcome = d.dispatch(&event, false).await;

        assert!(matches!(outcome, DispatchOutcome::Retrying { .. }));
        assert_eq!((ok.calls(), bad.calls(), boom.calls()), (1, 1, 1));
        let message = record_of(&store, &event).await.message().unwrap().to_string();
        assert!(message.contains("bad refused"));
        assert!(message.contains("handler panicked"));
    }

    #[tokio::test]
    async fn hanging_handler_times_out_as_a_failure() {
        let store = Arc::new(InMemoryConsumeRecordStore::new());
        let hang = SpyHandler::new("hang", Behavior::Hang);
        let d = dispatcher(
            store.clone(),
            vec![hang],
            DispatcherConfig {
                handler_timeout: Some(Duration::from_millis(20)),
                ..Default::default()
            },
        );
        let event = order();

        let outcome = d.dispatch(&event, false).await;

        assert!(matches!(outcome, DispatchOutcome::Retrying { .. }));
        assert!(
            record_of(&store, &event)
                .await
                .message()
                .unwrap()
                .contains("timed out")
        );
    }

    #[tokio::test]
    async fn event_level_max_retries_overrides_type_default() {
        let store = Arc::new(InMemoryConsumeRecordStore::new());
        let d = dispatcher(
            store.clone(),
            vec![SpyHandler::new("h", Behavior::Fail)],
            Default::default(),
        );
        let event = order().with_max_retries(1);

        assert_eq!(d.dispatch(&event, false).await, DispatchOutcome::Failed);
        assert_eq!(record_of(&store, &event).await.max_retry_times(), 1);
    }

    #[tokio::test]
    async fn store_failure_is_never_reported_as_success() {
        let handler = SpyHandler::new("h", Behavior::Ok);
        let d = dispatcher(Arc::new(BrokenStore), vec![handler.clone()], Default::default());

        let outcome = d.dispatch(&order(), false).await;

        assert_eq!(outcome, DispatchOutcome::StoreUnavailable);
        assert_eq!(handler.calls(), 1);
    }

    /// 在处理器挂起时取消分发，等待写回后的记录
    async fn cancel_mid_attempt(
        d: &EventDispatcher,
        store: &InMemoryConsumeRecordStore,
        event: &Event,
    ) -> ConsumeRecord {
        let cancelled =
            tokio::time::timeout(Duration::from_millis(20), d.dispatch(event, false)).await;
        assert!(cancelled.is_err());

        tokio::time::timeout(Duration::from_secs(1), async {
            loop {
                if let Ok(Some(r)) = store.find(event.id(), "default").await {
                    break r;
                }
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn cancelled_attempt_is_rescheduled_while_retries_remain() {
        let store = Arc::new(InMemoryConsumeRecordStore::new());
        let d = dispatcher(
            store.clone(),
            vec![SpyHandler::new("hang", Behavior::Hang)],
            Default::default(),
        );
        let event = order();

        let record = cancel_mid_attempt(&d, &store, &event).await;

        assert_eq!(record.status(), ConsumeStatus::Retrying);
        assert_eq!(record.retry_count(), 1);
        assert!(record.next_retry_time().is_some());
        assert_eq!(record.message(), Some("dispatch cancelled"));
    }

    #[tokio::test]
    async fn cancelled_final_attempt_ends_failed() {
        let store = Arc::new(InMemoryConsumeRecordStore::new());
        let d = dispatcher(
            store.clone(),
            vec![SpyHandler::new("hang", Behavior::Hang)],
            Default::default(),
        );
        let event = order().with_max_retries(1);

        let record = cancel_mid_attempt(&d, &store, &event).await;

        assert_eq!(record.status(), ConsumeStatus::Failed);
        assert_eq!(record.retry_count(), 1);
        assert!(record.next_retry_time().is_none());
        assert_eq!(record.message(), Some("dispatch cancelled"));
    }

    #[tokio::test]
    async fn first_pass_leaves_retrying_records_to_the_scheduler() {
        let store = Arc::new(InMemoryConsumeRecordStore::new());
        let handler = SpyHandler::new("h", Behavior::Fail);
        let d = dispatcher(store.clone(), vec![handler.clone()], Default::default());
        let event = order();

        assert!(matches!(
            d.dispatch(&event, false).await,
            DispatchOutcome::Retrying { .. }
        ));
        let scheduled = record_of(&store, &event).await.next_retry_time();

        // 同一事件再次经总线到达
        assert_eq!(
            d.dispatch(&event, false).await,
            DispatchOutcome::Skipped(ConsumeStatus::Retrying)
        );
        assert_eq!(handler.calls(), 1);
        let record = record_of(&store, &event).await;
        assert_eq!(record.retry_count(), 1);
        assert_eq!(record.next_retry_time(), scheduled);
    }

    #[tokio::test]
    async fn leased_record_is_skipped_by_other_dispatchers() {
        let store = Arc::new(InMemoryConsumeRecordStore::new());
        let handler = SpyHandler::new("h", Behavior::Fail);
        let d = dispatcher(store.clone(), vec![handler.clone()], Default::default());
        let event = order();
        d.dispatch(&event, false).await;

        let retryable = [ConsumeStatus::Retrying];
        let Claim::Claimed(claimed) = store.claim(event.id(), "default", &retryable).await.unwrap()
        else {
            panic!("record should be claimable");
        };

        assert_eq!(
            d.dispatch(&event, true).await,
            DispatchOutcome::Skipped(ConsumeStatus::Retrying)
        );
        assert_eq!(handler.calls(), 1);

        // 租约持有者照常完成本次尝试
        assert_eq!(d.dispatch_claimed(&event, claimed).await, DispatchOutcome::Failed);
        assert_eq!(handler.calls(), 2);
        assert_eq!(record_of(&store, &event).await.retry_count(), 2);
    }

    #[tokio::test]
    async fn enrolled_event_is_dispatched_on_first_pass() {
        let store = Arc::new(InMemoryConsumeRecordStore::new());
        let handler = SpyHandler::new("h", Behavior::Ok);
        let d = dispatcher(store.clone(), vec![handler.clone()], Default::default());
        let event = order();

        assert!(d.enroll(&event).await.unwrap());
        assert!(!d.enroll(&event).await.unwrap());
        assert_eq!(record_of(&store, &event).await.status(), ConsumeStatus::Created);

        assert_eq!(d.dispatch(&event, false).await, DispatchOutcome::Succeeded);
        assert_eq!(handler.calls(), 1);
        // 已结算的记录不会被再次登记覆盖
        assert!(!d.enroll(&event).await.unwrap());
        assert_eq!(record_of(&store, &event).await.status(), ConsumeStatus::Success);

        let external = Event::new(PaymentNotified {
            trade_no: "t-9".into(),
        });
        assert!(!d.enroll(&external).await.unwrap());
        assert!(matches!(
            d.enroll(&Event::new(Unregistered)).await,
            Err(DomainError::UnknownType { .. })
        ));
        assert_eq!(store.records().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn no_handlers_settles_as_success() {
        let store = Arc::new(InMemoryConsumeRecordStore::new());
        let d = dispatcher(store.clone(), vec![], Default::default());
        let event = order();

        assert_eq!(d.dispatch(&event, false).await, DispatchOutcome::Succeeded);
        assert_eq!(
            record_of(&store, &event).await.status(),
            ConsumeStatus::Success
        );
    }
}
