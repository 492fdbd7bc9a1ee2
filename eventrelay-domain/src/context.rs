//! 执行上下文（ExecutionContext）
//!
//! 承载一次业务调用的横切信息：用户 id、链路 trace id，以及业务操作期间
//! 收集到的领域事件缓冲。上下文在提交异步任务时显式快照、在执行时恢复：
//! - `run` / `call`：在给定上下文中执行同步闭包 / 异步任务，退出（含 panic）后恢复原上下文；
//! - `snapshot`：捕获当前绑定，用于跨任务传递；
//! - `capture` / `capture_fn`：创建时快照、执行时恢复，使工作线程看到的是提交方的上下文；
//! - `raise` / `take_events`：向当前上下文的事件缓冲追加 / 取出事件。
//!
//! 嵌套作用域整体替换当前绑定而不是合并；需要合并时由调用方先读取再扩展。
//!
use crate::event::Event;
use bon::Builder;
use std::cell::RefCell;
use std::future::Future;
use tokio::task::JoinHandle;
use tokio::task::futures::TaskLocalFuture;

tokio::task_local! {
    static CURRENT: RefCell<ExecutionContext>;
}

/// 上下文中可读取的固定键集合
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ContextKey {
    UserId,
    TraceId,
    DomainEvents,
}

/// 按键读取到的上下文值
#[derive(Clone, Debug)]
pub enum ContextValue {
    UserId(String),
    TraceId(String),
    DomainEvents(Vec<Event>),
}

/// 执行上下文
#[derive(Builder, Clone, Debug, Default)]
pub struct ExecutionContext {
    /// 触发操作的用户
    #[builder(into)]
    user_id: Option<String>,
    /// 链路追踪 id
    #[builder(into)]
    trace_id: Option<String>,
    /// 业务操作期间收集的领域事件
    #[builder(default)]
    domain_events: Vec<Event>,
}

impl ExecutionContext {
    pub fn for_user(user_id: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            trace_id: Some(trace_id.into()),
            domain_events: Vec::new(),
        }
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    pub fn trace_id(&self) -> Option<&str> {
        self.trace_id.as_deref()
    }

    pub fn domain_events(&self) -> &[Event] {
        &self.domain_events
    }

    pub fn get(&self, key: ContextKey) -> Option<ContextValue> {
        match key {
            ContextKey::UserId => self.user_id.clone().map(ContextValue::UserId),
            ContextKey::TraceId => self.trace_id.clone().map(ContextValue::TraceId),
            ContextKey::DomainEvents => {
                if self.domain_events.is_empty() {
                    None
                } else {
                    Some(ContextValue::DomainEvents(self.domain_events.clone()))
                }
            }
        }
    }

    /// 去掉事件缓冲，仅保留身份与链路信息
    pub fn without_events(mut self) -> Self {
        self.domain_events.clear();
        self
    }

    /// 当前任务/线程上激活的上下文
    pub fn current() -> Option<ExecutionContext> {
        CURRENT.try_with(|ctx| ctx.borrow().clone()).ok()
    }

    /// 当前上下文的浅拷贝；未激活时为空上下文
    pub fn snapshot() -> ExecutionContext {
        Self::current().unwrap_or_default()
    }

    pub fn current_value(key: ContextKey) -> Option<ContextValue> {
        CURRENT.try_with(|ctx| ctx.borrow().get(key)).ok().flatten()
    }

    pub fn current_user_id() -> Option<String> {
        CURRENT
            .try_with(|ctx| ctx.borrow().user_id.clone())
            .ok()
            .flatten()
    }

    pub fn current_trace_id() -> Option<String> {
        CURRENT
            .try_with(|ctx| ctx.borrow().trace_id.clone())
            .ok()
            .flatten()
    }

    /// 向当前上下文的事件缓冲追加事件；没有激活的上下文时返回 `false`
    pub fn raise(event: Event) -> bool {
        CURRENT
            .try_with(|ctx| ctx.borrow_mut().domain_events.push(event))
            .is_ok()
    }

    /// 取出并清空当前上下文的事件缓冲
    pub fn take_events() -> Vec<Event> {
        CURRENT
            .try_with(|ctx| std::mem::take(&mut ctx.borrow_mut().domain_events))
            .unwrap_or_default()
    }

    /// 在该上下文中执行同步闭包
    pub fn run<R>(self, body: impl FnOnce() -> R) -> R {
        CURRENT.sync_scope(RefCell::new(self), body)
    }

    /// 在该上下文中执行异步任务并返回其结果
    pub async fn call<F>(self, body: F) -> F::Output
    where
        F: Future,
    {
        CURRENT.scope(RefCell::new(self), body).await
    }

    /// 把异步任务绑定到该上下文，适合交给 `tokio::spawn`
    pub fn scope<F>(self, body: F) -> TaskLocalFuture<RefCell<ExecutionContext>, F>
    where
        F: Future,
    {
        CURRENT.scope(RefCell::new(self), body)
    }
}

/// 立即快照当前上下文，执行 `body` 时恢复该快照
pub fn capture<F>(body: F) -> TaskLocalFuture<RefCell<ExecutionContext>, F>
where
    F: Future,
{
    ExecutionContext::snapshot().scope(body)
}

/// `capture` 的同步版本，适合 `spawn_blocking` 或线程池
pub fn capture_fn<F, R>(body: F) -> impl FnOnce() -> R
where
    F: FnOnce() -> R,
{
    let ctx = ExecutionContext::snapshot();
    move || ctx.run(body)
}

/// 携带提交方上下文的 `tokio::spawn`
pub fn spawn<F>(body: F) -> JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    tokio::spawn(capture(body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::DomainEvent;
    use serde::{Deserialize, Serialize};
    use std::panic::{self, AssertUnwindSafe};

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Pinged {
        n: u32,
    }

    impl DomainEvent for Pinged {
        const EVENT_TYPE: &'static str = "test.pinged";
    }

    #[test]
    fn run_binds_values_only_for_the_body() {
        assert!(ExecutionContext::current().is_none());

        let seen = ExecutionContext::for_user("u1", "t1").run(|| {
            (
                ExecutionContext::current_user_id(),
                ExecutionContext::current_trace_id(),
            )
        });

        assert_eq!(seen, (Some("u1".to_string()), Some("t1".to_string())));
        assert!(ExecutionContext::current_user_id().is_none());
        assert!(ExecutionContext::current_trace_id().is_none());
    }

    #[test]
    fn nested_scope_replaces_instead_of_merging() {
        ExecutionContext::for_user("u1", "t1").run(|| {
            ExecutionContext::builder().trace_id("t2").build().run(|| {
                assert_eq!(ExecutionContext::current_user_id(), None);
                assert_eq!(ExecutionContext::current_trace_id().as_deref(), Some("t2"));
            });

            assert_eq!(ExecutionContext::current_user_id().as_deref(), Some("u1"));
            assert_eq!(ExecutionContext::current_trace_id().as_deref(), Some("t1"));
        });
    }

    #[test]
    fn previous_context_is_restored_after_panic() {
        ExecutionContext::for_user("u1", "t1").run(|| {
            let result = panic::catch_unwind(AssertUnwindSafe(|| {
                ExecutionContext::for_user("u2", "t2").run(|| panic!("boom"))
            }));
            assert!(result.is_err());
            assert_eq!(ExecutionContext::current_user_id().as_deref(), Some("u1"));
        });
    }

    #[test]
    fn raised_events_are_collected_and_taken_once() {
        assert!(!ExecutionContext::raise(Event::new(Pinged { n: 0 })));

        ExecutionContext::for_user("u1", "t1").run(|| {
            assert!(ExecutionContext::raise(Event::new(Pinged { n: 1 })));
            assert!(ExecutionContext::raise(Event::new(Pinged { n: 2 })));

            match ExecutionContext::current_value(ContextKey::DomainEvents) {
                Some(ContextValue::DomainEvents(events)) => assert_eq!(events.len(), 2),
                other => panic!("unexpected {other:?}"),
            }

            assert_eq!(ExecutionContext::take_events().len(), 2);
            assert!(ExecutionContext::take_events().is_empty());
        });
    }

    #[test]
    fn mutations_inside_a_restored_snapshot_do_not_leak_back() {
        ExecutionContext::for_user("u1", "t1").run(|| {
            ExecutionContext::raise(Event::new(Pinged { n: 1 }));

            let snapshot = ExecutionContext::snapshot();
            snapshot.run(|| {
                ExecutionContext::raise(Event::new(Pinged { n: 2 }));
                assert_eq!(ExecutionContext::snapshot().domain_events().len(), 2);
            });

            assert_eq!(ExecutionContext::snapshot().domain_events().len(), 1);
        });
    }

    #[test]
    fn get_reads_the_fixed_key_set() {
        let ctx = ExecutionContext::for_user("u1", "t1");
        assert!(matches!(ctx.get(ContextKey::UserId), Some(ContextValue::UserId(u)) if u == "u1"));
        assert!(matches!(ctx.get(ContextKey::TraceId), Some(ContextValue::TraceId(t)) if t == "t1"));
        assert!(ctx.get(ContextKey::DomainEvents).is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn spawned_work_sees_the_submitter_context() {
        let (captured, ambient) = ExecutionContext::for_user("u1", "t1")
            .call(async {
                let captured = spawn(async { ExecutionContext::current_user_id() });
                let ambient = tokio::spawn(async { ExecutionContext::current_user_id() });
                (captured.await.unwrap(), ambient.await.unwrap())
            })
            .await;

        assert_eq!(captured.as_deref(), Some("u1"));
        assert_eq!(ambient, None);
    }

    #[tokio::test]
    async fn capture_fn_restores_on_a_blocking_thread() {
        let task = ExecutionContext::for_user("u1", "t9").run(|| {
            capture_fn(|| ExecutionContext::current_trace_id())
        });

        let trace = tokio::task::spawn_blocking(task).await.unwrap();
        assert_eq!(trace.as_deref(), Some("t9"));
    }
}
