use super::event_model::Event;
use crate::context::ExecutionContext;

/// 事件信封：事件与发布方的执行上下文快照一起跨越总线边界
#[derive(Debug, Clone)]
pub struct EventEnvelope {
    pub event: Event,
    pub context: ExecutionContext,
}

impl EventEnvelope {
    /// 以当前执行上下文的快照封装事件（不携带事件缓冲）
    pub fn capture(event: Event) -> Self {
        Self {
            event,
            context: ExecutionContext::snapshot().without_events(),
        }
    }

    pub fn new(event: Event, context: ExecutionContext) -> Self {
        Self { event, context }
    }
}
