//! 应用层（eventrelay-application）
//!
//! 生产方边界：把一次应用调用的上下文转换为执行上下文，
//! 在业务成功后把收集到的领域事件写入事件存储并发布到总线。
//!
pub mod context;
pub mod error;
pub mod event_store;
pub mod publisher;

pub use context::AppContext;
pub use event_store::{EventStore, InMemoryEventStore, StoredEvent};
pub use publisher::EventPublisher;
