//! 事件模型（Event）与事件类型注册表（TypeRegistry）
//!
//! 定义载荷需要实现的最小接口（`DomainEvent`）、类型擦除后的不可变事件值
//! `Event`、在总线上携带执行上下文的 `EventEnvelope`，以及按类型符号解析
//! 元信息与编解码绑定的 `TypeRegistry`。

mod domain_event_trait;
mod event_envelope;
mod event_model;
mod registry;

pub use domain_event_trait::{DomainEvent, EventOrigin, EventPayload};
pub use event_envelope::EventEnvelope;
pub use event_model::Event;
pub use registry::{TypeEntry, TypeRegistry, TypeRegistryBuilder};
