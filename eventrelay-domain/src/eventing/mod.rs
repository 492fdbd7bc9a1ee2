//! 事件子系统（eventing）
//!
//! 提供领域事件分发与重试的协议与运行时：
//! - `EventHandler`：按事件类型消费事件，`HandlerRegistry` 负责类型到处理器的解析；
//! - `RetryStrategy`：决定是否重试以及下次重试时间；
//! - `EventDispatcher`：调用处理器、解释结果、推进消费记录状态并决定是否重试；
//! - `RetryScheduler`：扫描到期记录，以有界并发重放整批事件并等待完成；
//! - `EventBus`：主事件总线协议，`InMemoryEventBus` 为内存实现；
//! - `DispatchEngine`：编排“订阅 → 首次分发”与周期性重试调度，并提供关闭句柄。
//!
//! 该模块仅定义协议与引擎，不绑定具体传输与存储实现。
//!
pub mod bus;
pub mod bus_inmemory;
pub mod dispatcher;
pub mod engine;
pub mod handler;
pub mod retry;
pub mod scheduler;

pub use bus::EventBus;
pub use bus_inmemory::InMemoryEventBus;
pub use dispatcher::{DispatchOutcome, DispatcherConfig, EventDispatcher};
pub use engine::{DispatchEngine, DispatchEngineConfig, EngineHandle};
pub use handler::{EventHandler, HandledEventType, HandlerRegistry};
pub use retry::{ExponentialBackoff, RetryStrategy};
pub use scheduler::{RetryScheduler, RetrySchedulerConfig, TickReport};
