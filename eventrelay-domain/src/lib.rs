//! 领域事件可靠投递与重试（eventrelay-domain）
//!
//! 保证业务操作产生的每个领域事件最终都会送达所有感兴趣的处理器：
//! 成功路径下恰好一次，失败路径下至少一次，并以退避策略约束重试次数，
//! 同时持久化每次消费的状态。
//!
//! 模块划分（自底向上）：
//! - `event`：不可变事件模型、事件类型注册表（`TypeRegistry`）；
//! - `codec`：载荷编解码抽象（`PayloadCodec`）与 JSON 实现；
//! - `persist`：消费记录（`ConsumeRecord`）、状态机与存储协议；
//! - `eventing`：重试策略、分发器、重试调度器、事件总线与引擎；
//! - `context`：跨异步边界显式传递的执行上下文（trace id / user id / 事件缓冲）。
//!
//! 典型用法：
//! 1. 为载荷实现 `DomainEvent` 并注册到 `TypeRegistry`（注入编解码器）；
//! 2. 提供 `ConsumeRecordStore` 实现（或使用内存版）；
//! 3. 构建 `EventDispatcher` 与 `RetryScheduler`，交给 `DispatchEngine` 启动；
//! 4. 发布前经 `EventDispatcher::enroll` 登记消费记录，再通过 `EventBus` 发布；
//!    失败或丢失的消费由调度器按策略重放。
//!
pub mod codec;
pub mod context;
pub mod error;
pub mod event;
pub mod eventing;
pub mod persist;
