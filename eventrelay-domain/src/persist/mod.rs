//! 消费记录持久化（persist）
//!
//! 定义每个（事件, 消费组）的消费记录、其状态机，以及分发器与重试调度器
//! 依赖的存储协议：
//! - `ConsumeStatus`：五态词汇 `CREATED/PROCESSING/SUCCESS/RETRYING/FAILED`；
//! - `ConsumeRecord`：载荷原文、重试计数、下次重试时间、最近错误与 trace id；
//! - `ConsumeRecordStore`：按键读取、幂等 upsert、单条认领、带租约的到期与滞留查询；
//! - `InMemoryConsumeRecordStore`：测试与本地开发用的内存实现。
//!
//! 具体存储后端（关系表、文档库等）由上层提供实现并注入。
//!
mod consume_record;
mod consume_status;
mod record_store;
mod record_store_inmemory;

pub use consume_record::ConsumeRecord;
pub use consume_status::ConsumeStatus;
pub use record_store::{Claim, ConsumeRecordStore};
pub use record_store_inmemory::InMemoryConsumeRecordStore;
