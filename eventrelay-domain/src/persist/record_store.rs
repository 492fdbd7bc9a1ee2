//! 消费记录存储（ConsumeRecordStore）协议
//!
//! 分发器与重试调度器唯一共享的可变资源。对同一事件的并发尝试由存储的
//! upsert / 租约语义串行化，本库不持有进程内的按事件锁。
//!
//! 租约覆盖一次完整尝试：存储的租约时长应长于分发器的 `handler_timeout`，
//! 否则慢处理器仍在执行时记录就可能被再次认领。
//!
use super::consume_record::ConsumeRecord;
use super::consume_status::ConsumeStatus;
use crate::error::DomainResult as Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// 按键认领单条记录的结果
#[derive(Debug, Clone)]
pub enum Claim {
    /// 记录不存在
    Vacant,
    /// 已原子写入租约，调用方独占本次尝试
    Claimed(ConsumeRecord),
    /// 状态不在可接受范围内，或租约仍被他方持有；未做修改
    Busy(ConsumeRecord),
}

#[async_trait]
pub trait ConsumeRecordStore: Send + Sync {
    /// 按（事件 id, 消费组）读取记录
    async fn find(&self, event_id: &str, consumer_group: &str) -> Result<Option<ConsumeRecord>>;

    /// 幂等写入，键为（事件 id, 消费组）；写入会清除租约
    async fn upsert(&self, record: &ConsumeRecord) -> Result<()>;

    /// 仅当键不存在时写入，返回是否写入
    async fn insert_if_absent(&self, record: &ConsumeRecord) -> Result<bool>;

    /// 认领单条记录：状态属于 `accept` 且没有生效中的租约时写入租约。
    ///
    /// 不检查 `next_retry_time`。
    async fn claim(
        &self,
        event_id: &str,
        consumer_group: &str,
        accept: &[ConsumeStatus],
    ) -> Result<Claim>;

    /// 认领到期待重试的记录：`RETRYING` 且 `next_retry_time <= now`，
    /// 按到期时间从早到晚，最多 `limit` 条。
    ///
    /// 返回的记录必须被原子地加上租约，使并发的调度周期不会重复处理同一记录。
    async fn find_due_for_retry(
        &self,
        consumer_group: &str,
        limit: usize,
    ) -> Result<Vec<ConsumeRecord>>;

    /// 认领滞留的记录：`CREATED` 且 `created_at <= created_before`，
    /// 即已登记但首次分发始终没有开始的事件。按创建时间从早到晚，最多 `limit` 条，
    /// 租约语义同 `find_due_for_retry`。
    async fn find_stranded(
        &self,
        consumer_group: &str,
        created_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ConsumeRecord>>;
}
