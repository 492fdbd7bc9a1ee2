//! 消费记录（ConsumeRecord）
//!
//! 一个（事件, 消费组）对的投递尝试谱系。载荷以原文持久化，
//! 重放不依赖生产方内存中的对象图。状态只能沿 `ConsumeStatus` 允许的边迁移，
//! 并维持：`next_retry_time` 仅在 `RETRYING` 时存在；`retry_count` 单调不减。
//!
use super::consume_status::ConsumeStatus;
use crate::error::{DomainError, DomainResult};
use bon::Builder;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Builder, Serialize, Deserialize)]
pub struct ConsumeRecord {
    /// 事件 id
    #[builder(into)]
    event_id: String,
    /// 消费组
    #[builder(into)]
    consumer_group: String,
    /// 事件类型符号，重放时用于解析载荷
    #[builder(into)]
    event_type: String,
    /// 当前状态
    #[builder(default)]
    status: ConsumeStatus,
    /// 序列化后的载荷原文
    #[builder(into)]
    payload: String,
    /// 已进行的尝试次数
    #[builder(default)]
    retry_count: u32,
    /// 最大尝试次数
    max_retry_times: u32,
    /// 下次重试时间（仅 RETRYING）
    next_retry_time: Option<DateTime<Utc>>,
    /// 最近一次失败的错误信息
    #[builder(into)]
    message: Option<String>,
    /// 链路追踪 id
    #[builder(into)]
    trace_id: Option<String>,
    /// 事件发生时间
    occurred_at: DateTime<Utc>,
    /// 调度租约到期时间，由到期查询写入、upsert 清除
    #[serde(default)]
    lease_until: Option<DateTime<Utc>>,
    #[builder(default = Utc::now())]
    created_at: DateTime<Utc>,
    #[builder(default = Utc::now())]
    updated_at: DateTime<Utc>,
}

impl ConsumeRecord {
    pub fn event_id(&self) -> &str {
        &self.event_id
    }

    pub fn consumer_group(&self) -> &str {
        &self.consumer_group
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn status(&self) -> ConsumeStatus {
        self.status
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn max_retry_times(&self) -> u32 {
        self.max_retry_times
    }

    pub fn next_retry_time(&self) -> Option<DateTime<Utc>> {
        self.next_retry_time
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn trace_id(&self) -> Option<&str> {
        self.trace_id.as_deref()
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    pub fn lease_until(&self) -> Option<DateTime<Utc>> {
        self.lease_until
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// 是否到期可被调度（未被租约占用）
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == ConsumeStatus::Retrying
            && self.next_retry_time.is_some_and(|t| t <= now)
            && !self.is_leased(now)
    }

    /// 已登记但从未开始尝试，且创建时间不晚于 `created_before`
    pub fn is_stranded(&self, created_before: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        self.status == ConsumeStatus::Created
            && self.created_at <= created_before
            && !self.is_leased(now)
    }

    /// 租约是否仍然有效
    pub fn is_leased(&self, now: DateTime<Utc>) -> bool {
        self.lease_until.is_some_and(|lease| lease > now)
    }

    /// 开始一次尝试：迁移到 PROCESSING 并递增尝试次数
    pub fn start_attempt(&mut self) -> DomainResult<()> {
        self.transition(ConsumeStatus::Processing)?;
        self.retry_count = self.retry_count.saturating_add(1);
        self.next_retry_time = None;
        self.lease_until = None;
        Ok(())
    }

    pub fn mark_success(&mut self) -> DomainResult<()> {
        self.transition(ConsumeStatus::Success)
    }

    pub fn mark_retrying(
        &mut self,
        next_retry_time: DateTime<Utc>,
        message: impl Into<String>,
    ) -> DomainResult<()> {
        self.transition(ConsumeStatus::Retrying)?;
        self.next_retry_time = Some(next_retry_time);
        self.message = Some(message.into());
        Ok(())
    }

    pub fn mark_failed(&mut self, message: impl Into<String>) -> DomainResult<()> {
        self.transition(ConsumeStatus::Failed)?;
        self.message = Some(message.into());
        Ok(())
    }

    /// 存储层在认领时写入租约
    pub fn lease(&mut self, until: DateTime<Utc>) {
        self.lease_until = Some(until);
    }

    pub fn release_lease(&mut self) {
        self.lease_until = None;
    }

    fn transition(&mut self, next: ConsumeStatus) -> DomainResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(DomainError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        if next != ConsumeStatus::Retrying {
            self.next_retry_time = None;
        }
        self.updated_at = Utc::now();
        Ok(())
    }
}
