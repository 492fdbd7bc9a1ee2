//! 内存版消费记录存储（InMemoryConsumeRecordStore）
//!
//! 以互斥锁保护的 `HashMap` 实现 `ConsumeRecordStore`：
//! - `upsert`：按（事件 id, 消费组）覆盖写入，并清除租约；
//! - `claim` / `find_due_for_retry` / `find_stranded`：在同一把锁内筛选并写入租约，
//!   保证并发认领互斥；
//! - 典型用途：测试环境、示例与本地开发。
//!
use super::consume_record::ConsumeRecord;
use super::consume_status::ConsumeStatus;
use super::record_store::{Claim, ConsumeRecordStore};
use crate::error::{DomainError, DomainResult as Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

type RecordKey = (String, String);

const DEFAULT_LEASE: Duration = Duration::from_secs(5 * 60);

pub struct InMemoryConsumeRecordStore {
    records: Mutex<HashMap<RecordKey, ConsumeRecord>>,
    lease: TimeDelta,
}

impl Default for InMemoryConsumeRecordStore {
    fn default() -> Self {
        Self::with_lease(DEFAULT_LEASE)
    }
}

impl InMemoryConsumeRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 指定认领时写入的租约时长
    pub fn with_lease(lease: Duration) -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            lease: TimeDelta::from_std(lease).unwrap_or(TimeDelta::MAX),
        }
    }

    pub fn lease(&self) -> TimeDelta {
        self.lease
    }

    /// 全部记录的快照，便于运维查看
    pub fn records(&self) -> Result<Vec<ConsumeRecord>> {
        Ok(self.lock()?.values().cloned().collect())
    }

    pub fn records_with_status(&self, status: ConsumeStatus) -> Result<Vec<ConsumeRecord>> {
        Ok(self
            .lock()?
            .values()
            .filter(|r| r.status() == status)
            .cloned()
            .collect())
    }

    fn lease_until(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now.checked_add_signed(self.lease).unwrap_or(now)
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<RecordKey, ConsumeRecord>>> {
        self.records
            .lock()
            .map_err(|e| DomainError::store_unavailable(e.to_string()))
    }
}

#[async_trait]
impl ConsumeRecordStore for InMemoryConsumeRecordStore {
    async fn find(&self, event_id: &str, consumer_group: &str) -> Result<Option<ConsumeRecord>> {
        let key = (event_id.to_string(), consumer_group.to_string());
        Ok(self.lock()?.get(&key).cloned())
    }

    async fn upsert(&self, record: &ConsumeRecord) -> Result<()> {
        let mut record = record.clone();
        record.release_lease();
        let key = (
            record.event_id().to_string(),
            record.consumer_group().to_string(),
        );
        self.lock()?.insert(key, record);
        Ok(())
    }

    async fn insert_if_absent(&self, record: &ConsumeRecord) -> Result<bool> {
        let key = (
            record.event_id().to_string(),
            record.consumer_group().to_string(),
        );
        let mut records = self.lock()?;
        if records.contains_key(&key) {
            return Ok(false);
        }
        let mut record = record.clone();
        record.release_lease();
        records.insert(key, record);
        Ok(true)
    }

    async fn claim(
        &self,
        event_id: &str,
        consumer_group: &str,
        accept: &[ConsumeStatus],
    ) -> Result<Claim> {
        let now = Utc::now();
        let lease_until = self.lease_until(now);
        let key = (event_id.to_string(), consumer_group.to_string());
        let mut records = self.lock()?;

        let Some(record) = records.get_mut(&key) else {
            return Ok(Claim::Vacant);
        };
        if !accept.contains(&record.status()) || record.is_leased(now) {
            return Ok(Claim::Busy(record.clone()));
        }
        record.lease(lease_until);
        Ok(Claim::Claimed(record.clone()))
    }

    async fn find_due_for_retry(
        &self,
        consumer_group: &str,
        limit: usize,
    ) -> Result<Vec<ConsumeRecord>> {
        let now = Utc::now();
        let lease_until = self.lease_until(now);
        let mut records = self.lock()?;

        let mut due: Vec<&mut ConsumeRecord> = records
            .values_mut()
            .filter(|r| r.consumer_group() == consumer_group && r.is_due(now))
            .collect();
        due.sort_by_key(|r| r.next_retry_time());
        due.truncate(limit);

        Ok(due
            .into_iter()
            .map(|record| {
                record.lease(lease_until);
                record.clone()
            })
            .collect())
    }

    async fn find_stranded(
        &self,
        consumer_group: &str,
        created_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ConsumeRecord>> {
        let now = Utc::now();
        let lease_until = self.lease_until(now);
        let mut records = self.lock()?;

        let mut stranded: Vec<&mut ConsumeRecord> = records
            .values_mut()
            .filter(|r| r.consumer_group() == consumer_group && r.is_stranded(created_before, now))
            .collect();
        stranded.sort_by_key(|r| r.created_at());
        stranded.truncate(limit);

        Ok(stranded
            .into_iter()
            .map(|record| {
                record.lease(lease_until);
                record.clone()
            })
            .collect())
    }
}
