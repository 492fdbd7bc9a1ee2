//! 事件存储（EventStore）
//!
//! 生产方的发件箱：发布前先把事件以载荷原文落库，
//! 总线丢失的事件可据此追溯。同一幂等键只允许被一次追加占用，
//! 重复请求据此跳过发布。`InMemoryEventStore` 基于 `DashMap`，用于测试与示例。
//!
use crate::error::{AppError, AppResult};
use async_trait::async_trait;
use bon::Builder;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::{Deserialize, Serialize};

/// 已持久化的事件
#[derive(Debug, Clone, Builder, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoredEvent {
    #[builder(into)]
    pub event_id: String,
    #[builder(into)]
    pub event_type: String,
    /// 编解码器输出的载荷原文
    #[builder(into)]
    pub payload: String,
    pub occurred_at: DateTime<Utc>,
    #[builder(into)]
    pub trace_id: Option<String>,
    #[builder(into)]
    pub user_id: Option<String>,
    /// 产生该事件的请求幂等键
    #[builder(into)]
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

#[async_trait]
pub trait EventStore: Send + Sync {
    /// 追加事件；同一事件 id 不允许重复写入，已被先前追加占用的幂等键也被拒绝
    async fn append(&self, events: &[StoredEvent]) -> AppResult<()>;

    async fn find(&self, event_id: &str) -> AppResult<Option<StoredEvent>>;

    /// 按幂等键查找先前追加的事件
    async fn find_by_idempotency_key(&self, key: &str) -> AppResult<Vec<StoredEvent>>;
}

#[derive(Default)]
pub struct InMemoryEventStore {
    events: DashMap<String, StoredEvent>,
    /// 幂等键 -> 事件 id
    idempotency: DashMap<String, Vec<String>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// 按发生时间排序的全部事件
    pub fn all(&self) -> Vec<StoredEvent> {
        let mut events: Vec<StoredEvent> = self.events.iter().map(|e| e.value().clone()).collect();
        events.sort_by_key(|e| e.occurred_at);
        events
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn append(&self, events: &[StoredEvent]) -> AppResult<()> {
        if let Some(dup) = events
            .iter()
            .find(|e| self.events.contains_key(&e.event_id))
        {
            return Err(AppError::EventStore(format!(
                "event already stored: {}",
                dup.event_id
            )));
        }

        let mut keys: Vec<&str> = events
            .iter()
            .filter_map(|e| e.idempotency_key.as_deref())
            .collect();
        keys.sort_unstable();
        keys.dedup();
        for key in keys {
            match self.idempotency.entry(key.to_string()) {
                Entry::Occupied(_) => {
                    return Err(AppError::EventStore(format!(
                        "idempotency key already used: {key}"
                    )));
                }
                Entry::Vacant(slot) => {
                    slot.insert(
                        events
                            .iter()
                            .filter(|e| e.idempotency_key.as_deref() == Some(key))
                            .map(|e| e.event_id.clone())
                            .collect(),
                    );
                }
            }
        }

        for event in events {
            match self.events.entry(event.event_id.clone()) {
                Entry::Occupied(_) => {
                    return Err(AppError::EventStore(format!(
                        "event already stored: {}",
                        event.event_id
                    )));
                }
                Entry::Vacant(slot) => {
                    slot.insert(event.clone());
                }
            }
        }
        Ok(())
    }

    async fn find(&self, event_id: &str) -> AppResult<Option<StoredEvent>> {
        Ok(self.events.get(event_id).map(|e| e.value().clone()))
    }

    async fn find_by_idempotency_key(&self, key: &str) -> AppResult<Vec<StoredEvent>> {
        let Some(ids) = self.idempotency.get(key).map(|ids| ids.value().clone()) else {
            return Ok(Vec::new());
        };
        Ok(ids
            .iter()
            .filter_map(|id| self.events.get(id).map(|e| e.value().clone()))
            .collect())
    }
}
