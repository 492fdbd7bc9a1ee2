use super::domain_event_trait::{DomainEvent, EventPayload};
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// 不可变事件
///
/// 构造后不再修改；重放时由持久化的元数据与载荷重新构造一个新值。
#[derive(Clone)]
pub struct Event {
    id: String,
    event_type: String,
    occurred_at: DateTime<Utc>,
    max_retries: Option<u32>,
    payload: Arc<dyn EventPayload>,
}

impl Event {
    /// 由载荷创建新事件，生成全局唯一 id 并记录发生时间
    pub fn new<E>(payload: E) -> Self
    where
        E: DomainEvent,
    {
        Self {
            id: Uuid::new_v4().to_string(),
            event_type: E::EVENT_TYPE.to_string(),
            occurred_at: Utc::now(),
            max_retries: None,
            payload: Arc::new(payload),
        }
    }

    /// 覆盖类型级默认的重试上限
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub(crate) fn restore(
        id: String,
        event_type: String,
        occurred_at: DateTime<Utc>,
        max_retries: Option<u32>,
        payload: Arc<dyn EventPayload>,
    ) -> Self {
        Self {
            id,
            event_type,
            occurred_at,
            max_retries,
            payload,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    pub fn max_retries(&self) -> Option<u32> {
        self.max_retries
    }

    pub fn payload(&self) -> &dyn EventPayload {
        &*self.payload
    }

    /// 以具体类型读取载荷，类型不符时返回 `None`
    pub fn payload_as<T>(&self) -> Option<&T>
    where
        T: 'static,
    {
        self.payload().as_any().downcast_ref::<T>()
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("id", &self.id)
            .field("event_type", &self.event_type)
            .field("occurred_at", &self.occurred_at)
            .field("max_retries", &self.max_retries)
            .field("payload", &self.payload)
            .finish()
    }
}
