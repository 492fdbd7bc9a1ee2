//! 事件类型注册表（TypeRegistry）
//!
//! 封闭的“类型符号 → 条目”映射：条目携带描述、来源与载荷编解码绑定。
//! 注册表在构建后不可变；未注册的类型无法解析，只能被丢弃。
//!
use super::domain_event_trait::{DomainEvent, EventOrigin, EventPayload};
use super::event_model::Event;
use crate::codec::PayloadCodec;
use crate::error::{DomainError, DomainResult};
use crate::persist::ConsumeRecord;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

type EncodeFn = Arc<dyn Fn(&dyn EventPayload) -> DomainResult<String> + Send + Sync>;
type DecodeFn = Arc<dyn Fn(&str) -> DomainResult<Arc<dyn EventPayload>> + Send + Sync>;

/// 注册表条目
#[derive(Clone)]
pub struct TypeEntry {
    event_type: &'static str,
    description: &'static str,
    origin: EventOrigin,
    max_retries: Option<u32>,
    encode: EncodeFn,
    decode: DecodeFn,
}

impl TypeEntry {
    pub fn event_type(&self) -> &'static str {
        self.event_type
    }

    pub fn description(&self) -> &'static str {
        self.description
    }

    pub fn origin(&self) -> EventOrigin {
        self.origin
    }

    pub fn max_retries(&self) -> Option<u32> {
        self.max_retries
    }
}

impl fmt::Debug for TypeEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeEntry")
            .field("event_type", &self.event_type)
            .field("description", &self.description)
            .field("origin", &self.origin)
            .field("max_retries", &self.max_retries)
            .finish_non_exhaustive()
    }
}

/// 事件类型注册表
#[derive(Debug)]
pub struct TypeRegistry {
    codec_name: &'static str,
    entries: HashMap<&'static str, TypeEntry>,
}

impl TypeRegistry {
    pub fn builder<C>() -> TypeRegistryBuilder<C>
    where
        C: PayloadCodec,
    {
        TypeRegistryBuilder::default()
    }

    /// 解析类型符号，未注册时返回 `UnknownType`
    pub fn resolve(&self, event_type: &str) -> DomainResult<&TypeEntry> {
        self.entries
            .get(event_type)
            .ok_or_else(|| DomainError::UnknownType {
                event_type: event_type.to_string(),
            })
    }

    pub fn contains(&self, event_type: &str) -> bool {
        self.entries.contains_key(event_type)
    }

    pub fn codec_name(&self) -> &'static str {
        self.codec_name
    }

    /// 序列化事件载荷
    pub fn serialize(&self, event: &Event) -> DomainResult<String> {
        let entry = self.resolve(event.event_type())?;
        (entry.encode)(event.payload())
    }

    /// 按类型符号反序列化载荷
    pub fn deserialize(
        &self,
        text: &str,
        event_type: &str,
    ) -> DomainResult<Arc<dyn EventPayload>> {
        let entry = self.resolve(event_type)?;
        (entry.decode)(text)
    }

    /// 由消费记录重建事件：沿用原事件 id 与发生时间，携带记录的重试上限
    pub fn rehydrate(&self, record: &ConsumeRecord) -> DomainResult<Event> {
        let entry = self.resolve(record.event_type())?;
        let payload = (entry.decode)(record.payload())?;

        Ok(Event::restore(
            record.event_id().to_string(),
            entry.event_type.to_string(),
            record.occurred_at(),
            Some(record.max_retry_times()),
            payload,
        ))
    }
}

struct PendingEntry<C> {
    event_type: &'static str,
    description: &'static str,
    origin: EventOrigin,
    max_retries: Option<u32>,
    encode: fn(&C, &dyn EventPayload) -> DomainResult<String>,
    decode: fn(&C, &str) -> DomainResult<Arc<dyn EventPayload>>,
}

/// 注册表构建器：注入编解码器并登记事件类型
pub struct TypeRegistryBuilder<C> {
    codec: Option<Arc<C>>,
    pending: Vec<PendingEntry<C>>,
}

impl<C> Default for TypeRegistryBuilder<C> {
    fn default() -> Self {
        Self {
            codec: None,
            pending: Vec::new(),
        }
    }
}

impl<C> TypeRegistryBuilder<C>
where
    C: PayloadCodec,
{
    pub fn codec(mut self, codec: C) -> Self {
        self.codec = Some(Arc::new(codec));
        self
    }

    /// 是否已注入编解码器
    pub fn is_configured(&self) -> bool {
        self.codec.is_some()
    }

    pub fn register<E>(mut self) -> Self
    where
        E: DomainEvent,
    {
        self.pending.push(PendingEntry {
            event_type: E::EVENT_TYPE,
            description: E::DESCRIPTION,
            origin: E::ORIGIN,
            max_retries: E::MAX_RETRIES,
            encode: encode_payload::<C, E>,
            decode: decode_payload::<C, E>,
        });
        self
    }

    /// 构建注册表；未注入编解码器或重复注册时失败
    pub fn build(self) -> DomainResult<TypeRegistry> {
        let codec = self.codec.ok_or(DomainError::CodecNotConfigured)?;
        let mut entries = HashMap::with_capacity(self.pending.len());

        for pending in self.pending {
            if entries.contains_key(pending.event_type) {
                return Err(DomainError::DuplicateType {
                    event_type: pending.event_type.to_string(),
                });
            }

            let encode: EncodeFn = {
                let codec = codec.clone();
                let f = pending.encode;
                Arc::new(move |payload: &dyn EventPayload| f(&codec, payload))
            };
            let decode: DecodeFn = {
                let codec = codec.clone();
                let f = pending.decode;
                Arc::new(move |text: &str| f(&codec, text))
            };

            entries.insert(
                pending.event_type,
                TypeEntry {
                    event_type: pending.event_type,
                    description: pending.description,
                    origin: pending.origin,
                    max_retries: pending.max_retries,
                    encode,
                    decode,
                },
            );
        }

        Ok(TypeRegistry {
            codec_name: codec.name(),
            entries,
        })
    }
}

fn encode_payload<C, E>(codec: &C, payload: &dyn EventPayload) -> DomainResult<String>
where
    C: PayloadCodec,
    E: DomainEvent,
{
    let value = payload
        .as_any()
        .downcast_ref::<E>()
        .ok_or_else(|| DomainError::TypeMismatch {
            expected: std::any::type_name::<E>().to_string(),
            found: format!("{payload:?}"),
        })?;
    codec.serialize(value)
}

fn decode_payload<C, E>(codec: &C, text: &str) -> DomainResult<Arc<dyn EventPayload>>
where
    C: PayloadCodec,
    E: DomainEvent,
{
    let value: E = codec.parse(text)?;
    Ok(Arc::new(value))
}
