use serde::Serialize;
use serde::de::DeserializeOwned;
use std::any::Any;
use std::fmt;

/// 事件来源：只有内部产生的事件会在主总线上被自动分发
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventOrigin {
    /// 本系统内业务操作产生
    Internal,
    /// 外部系统产生（名称用于审计与扩展点识别）
    External(&'static str),
}

impl EventOrigin {
    pub fn is_internal(&self) -> bool {
        matches!(self, EventOrigin::Internal)
    }
}

impl fmt::Display for EventOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventOrigin::Internal => f.write_str("internal"),
            EventOrigin::External(system) => f.write_str(system),
        }
    }
}

/// 领域事件载荷需要满足的通用能力边界
///
/// 类型级常量即注册表条目的来源：符号、描述、来源与默认重试上限。
pub trait DomainEvent:
    Serialize + DeserializeOwned + fmt::Debug + Send + Sync + 'static
{
    /// 事件类型符号（形如 `order.created`）
    const EVENT_TYPE: &'static str;

    /// 人类可读的描述
    const DESCRIPTION: &'static str = "";

    /// 事件来源
    const ORIGIN: EventOrigin = EventOrigin::Internal;

    /// 类型级默认重试上限，`None` 时使用分发器配置
    const MAX_RETRIES: Option<u32> = None;
}

/// 类型擦除后的载荷，处理器通过 `Event::payload_as` 取回具体类型
pub trait EventPayload: Any + Send + Sync + fmt::Debug {
    fn as_any(&self) -> &dyn Any;
}

impl<T> EventPayload for T
where
    T: Any + Send + Sync + fmt::Debug,
{
    fn as_any(&self) -> &dyn Any {
        self
    }
}
