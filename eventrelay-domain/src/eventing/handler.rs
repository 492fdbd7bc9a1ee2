//! 事件处理器（EventHandler）
//!
//! 定义消费某类/多类/全部事件的处理逻辑与元信息（名称、订阅类型），
//! 以及按事件类型解析处理器集合的 `HandlerRegistry`。
//!
use crate::event::Event;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Clone, Debug)]
pub enum HandledEventType {
    One(String),
    Many(Vec<String>),
    All,
}

/// 事件处理器：处理某一类型的事件
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// 处理器名称（用于失败记录与日志）
    fn handler_name(&self) -> &str;
    /// 返回该处理器支持的事件类型
    fn handled_event_type(&self) -> HandledEventType;
    /// 处理事件
    async fn handle(&self, event: &Event) -> anyhow::Result<()>;
}

/// 事件类型到处理器集合的映射，同一类型可以有零个、一个或多个处理器
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    by_type: HashMap<String, Vec<Arc<dyn EventHandler>>>,
    all: Vec<Arc<dyn EventHandler>>,
}

impl HandlerRegistry {
    pub fn new(handlers: Vec<Arc<dyn EventHandler>>) -> Self {
        let mut by_type: HashMap<String, Vec<Arc<dyn EventHandler>>> = HashMap::new();
        let mut all: Vec<Arc<dyn EventHandler>> = Vec::new();

        for h in handlers {
            match h.handled_event_type() {
                HandledEventType::All => all.push(h),
                HandledEventType::One(t) => {
                    by_type.entry(t).or_default().push(h);
                }
                HandledEventType::Many(ts) => {
                    for t in ts {
                        by_type.entry(t).or_default().push(h.clone());
                    }
                }
            }
        }

        Self { by_type, all }
    }

    pub fn matching(&self, event_type: &str) -> Vec<Arc<dyn EventHandler>> {
        let mut merged: Vec<Arc<dyn EventHandler>> = Vec::new();
        if let Some(list) = self.by_type.get(event_type) {
            merged.extend(list.iter().cloned());
        }
        merged.extend(self.all.iter().cloned());
        merged
    }

    pub fn is_empty(&self) -> bool {
        self.by_type.is_empty() && self.all.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Named {
        name: &'static str,
        types: HandledEventType,
    }

    #[async_trait]
    impl EventHandler for Named {
        fn handler_name(&self) -> &str {
            self.name
        }
        fn handled_event_type(&self) -> HandledEventType {
            self.types.clone()
        }
        async fn handle(&self, _event: &Event) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn names(handlers: Vec<Arc<dyn EventHandler>>) -> Vec<String> {
        let mut names: Vec<String> = handlers
            .iter()
            .map(|h| h.handler_name().to_string())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn matching_merges_specific_and_catch_all_handlers() {
        let registry = HandlerRegistry::new(vec![
            Arc::new(Named {
                name: "inventory",
                types: HandledEventType::One("order.created".into()),
            }),
            Arc::new(Named {
                name: "notify",
                types: HandledEventType::Many(vec!["order.created".into(), "order.paid".into()]),
            }),
            Arc::new(Named {
                name: "audit",
                types: HandledEventType::All,
            }),
        ]);

        assert_eq!(
            names(registry.matching("order.created")),
            vec!["audit", "inventory", "notify"]
        );
        assert_eq!(names(registry.matching("order.paid")), vec!["audit", "notify"]);
        assert_eq!(names(registry.matching("order.cancelled")), vec!["audit"]);
    }

    #[test]
    fn empty_registry_matches_nothing() {
        let registry = HandlerRegistry::default();
        assert!(registry.is_empty());
        assert!(registry.matching("order.created").is_empty());
    }
}
