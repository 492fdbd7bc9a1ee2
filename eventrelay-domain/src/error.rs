//! 领域层统一错误定义
//!
//! 聚焦编解码、类型注册、处理器失败、状态迁移与存储等最小必要集合，
//! 便于在各实现层统一转换为 `DomainError`。
//!
use crate::persist::ConsumeStatus;
use thiserror::Error;

/// 统一错误类型（基础库最小必要集）
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum DomainError {
    // --- 编解码 ---
    #[error("codec error: {reason}")]
    Codec { reason: String },
    #[error("payload codec not configured")]
    CodecNotConfigured,
    #[error("parse error: {reason}")]
    Parse { reason: String },

    // --- 类型注册 ---
    #[error("unknown event type: {event_type}")]
    UnknownType { event_type: String },
    #[error("duplicate event type: {event_type}")]
    DuplicateType { event_type: String },
    #[error("type mismatch: expected={expected}, found={found}")]
    TypeMismatch { expected: String, found: String },

    // --- 分发与处理 ---
    #[error("event handler error: handler={handler}, reason={reason}")]
    HandlerFailure { handler: String, reason: String },
    #[error("invalid status transition: from={from}, to={to}")]
    InvalidTransition {
        from: ConsumeStatus,
        to: ConsumeStatus,
    },
    #[error("event bus error: {reason}")]
    EventBus { reason: String },

    // --- 存储 ---
    #[error("consume record store unavailable: {reason}")]
    StoreUnavailable { reason: String },

    // --- 通用 ---
    #[error("invalid value: {reason}")]
    InvalidValue { reason: String },
    #[error("not found: {reason}")]
    NotFound { reason: String },
}

impl DomainError {
    pub fn store_unavailable(reason: impl Into<String>) -> Self {
        DomainError::StoreUnavailable {
            reason: reason.into(),
        }
    }

    pub fn event_bus(reason: impl Into<String>) -> Self {
        DomainError::EventBus {
            reason: reason.into(),
        }
    }

    pub fn handler_failure(handler: impl Into<String>, reason: impl Into<String>) -> Self {
        DomainError::HandlerFailure {
            handler: handler.into(),
            reason: reason.into(),
        }
    }
}

/// 统一 Result 类型别名
pub type DomainResult<T> = Result<T, DomainError>;

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        DomainError::Codec {
            reason: err.to_string(),
        }
    }
}

// 允许在基础设施层直接使用 `?` 将 sqlx 错误转换为 DomainError
#[cfg(feature = "infra-sqlx")]
impl From<sqlx::Error> for DomainError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DomainError::NotFound {
                reason: "row not found".to_string(),
            },
            other => DomainError::StoreUnavailable {
                reason: other.to_string(),
            },
        }
    }
}
