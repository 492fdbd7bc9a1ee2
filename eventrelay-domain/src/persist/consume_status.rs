use crate::error::{DomainError, DomainResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 消费状态
///
/// `CREATED → PROCESSING → {SUCCESS | RETRYING | FAILED}`，以及重放时的 `RETRYING → PROCESSING`。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConsumeStatus {
    /// 记录已存在，尚未尝试
    #[default]
    Created,
    /// 分发进行中
    Processing,
    /// 终态：所有处理器均成功
    Success,
    /// 非终态：有处理器失败且策略允许再次尝试
    Retrying,
    /// 终态：有处理器失败且不再重试
    Failed,
}

impl ConsumeStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ConsumeStatus::Created => "CREATED",
            ConsumeStatus::Processing => "PROCESSING",
            ConsumeStatus::Success => "SUCCESS",
            ConsumeStatus::Retrying => "RETRYING",
            ConsumeStatus::Failed => "FAILED",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ConsumeStatus::Success | ConsumeStatus::Failed)
    }

    pub fn can_transition_to(self, next: ConsumeStatus) -> bool {
        use ConsumeStatus::*;

        matches!(
            (self, next),
            (Created, Processing)
                | (Retrying, Processing)
                | (Processing, Success)
                | (Processing, Retrying)
                | (Processing, Failed)
        )
    }
}

impl fmt::Display for ConsumeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConsumeStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> DomainResult<Self> {
        match s {
            "CREATED" => Ok(ConsumeStatus::Created),
            "PROCESSING" => Ok(ConsumeStatus::Processing),
            "SUCCESS" => Ok(ConsumeStatus::Success),
            "RETRYING" => Ok(ConsumeStatus::Retrying),
            "FAILED" => Ok(ConsumeStatus::Failed),
            other => Err(DomainError::Parse {
                reason: format!("unknown consume status: {other}"),
            }),
        }
    }
}
