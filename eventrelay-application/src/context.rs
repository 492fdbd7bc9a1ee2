use eventrelay_domain::context::ExecutionContext;
use uuid::Uuid;

/// 应用层上下文（Application Context）
///
/// 承载一次应用层调用所需的横切信息：
/// - 调用者 `user_id`；
/// - 链路 `trace_id`：为空时在进入执行上下文时生成；
/// - 幂等键（`idempotency_key`）：`EventPublisher::run` 据此保证同一请求的事件只发布一次。
///
/// 典型用法：
/// ```rust
/// use eventrelay_application::context::AppContext;
///
/// let ctx = AppContext {
///     user_id: Some("u-1".into()),
///     trace_id: None,
///     idempotency_key: Some("idem-xyz".into()),
/// };
/// let exec = ctx.execution_context();
/// assert_eq!(exec.user_id(), Some("u-1"));
/// assert!(exec.trace_id().is_some());
/// ```
#[derive(Clone, Debug, Default)]
pub struct AppContext {
    pub user_id: Option<String>,
    pub trace_id: Option<String>,
    /// 幂等键（可选）：为空则不做去重
    pub idempotency_key: Option<String>,
}

impl AppContext {
    pub fn for_user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            ..Default::default()
        }
    }

    /// 转换为领域层执行上下文
    pub fn execution_context(&self) -> ExecutionContext {
        let trace_id = self
            .trace_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().simple().to_string());

        ExecutionContext::builder()
            .maybe_user_id(self.user_id.clone())
            .trace_id(trace_id)
            .build()
    }
}
