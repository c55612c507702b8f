//! 错误类型：LLM 调用可靠性层错误与流水线错误
//!
//! LlmError 由 RetryingLlmClient 分类（可重试 / 不可重试）；AgentError 汇总工具与 LLM 错误。
//! Planner / Worker 把错误降级为回退结果，只有 Solver 把错误抛给调用方。

use thiserror::Error;

/// 文本生成服务调用中可能出现的错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LlmError {
    /// 单次尝试超时
    #[error("LLM request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// 外部取消（CancellationToken），不重试
    #[error("LLM request cancelled")]
    Cancelled,

    /// 服务端判定内容违反策略，不重试
    #[error("Content policy violation: {0}")]
    ContentPolicy(String),

    /// 重试次数耗尽
    #[error("LLM request failed after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: Box<LlmError> },

    #[error("Rate limited (retry after {retry_after_ms:?}ms)")]
    RateLimited { retry_after_ms: Option<u64> },

    /// 网络 / 5xx 等服务端错误
    #[error("Provider error: {0}")]
    Provider(String),

    /// 请求本身无法构造（参数错误），不重试
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl LlmError {
    /// 是否值得重试：取消、内容策略、非法请求与已耗尽均不重试
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LlmError::Timeout { .. } | LlmError::RateLimited { .. } | LlmError::Provider(_)
        )
    }

    /// 根据服务端错误文本分类（async-openai 的错误只稳定提供 Display）
    pub fn classify(message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_lowercase();
        if lower.contains("content_policy")
            || lower.contains("content_filter")
            || lower.contains("content management policy")
            || lower.contains("content policy")
        {
            LlmError::ContentPolicy(message)
        } else if lower.contains("rate limit") || lower.contains("rate_limit") || lower.contains("429")
        {
            LlmError::RateLimited {
                retry_after_ms: None,
            }
        } else if lower.contains("invalid_request") || lower.contains("invalid request") {
            LlmError::InvalidRequest(message)
        } else {
            LlmError::Provider(message)
        }
    }

    /// 事件与日志中使用的简短分类名
    pub fn kind(&self) -> &'static str {
        match self {
            LlmError::Timeout { .. } => "timeout",
            LlmError::Cancelled => "cancelled",
            LlmError::ContentPolicy(_) => "content_policy",
            LlmError::RetriesExhausted { .. } => "retries_exhausted",
            LlmError::RateLimited { .. } => "rate_limited",
            LlmError::Provider(_) => "provider",
            LlmError::InvalidRequest(_) => "invalid_request",
        }
    }
}

/// 流水线运行过程中的错误
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Tool execution failed: {0}")]
    ToolExecutionFailed(String),

    #[error("Tool timeout: {0}")]
    ToolTimeout(String),

    #[error("Unknown tool: {0}")]
    UnknownTool(String),
}
