//! 流水线事件总线
//!
//! PipelineEvent 为封闭的标签联合（可序列化为 JSON 供前端 / 日志展示）；
//! EventBus 基于 tokio broadcast：多订阅者、发送永不阻塞、不缓存历史（订阅前的事件不会补发）。

use serde::{Serialize, Serializer};
use tokio::sync::broadcast;

use crate::llm::TokenUsage;
use crate::pipeline::{PipelineState, Step};

/// 默认事件通道容量；慢订阅者落后超过容量时丢失旧事件
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// LLM 调用方身份（completion / retry 事件携带，供外部做 token 统计）
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Caller {
    Planner,
    Solver,
    /// Worker 的回退路径（工具缺失或失败时直接问模型）
    Worker,
    /// 通过工具发起的调用，如 LLM 工具
    Tool(String),
}

impl Caller {
    pub fn as_str(&self) -> &str {
        match self {
            Caller::Planner => "planner",
            Caller::Solver => "solver",
            Caller::Worker => "worker",
            Caller::Tool(name) => name.as_str(),
        }
    }
}

impl std::fmt::Display for Caller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Caller {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// 流水线生命周期事件
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    /// Planner 产出计划（含回退计划）
    PlanCreated {
        task: String,
        plan_string: String,
        steps: Vec<Step>,
    },
    /// 开始调用工具（planner / solver 也以工具形式上报）
    ToolStart {
        tool: String,
        args: String,
        step: Option<String>,
    },
    /// 工具返回（预览，避免过长）
    ToolComplete {
        tool: String,
        step: Option<String>,
        preview: String,
        fallback: bool,
        duration_ms: u64,
    },
    /// Solver 完成，携带完整状态
    SolutionFound { state: Box<PipelineState> },
    /// 即将退避重试
    Retry {
        caller: Caller,
        attempt: u32,
        max_retries: u32,
        backoff_ms: u64,
        error: String,
    },
    /// 错误；context 标明发生位置（如 max_retries_exceeded / solution_generation）
    Error {
        error: String,
        context: String,
        step: Option<String>,
    },
    /// 一次 LLM 调用成功
    Completion {
        caller: Caller,
        attempts: u32,
        duration_ms: u64,
        usage: Option<TokenUsage>,
    },
    Info { message: String },
}

impl PipelineEvent {
    /// 事件类型名（与 JSON 中的 type 字段一致）
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineEvent::PlanCreated { .. } => "plan_created",
            PipelineEvent::ToolStart { .. } => "tool_start",
            PipelineEvent::ToolComplete { .. } => "tool_complete",
            PipelineEvent::SolutionFound { .. } => "solution_found",
            PipelineEvent::Retry { .. } => "retry",
            PipelineEvent::Error { .. } => "error",
            PipelineEvent::Completion { .. } => "completion",
            PipelineEvent::Info { .. } => "info",
        }
    }

    pub fn error(error: impl Into<String>, context: impl Into<String>, step: Option<String>) -> Self {
        PipelineEvent::Error {
            error: error.into(),
            context: context.into(),
            step,
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        PipelineEvent::Info {
            message: message.into(),
        }
    }
}

/// 事件总线句柄：Clone 后共享同一通道，由构造函数显式传入各组件
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PipelineEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// 发送事件；无订阅者时直接丢弃
    pub fn emit(&self, event: PipelineEvent) {
        tracing::trace!(event = event.kind(), "pipeline event");
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

/// 截取预览文本（按字符计数）
pub(crate) fn preview(text: &str, max_chars: usize) -> String {
    if text.chars().count() > max_chars {
        format!("{}...", text.chars().take(max_chars).collect::<String>())
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serializes_with_type_tag() {
        let ev = PipelineEvent::Retry {
            caller: Caller::Planner,
            attempt: 2,
            max_retries: 3,
            backoff_ms: 1000,
            error: "timeout".into(),
        };
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["type"], "retry");
        assert_eq!(json["caller"], "planner");
        assert_eq!(json["attempt"], 2);
    }

    #[test]
    fn test_tool_caller_serializes_as_name() {
        let json = serde_json::to_value(Caller::Tool("LLM".into())).unwrap();
        assert_eq!(json, "LLM");
    }

    #[tokio::test]
    async fn test_all_subscribers_receive_in_order() {
        let bus = EventBus::new(16);
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();
        bus.emit(PipelineEvent::info("one"));
        bus.emit(PipelineEvent::info("two"));

        for rx in [&mut a, &mut b] {
            let first = rx.recv().await.unwrap();
            let second = rx.recv().await.unwrap();
            assert!(matches!(first, PipelineEvent::Info { ref message } if message == "one"));
            assert!(matches!(second, PipelineEvent::Info { ref message } if message == "two"));
        }
    }

    #[test]
    fn test_late_subscriber_misses_earlier_events() {
        let bus = EventBus::new(16);
        bus.emit(PipelineEvent::info("lost"));
        let mut rx = bus.subscribe();
        assert!(rx.try_recv().is_err());
        bus.emit(PipelineEvent::info("seen"));
        assert!(matches!(rx.try_recv(), Ok(PipelineEvent::Info { .. })));
    }

    #[test]
    fn test_preview_truncates_by_chars() {
        assert_eq!(preview("abcdef", 3), "abc...");
        assert_eq!(preview("abc", 3), "abc");
    }
}
