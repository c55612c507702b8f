//! 可观测性：tracing 初始化、事件镜像日志、按调用方累计 token 用量

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing_subscriber::{filter::LevelFilter, fmt, prelude::*, EnvFilter};

use crate::core::{EventBus, PipelineEvent};
use crate::llm::TokenUsage;

/// 日志：默认 info，可通过 RUST_LOG 覆盖；重复初始化时忽略
pub fn init() {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .try_init();
}

/// 订阅事件总线并把每个事件写入 tracing；总线关闭时任务结束
pub fn spawn_event_logger(events: &EventBus) -> JoinHandle<()> {
    let mut rx = events.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => log_event(&event),
                Err(RecvError::Lagged(n)) => tracing::warn!(skipped = n, "event logger lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    })
}

fn log_event(event: &PipelineEvent) {
    match event {
        PipelineEvent::PlanCreated { steps, .. } => {
            tracing::info!(steps = steps.len(), "plan_created")
        }
        PipelineEvent::ToolStart { tool, step, .. } => {
            tracing::debug!(tool = %tool, step = ?step, "tool_start")
        }
        PipelineEvent::ToolComplete {
            tool,
            step,
            fallback,
            duration_ms,
            ..
        } => tracing::info!(tool = %tool, step = ?step, fallback, duration_ms, "tool_complete"),
        PipelineEvent::SolutionFound { state } => {
            tracing::info!(session_id = %state.session_id, "solution_found")
        }
        PipelineEvent::Retry {
            caller,
            attempt,
            max_retries,
            backoff_ms,
            error,
        } => tracing::warn!(caller = %caller, attempt, max_retries, backoff_ms, error = %error, "retry"),
        PipelineEvent::Error {
            error,
            context,
            step,
        } => tracing::error!(context = %context, step = ?step, error = %error, "error"),
        PipelineEvent::Completion {
            caller,
            attempts,
            duration_ms,
            usage,
        } => tracing::debug!(
            caller = %caller,
            attempts,
            duration_ms,
            total_tokens = usage.map(|u| u.total_tokens),
            "completion"
        ),
        PipelineEvent::Info { message } => tracing::info!(message = %message, "info"),
    }
}

/// 按调用方累计 completion 事件中的 token 用量
#[derive(Clone, Default)]
pub struct UsageTracker {
    totals: Arc<Mutex<HashMap<String, TokenUsage>>>,
}

impl UsageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// 订阅总线并在后台累计
    pub fn attach(&self, events: &EventBus) -> JoinHandle<()> {
        let mut rx = events.subscribe();
        let tracker = self.clone();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => tracker.record(&event),
                    Err(RecvError::Lagged(n)) => {
                        tracing::warn!(skipped = n, "usage tracker lagged, totals are incomplete")
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }

    pub fn record(&self, event: &PipelineEvent) {
        if let PipelineEvent::Completion {
            caller,
            usage: Some(usage),
            ..
        } = event
        {
            let mut totals = self.totals.lock().unwrap_or_else(|e| e.into_inner());
            totals.entry(caller.to_string()).or_default().add(usage);
        }
    }

    pub fn usage_for(&self, caller: &str) -> Option<TokenUsage> {
        self.totals
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(caller)
            .copied()
    }

    pub fn total(&self) -> TokenUsage {
        let totals = self.totals.lock().unwrap_or_else(|e| e.into_inner());
        totals.values().fold(TokenUsage::default(), |mut acc, u| {
            acc.add(u);
            acc
        })
    }

    /// 按调用方名称排序的快照
    pub fn snapshot(&self) -> Vec<(String, TokenUsage)> {
        let totals = self.totals.lock().unwrap_or_else(|e| e.into_inner());
        let mut out: Vec<_> = totals.iter().map(|(k, v)| (k.clone(), *v)).collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }
}
