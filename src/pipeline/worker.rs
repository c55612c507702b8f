//! Worker：按顺序执行计划步骤，产出证据
//!
//! 参数中的证据变量先被替换为已有结果，再按工具名精确查找并调用；
//! 工具缺失或失败时直接询问 LLM，答案加上 [`FALLBACK_MARKER`] 前缀。单步失败从不中断执行。

use std::sync::OnceLock;
use std::time::Instant;

use regex::Regex;

use crate::core::events::preview;
use crate::core::{AgentError, Caller, EventBus, PipelineEvent};
use crate::llm::{Message, RetryingLlmClient};
use crate::pipeline::{Results, Step};
use crate::tools::ToolExecutor;

/// 回退证据前缀
pub const FALLBACK_MARKER: &str = "[Fallback] ";

const FALLBACK_SYSTEM: &str = "You are standing in for a tool that could not be used. Answer the tool request as well as you can, briefly and without extra words.";

/// 替换参数中的证据变量
///
/// 默认按写入顺序做字面子串替换（`#E1` 也会命中 `#E10` 的前缀）；
/// `strict` 时只替换完整的 `#E<n>` 记号，单次扫描完成。
pub fn substitute_variables(args: &str, results: &Results, strict: bool) -> String {
    if strict {
        static RE: OnceLock<Regex> = OnceLock::new();
        let re = RE.get_or_init(|| Regex::new(r"#E\d+").expect("variable regex is valid"));
        return re
            .replace_all(args, |caps: &regex::Captures<'_>| {
                results
                    .get(&caps[0])
                    .map(str::to_string)
                    .unwrap_or_else(|| caps[0].to_string())
            })
            .into_owned();
    }

    let mut out = args.to_string();
    for (variable, value) in results.iter() {
        if out.contains(variable) {
            out = out.replace(variable, value);
        }
    }
    out
}

#[derive(Clone)]
pub struct Worker {
    executor: ToolExecutor,
    llm: RetryingLlmClient,
    events: EventBus,
    strict: bool,
}

impl Worker {
    pub fn new(executor: ToolExecutor, llm: RetryingLlmClient, events: EventBus) -> Self {
        Self {
            executor,
            llm,
            events,
            strict: false,
        }
    }

    pub fn with_strict_substitution(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// 执行一步，总是返回证据文本
    pub async fn execute_step(&self, step: &Step, results: &Results) -> String {
        let args = substitute_variables(&step.args, results, self.strict);
        self.events.emit(PipelineEvent::ToolStart {
            tool: step.tool.clone(),
            args: args.clone(),
            step: Some(step.variable.clone()),
        });
        let started = Instant::now();

        let (evidence, fallback) = match self.executor.execute(&step.tool, &args).await {
            Ok(output) => (output, false),
            Err(AgentError::UnknownTool(name)) => {
                tracing::warn!(tool = %name, step = %step.variable, "tool not registered, falling back to llm");
                self.events.emit(PipelineEvent::info(format!(
                    "tool '{}' is not registered; answering {} with the language model",
                    name, step.variable
                )));
                (self.fallback(step, &args, "the tool is not available").await, true)
            }
            Err(e) => {
                tracing::warn!(tool = %step.tool, step = %step.variable, error = %e, "tool failed, falling back to llm");
                self.events.emit(PipelineEvent::error(
                    e.to_string(),
                    "tool_execution",
                    Some(step.variable.clone()),
                ));
                (self.fallback(step, &args, &e.to_string()).await, true)
            }
        };

        self.events.emit(PipelineEvent::ToolComplete {
            tool: step.tool.clone(),
            step: Some(step.variable.clone()),
            preview: preview(&evidence, 200),
            fallback,
            duration_ms: started.elapsed().as_millis() as u64,
        });
        evidence
    }

    async fn fallback(&self, step: &Step, args: &str, reason: &str) -> String {
        let request = format!(
            "The tool `{}` could not be used ({}).\nStep: {}\nTool input: {}\n\
             Provide the information this tool call was supposed to return.",
            step.tool, reason, step.plan, args
        );
        let messages = [Message::system(FALLBACK_SYSTEM), Message::user(request)];
        match self.llm.complete(&messages, None, Caller::Worker).await {
            Ok(text) => format!("{FALLBACK_MARKER}{}", text.trim()),
            Err(e) => format!(
                "{FALLBACK_MARKER}No evidence for {}[{}]: {}",
                step.tool, args, e
            ),
        }
    }

    /// 按顺序执行全部步骤；变量已有结果时跳过该步
    pub async fn execute_plan(&self, steps: &[Step], results: &mut Results) {
        for step in steps {
            if results.contains(&step.variable) {
                tracing::warn!(step = %step.variable, "duplicate variable, step skipped");
                self.events.emit(PipelineEvent::info(format!(
                    "{} already has evidence; skipping {}",
                    step.variable,
                    step.invocation()
                )));
                continue;
            }
            let evidence = self.execute_step(step, results).await;
            results.insert(step.variable.clone(), evidence);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::LlmError;
    use crate::llm::{MockLlmClient, RetryConfig};
    use crate::tools::{CalculatorTool, LlmTool, Tool, ToolRegistry};
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::time::Duration;

    struct Broken;

    #[async_trait]
    impl Tool for Broken {
        fn name(&self) -> &str {
            "Broken"
        }
        fn description(&self) -> &str {
            "always fails"
        }
        async fn execute(&self, _args: &str) -> Result<String, String> {
            Err("boom".to_string())
        }
    }

    fn results(pairs: &[(&str, &str)]) -> Results {
        let mut r = Results::new();
        for (k, v) in pairs {
            r.insert(*k, *v);
        }
        r
    }

    fn worker(mock: Arc<MockLlmClient>, bus: EventBus) -> Worker {
        let mut reg = ToolRegistry::new();
        reg.register(CalculatorTool);
        reg.register(Broken);
        let cfg = RetryConfig {
            max_retries: 0,
            base_delay: Duration::from_millis(1),
            ..RetryConfig::default()
        };
        Worker::new(
            ToolExecutor::new(Arc::new(reg), 5),
            RetryingLlmClient::new(mock, cfg, bus.clone()),
            bus,
        )
    }

    #[test]
    fn test_substitutes_every_occurrence() {
        let r = results(&[("#E1", "4"), ("#E2", "x")]);
        assert_eq!(substitute_variables("#E1 + #E1 * #E2", &r, false), "4 + 4 * x");
        assert_eq!(substitute_variables("#E3 stays", &r, false), "#E3 stays");
    }

    #[test]
    fn test_substitution_is_idempotent() {
        let r = results(&[("#E1", "Paris"), ("#E2", "France")]);
        let once = substitute_variables("capital #E1 of #E2", &r, false);
        let twice = substitute_variables(&once, &r, false);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_substring_vs_strict_token_boundary() {
        let r = results(&[("#E1", "one")]);
        assert_eq!(substitute_variables("#E10", &r, false), "one0");
        assert_eq!(substitute_variables("#E10 and #E1", &r, true), "#E10 and one");
    }

    #[tokio::test]
    async fn test_registered_tool_runs_with_substituted_args() {
        let w = worker(Arc::new(MockLlmClient::new()), EventBus::new(16));
        let step = Step::new("double", "#E2", "Calculator", "#E1 * 2");
        let out = w.execute_step(&step, &results(&[("#E1", "21")])).await;
        assert_eq!(out, "42");
    }

    #[tokio::test]
    async fn test_failing_tool_falls_back_with_marker() {
        let bus = EventBus::new(32);
        let mut rx = bus.subscribe();
        let mock = Arc::new(MockLlmClient::with_responses(["fallback answer"]));
        let w = worker(mock, bus);

        let out = w
            .execute_step(&Step::new("p", "#E1", "Broken", "x"), &Results::new())
            .await;
        assert_eq!(out, "[Fallback] fallback answer");

        let mut saw_error = false;
        let mut saw_fallback_complete = false;
        while let Ok(ev) = rx.try_recv() {
            match ev {
                PipelineEvent::Error { context, step, .. } => {
                    saw_error = context == "tool_execution" && step.as_deref() == Some("#E1");
                }
                PipelineEvent::ToolComplete { fallback, .. } => saw_fallback_complete = fallback,
                _ => {}
            }
        }
        assert!(saw_error);
        assert!(saw_fallback_complete);
    }

    #[tokio::test]
    async fn test_unknown_tool_falls_back_without_error_event() {
        let bus = EventBus::new(32);
        let mut rx = bus.subscribe();
        let w = worker(Arc::new(MockLlmClient::with_responses(["guess"])), bus);

        let out = w
            .execute_step(&Step::new("p", "#E1", "Nope", "x"), &Results::new())
            .await;
        assert!(out.starts_with(FALLBACK_MARKER));
        while let Ok(ev) = rx.try_recv() {
            assert_ne!(ev.kind(), "error");
        }
    }

    #[tokio::test]
    async fn test_fallback_failure_still_yields_marked_text() {
        let mock = Arc::new(MockLlmClient::new());
        mock.push_err(LlmError::ContentPolicy("blocked".into()));
        let w = worker(mock, EventBus::new(32));

        let out = w
            .execute_step(&Step::new("p", "#E1", "Nope", "x"), &Results::new())
            .await;
        assert!(out.starts_with(FALLBACK_MARKER));
        assert!(out.contains("Nope[x]"));
    }

    #[tokio::test]
    async fn test_llm_tool_retries_beyond_executor_timeout() {
        let bus = EventBus::new(64);
        let mut rx = bus.subscribe();
        let mock = Arc::new(MockLlmClient::new());
        mock.push_errs(LlmError::Provider("502".into()), 3);
        mock.push_ok("late but fine");
        let cfg = RetryConfig {
            timeout: Duration::from_secs(1),
            max_retries: 3,
            base_delay: Duration::from_millis(30),
            max_delay: Duration::from_millis(200),
            jitter_ratio: 0.0,
        };
        let client = RetryingLlmClient::new(mock.clone(), cfg, bus.clone());
        let mut reg = ToolRegistry::new();
        reg.register(LlmTool::new("LLM", client.clone()));
        let w = Worker::new(
            ToolExecutor::with_timeout(Arc::new(reg), Duration::from_millis(50)),
            client,
            bus,
        );

        let out = w
            .execute_step(&Step::new("p", "#E1", "LLM", "question"), &Results::new())
            .await;
        assert_eq!(out, "late but fine");
        assert_eq!(mock.calls(), 4);
        while let Ok(ev) = rx.try_recv() {
            assert_ne!(ev.kind(), "error", "unexpected {ev:?}");
        }
    }

    #[tokio::test]
    async fn test_execute_plan_chains_evidence_and_skips_duplicates() {
        let w = worker(Arc::new(MockLlmClient::new()), EventBus::new(32));
        let steps = vec![
            Step::new("a", "#E1", "Calculator", "2 + 3"),
            Step::new("b", "#E2", "Calculator", "#E1 * 10"),
            Step::new("c", "#E1", "Calculator", "999"),
        ];
        let mut r = Results::new();
        w.execute_plan(&steps, &mut r).await;
        assert_eq!(r.get("#E1"), Some("5"));
        assert_eq!(r.get("#E2"), Some("50"));
        assert_eq!(r.len(), 2);
    }
}
