//! Solver：汇总计划与证据，生成最终答案
//!
//! 证据超出预算时截断并追加 [`TRUNCATION_MARKER`]；没有步骤时直接用 Planner 原文作证据。
//! 失败时发出一次 solution_generation 错误事件并向上传播，由调用方决定如何降级。

use std::time::Instant;

use crate::core::events::preview;
use crate::core::{Caller, EventBus, LlmError, PipelineEvent};
use crate::llm::{Message, RetryingLlmClient};
use crate::pipeline::PipelineState;

/// Solver 在事件中使用的工具名
pub const SOLVER_TOOL: &str = "solver";

/// 证据截断标记
pub const TRUNCATION_MARKER: &str = "...[truncated]";

const SOLVER_SYSTEM: &str = "You solve tasks using evidence gathered by tools. Be concise and precise.";

/// 按字符截断证据；未超预算时原样返回
pub fn truncate_evidence(evidence: &str, budget: usize) -> String {
    if evidence.chars().count() <= budget {
        return evidence.to_string();
    }
    let mut out: String = evidence.chars().take(budget).collect();
    out.push_str(TRUNCATION_MARKER);
    out
}

/// 渲染 "计划 + 调用 + 证据" 文本
pub fn render_evidence(state: &PipelineState, budget: usize) -> String {
    let steps = match &state.steps {
        Some(steps) if !steps.is_empty() => steps,
        _ => return state.plan_string.clone(),
    };
    let mut out = String::new();
    for step in steps {
        let evidence = state
            .results
            .as_ref()
            .and_then(|r| r.get(&step.variable))
            .map(|e| truncate_evidence(e, budget))
            .unwrap_or_else(|| "(no evidence)".to_string());
        out.push_str(&format!(
            "Plan: {}\n{}\nEvidence: {}\n\n",
            step.plan,
            step.invocation(),
            evidence
        ));
    }
    out.trim_end().to_string()
}

pub struct Solver {
    llm: RetryingLlmClient,
    events: EventBus,
    evidence_budget: usize,
}

impl Solver {
    pub fn new(llm: RetryingLlmClient, events: EventBus, evidence_budget: usize) -> Self {
        Self {
            llm,
            events,
            evidence_budget,
        }
    }

    pub fn build_prompt(&self, state: &PipelineState) -> String {
        format!(
            "Solve the following task. To help you solve the task, we have made step-by-step plans \
             and retrieved corresponding evidence for each plan. The evidence may be incomplete, \
             truncated or contradictory; when it is, state your assumptions.\n\n\
             {}\n\n\
             First summarize what each piece of evidence says in one short line, then give the \
             final answer on its own line starting with \"Answer:\".\n\n\
             Task: {}",
            render_evidence(state, self.evidence_budget),
            state.task
        )
    }

    /// 生成最终答案；成功时发出 solution_found（携带已写入答案的状态快照）
    pub async fn solve(&self, state: &PipelineState) -> Result<String, LlmError> {
        let messages = [
            Message::system(SOLVER_SYSTEM),
            Message::user(self.build_prompt(state)),
        ];
        self.events.emit(PipelineEvent::ToolStart {
            tool: SOLVER_TOOL.to_string(),
            args: state.task.clone(),
            step: None,
        });
        let started = Instant::now();

        match self.llm.complete(&messages, None, Caller::Solver).await {
            Ok(answer) => {
                let answer = answer.trim().to_string();
                self.events.emit(PipelineEvent::ToolComplete {
                    tool: SOLVER_TOOL.to_string(),
                    step: None,
                    preview: preview(&answer, 200),
                    fallback: false,
                    duration_ms: started.elapsed().as_millis() as u64,
                });
                let mut finished = state.clone();
                finished.result = Some(answer.clone());
                self.events.emit(PipelineEvent::SolutionFound {
                    state: Box::new(finished),
                });
                tracing::info!(chars = answer.chars().count(), "solution found");
                Ok(answer)
            }
            Err(e) => {
                tracing::error!(error = %e, "solution generation failed");
                self.events
                    .emit(PipelineEvent::error(e.to_string(), "solution_generation", None));
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{MockLlmClient, RetryConfig};
    use crate::pipeline::{Results, Step};
    use std::sync::Arc;
    use std::time::Duration;

    fn state_with(evidence: &str) -> PipelineState {
        let mut state = PipelineState::new("s");
        state.task = "What is 2 + 2?".into();
        state.steps = Some(vec![Step::new("add", "#E1", "Calculator", "2 + 2")]);
        let mut r = Results::new();
        r.insert("#E1", evidence);
        state.results = Some(r);
        state
    }

    fn solver(mock: Arc<MockLlmClient>, bus: EventBus) -> Solver {
        let cfg = RetryConfig {
            max_retries: 2,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            ..RetryConfig::default()
        };
        Solver::new(RetryingLlmClient::new(mock, cfg, bus.clone()), bus, 300)
    }

    #[test]
    fn test_truncation_stays_within_budget() {
        let long = "x".repeat(1000);
        let out = truncate_evidence(&long, 300);
        assert!(out.ends_with(TRUNCATION_MARKER));
        assert_eq!(out.chars().count(), 300 + TRUNCATION_MARKER.chars().count());
        assert_eq!(truncate_evidence("short", 300), "short");
    }

    #[test]
    fn test_render_uses_plan_string_without_steps() {
        let mut state = PipelineState::new("s");
        state.plan_string = "raw planner text".into();
        assert_eq!(render_evidence(&state, 300), "raw planner text");
        state.steps = Some(Vec::new());
        assert_eq!(render_evidence(&state, 300), "raw planner text");
    }

    #[test]
    fn test_render_includes_invocation_and_evidence() {
        let rendered = render_evidence(&state_with("4"), 300);
        assert!(rendered.contains("Plan: add"));
        assert!(rendered.contains("#E1 = Calculator[2 + 2]"));
        assert!(rendered.contains("Evidence: 4"));
    }

    #[tokio::test]
    async fn test_solve_emits_solution_found_with_result() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        let s = solver(Arc::new(MockLlmClient::with_responses(["Answer: 4"])), bus);

        let answer = s.solve(&state_with("4")).await.unwrap();
        assert_eq!(answer, "Answer: 4");

        let mut found = None;
        while let Ok(ev) = rx.try_recv() {
            if let PipelineEvent::SolutionFound { state } = ev {
                found = state.result;
            }
        }
        assert_eq!(found.as_deref(), Some("Answer: 4"));
    }

    #[tokio::test]
    async fn test_solve_failure_emits_one_error_and_propagates() {
        let bus = EventBus::new(64);
        let mut rx = bus.subscribe();
        let mock = Arc::new(MockLlmClient::new());
        mock.push_errs(LlmError::Provider("down".into()), 10);
        let s = solver(mock, bus);

        let err = s.solve(&state_with("4")).await.unwrap_err();
        assert!(matches!(err, LlmError::RetriesExhausted { attempts: 3, .. }));

        let mut contexts = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            if let PipelineEvent::Error { context, .. } = ev {
                contexts.push(context);
            }
        }
        assert_eq!(
            contexts.iter().filter(|c| *c == "solution_generation").count(),
            1
        );
    }
}
