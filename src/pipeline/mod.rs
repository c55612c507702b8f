//! 规划 / 执行 / 求解流水线
//!
//! - **planner**: 任务 -> 带证据变量的步骤（解析失败时回退单步计划）
//! - **worker**: 顺序执行步骤，变量替换、工具调用与 LLM 回退
//! - **solver**: 汇总证据生成最终答案
//! - **builder**: 组装各组件
//!
//! [`Pipeline::process`] 串联三者：规划与执行阶段的失败都被吸收，只有求解失败会记录到
//! `state.errors`，并按配置用原始证据拼出降级答案。

pub mod builder;
pub mod examples;
pub mod planner;
pub mod solver;
pub mod types;
pub mod worker;

use std::sync::Arc;

pub use builder::{build_tool_registry, PipelineBuilder};
pub use examples::{default_examples, PlanExample};
pub use planner::{parse_plan, validate_plan, Planner};
pub use solver::{render_evidence, truncate_evidence, Solver, TRUNCATION_MARKER};
pub use types::{PipelineState, PlanResult, Results, Step};
pub use worker::{substitute_variables, Worker, FALLBACK_MARKER};

use crate::core::{CancelScope, EventBus, PipelineEvent};
use crate::tools::ToolRegistry;

/// 降级答案的前缀
pub const DEGRADED_PREFIX: &str = "[Degraded] ";

/// 一个会话的流水线实例；session_id 在创建时生成，跨多次 process 保持不变
pub struct Pipeline {
    session_id: String,
    planner: Planner,
    worker: Worker,
    solver: Solver,
    tools: Arc<ToolRegistry>,
    events: EventBus,
    cancel: CancelScope,
    degraded_answer: bool,
    state: PipelineState,
}

impl Pipeline {
    pub(crate) fn from_parts(
        planner: Planner,
        worker: Worker,
        solver: Solver,
        tools: Arc<ToolRegistry>,
        events: EventBus,
        cancel: CancelScope,
        degraded_answer: bool,
    ) -> Self {
        let session_id = uuid::Uuid::new_v4().to_string();
        Self {
            state: PipelineState::new(session_id.clone()),
            session_id,
            planner,
            worker,
            solver,
            tools,
            events,
            cancel,
            degraded_answer,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// 最近一次 process 的状态
    pub fn state(&self) -> &PipelineState {
        &self.state
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn tools(&self) -> &Arc<ToolRegistry> {
        &self.tools
    }

    /// 取消作用域句柄，可交给 Ctrl+C 处理等外部触发方
    pub fn cancel_scope(&self) -> CancelScope {
        self.cancel.clone()
    }

    /// 中止进行中的 LLM 调用；同一任务中之后的调用照常进行
    pub fn cancel(&self) {
        tracing::info!(session_id = %self.session_id, "pipeline cancelled");
        self.cancel.cancel();
    }

    /// 执行一个任务：规划 -> 逐步执行 -> 求解
    ///
    /// 总会返回状态；求解失败时 `result` 为降级答案（或在关闭降级时为 None）。
    pub async fn process(&mut self, task: &str) -> PipelineState {
        self.state.reset(task);
        self.cancel.reset();
        tracing::info!(session_id = %self.session_id, task = %task, "processing task");

        let plan = self.planner.create_plan(task).await;
        self.state.plan_string = plan.plan_string;

        let mut results = Results::new();
        self.worker.execute_plan(&plan.steps, &mut results).await;
        self.state.steps = Some(plan.steps);
        self.state.results = Some(results);

        match self.solver.solve(&self.state).await {
            Ok(answer) => self.state.result = Some(answer),
            Err(e) => {
                self.state.errors.push(format!("solution_generation: {e}"));
                if self.degraded_answer {
                    let answer = degraded_answer(&self.state);
                    self.events.emit(PipelineEvent::info(
                        "solver failed; returning evidence gathered so far as a degraded answer",
                    ));
                    self.state.result = Some(answer);
                }
            }
        }
        self.state.clone()
    }
}

/// 用原始证据拼出降级答案；没有证据时退回计划原文
pub fn degraded_answer(state: &PipelineState) -> String {
    let evidence = state
        .results
        .as_ref()
        .filter(|r| !r.is_empty())
        .map(|r| {
            r.iter()
                .map(|(k, v)| format!("{k}: {v}"))
                .collect::<Vec<_>>()
                .join("\n")
        })
        .unwrap_or_else(|| state.plan_string.clone());
    format!(
        "{DEGRADED_PREFIX}Could not produce a final answer for \"{}\". Evidence collected:\n{}",
        state.task, evidence
    )
}
