//! Planner：把任务分解为带证据变量的步骤
//!
//! 提示词列出已注册工具与可用示例，要求模型按 `Plan: <描述> #E<n> = <Tool>[<args>]` 输出；
//! 用一个全局正则提取所有步骤（保留模型自己的编号）。解析为空或 LLM 调用失败时回退为单步计划，
//! 规划失败永远不会中断流水线。

use std::collections::HashSet;
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use regex::Regex;

use crate::core::events::preview;
use crate::core::{Caller, EventBus, PipelineEvent};
use crate::llm::{Message, RetryingLlmClient};
use crate::pipeline::examples::{filter_examples, PlanExample};
use crate::pipeline::{PlanResult, Step};
use crate::tools::ToolRegistry;

/// Planner 在事件中使用的工具名
pub const PLANNER_TOOL: &str = "planner";

const PLANNER_SYSTEM: &str = "You are a planner. You break a task into a short sequence of tool calls whose outputs are stored in evidence variables #E1, #E2, ... that later steps can reference.";

fn plan_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"Plan:\s*(.+?)\s*(#E\d+)\s*=\s*(\w+)\s*\[([^\]]*)\]")
            .expect("plan regex is valid")
    })
}

/// 解析计划文本：每个匹配成为一个 Step，顺序与文本一致，不重新编号；永不失败
pub fn parse_plan(text: &str) -> Vec<Step> {
    plan_regex()
        .captures_iter(text)
        .map(|c| Step::new(c[1].trim(), &c[2], &c[3], c[4].trim()))
        .collect()
}

/// 计划诊断：重复变量、编号不递增、前向 / 自引用；只报告，不拒绝
pub fn validate_plan(steps: &[Step]) -> Vec<String> {
    let ref_re = {
        static RE: OnceLock<Regex> = OnceLock::new();
        RE.get_or_init(|| Regex::new(r"#E(\d+)").expect("ref regex is valid"))
    };
    let mut issues = Vec::new();
    let mut seen = HashSet::new();
    let mut last: Option<u32> = None;
    for step in steps {
        if !seen.insert(step.variable.as_str()) {
            issues.push(format!("duplicate variable {}", step.variable));
        }
        let Some(idx) = step.index() else {
            continue;
        };
        if let Some(prev) = last {
            if idx <= prev {
                issues.push(format!("{} does not increase after #E{}", step.variable, prev));
            }
        }
        last = Some(idx);
        for cap in ref_re.captures_iter(&step.args) {
            let referenced: u32 = match cap[1].parse() {
                Ok(n) => n,
                Err(_) => continue,
            };
            if referenced >= idx {
                issues.push(format!(
                    "{} references #E{} which is not resolved before it",
                    step.variable, referenced
                ));
            }
        }
    }
    issues
}

pub struct Planner {
    llm: RetryingLlmClient,
    tools: Arc<ToolRegistry>,
    events: EventBus,
    examples: Vec<PlanExample>,
    fallback_tool: String,
    max_steps: usize,
}

impl Planner {
    pub fn new(
        llm: RetryingLlmClient,
        tools: Arc<ToolRegistry>,
        events: EventBus,
        examples: Vec<PlanExample>,
        fallback_tool: impl Into<String>,
        max_steps: usize,
    ) -> Self {
        Self {
            llm,
            tools,
            events,
            examples,
            fallback_tool: fallback_tool.into(),
            max_steps: max_steps.max(1),
        }
    }

    /// 单步回退计划：用通用推理工具直接回答原任务
    pub fn fallback_step(&self, task: &str) -> Step {
        Step::new(
            "Answer the task directly with general reasoning.",
            "#E1",
            self.fallback_tool.clone(),
            task,
        )
    }

    /// 组装规划提示词（user 消息内容）
    pub fn build_prompt(&self, task: &str) -> String {
        let available: HashSet<String> = self.tools.tool_names().into_iter().collect();
        let tools = self
            .tools
            .tool_descriptions()
            .into_iter()
            .enumerate()
            .map(|(i, (name, desc))| format!("({}) {}[input]: {}", i + 1, name, desc))
            .collect::<Vec<_>>()
            .join("\n");
        let examples = filter_examples(&self.examples, &available)
            .into_iter()
            .map(|e| e.render())
            .collect::<Vec<_>>()
            .join("\n\n");

        let mut prompt = String::new();
        prompt.push_str(
            "For the following task, make plans that can solve the problem step by step. \
             For each plan, indicate which external tool together with tool input to retrieve evidence. \
             You can store the evidence into a variable #E that can be called by later tools. \
             (Plan, #E1, Plan, #E2, Plan, ...)\n\n",
        );
        prompt.push_str("Tools can be one of the following:\n");
        prompt.push_str(if tools.is_empty() { "(none)" } else { &tools });
        prompt.push_str("\n\n");
        if !examples.is_empty() {
            prompt.push_str("For example,\n");
            prompt.push_str(&examples);
            prompt.push_str("\n\n");
        }
        prompt.push_str(&format!(
            "Begin! Use between 1 and {} steps. Write each step on one line exactly as \
             `Plan: <description> #E<n> = <Tool>[<input>]`, using only the tools listed above.\n\n\
             Task: {}",
            self.max_steps, task
        ));
        prompt
    }

    /// 生成计划；总会返回至少一步，并总会发出 plan_created
    pub async fn create_plan(&self, task: &str) -> PlanResult {
        let messages = [
            Message::system(PLANNER_SYSTEM),
            Message::user(self.build_prompt(task)),
        ];
        self.events.emit(PipelineEvent::ToolStart {
            tool: PLANNER_TOOL.to_string(),
            args: task.to_string(),
            step: None,
        });
        let started = Instant::now();

        let (result, fallback) = match self.llm.complete(&messages, None, Caller::Planner).await {
            Ok(text) => {
                let steps = parse_plan(&text);
                if steps.is_empty() {
                    tracing::warn!("planner output contained no plan lines, using fallback plan");
                    self.events.emit(PipelineEvent::info(
                        "planner output contained no parsable steps; using single-step fallback plan",
                    ));
                    (
                        PlanResult {
                            plan_string: text,
                            steps: vec![self.fallback_step(task)],
                        },
                        true,
                    )
                } else {
                    for issue in validate_plan(&steps) {
                        tracing::warn!(issue = %issue, "plan diagnostic");
                        self.events.emit(PipelineEvent::info(format!("plan diagnostic: {issue}")));
                    }
                    (PlanResult { plan_string: text, steps }, false)
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "plan generation failed, using fallback plan");
                self.events
                    .emit(PipelineEvent::error(e.to_string(), "plan_generation", None));
                let step = self.fallback_step(task);
                (
                    PlanResult {
                        plan_string: step.to_plan_line(),
                        steps: vec![step],
                    },
                    true,
                )
            }
        };

        self.events.emit(PipelineEvent::ToolComplete {
            tool: PLANNER_TOOL.to_string(),
            step: None,
            preview: preview(&result.plan_string, 200),
            fallback,
            duration_ms: started.elapsed().as_millis() as u64,
        });
        tracing::info!(steps = result.steps.len(), fallback, "plan created");
        self.events.emit(PipelineEvent::PlanCreated {
            task: task.to_string(),
            plan_string: result.plan_string.clone(),
            steps: result.steps.clone(),
        });
        result
    }
}
