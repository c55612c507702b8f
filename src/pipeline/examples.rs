//! Planner 的 few-shot 示例库
//!
//! 每个示例声明所需工具；只有所需工具全部已注册的示例才会出现在提示词中，
//! 避免模型照抄示例去调用不存在的工具。

use std::collections::HashSet;

/// 单个规划示例
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanExample {
    pub task: String,
    /// 示例计划文本（每行一个 `Plan: ... #En = Tool[args]`）
    pub plan: String,
    pub required_tools: Vec<String>,
}

impl PlanExample {
    pub fn new(task: &str, plan: &str, required_tools: &[&str]) -> Self {
        Self {
            task: task.to_string(),
            plan: plan.to_string(),
            required_tools: required_tools.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// 所需工具是否都已注册
    pub fn is_supported_by(&self, available: &HashSet<String>) -> bool {
        self.required_tools.iter().all(|t| available.contains(t))
    }

    pub fn render(&self) -> String {
        format!("Task: {}\n{}", self.task, self.plan.trim())
    }
}

/// 过滤出可用的示例，保持原有顺序
pub fn filter_examples<'a>(
    examples: &'a [PlanExample],
    available: &HashSet<String>,
) -> Vec<&'a PlanExample> {
    examples
        .iter()
        .filter(|e| e.is_supported_by(available))
        .collect()
}

/// 内置示例（覆盖 Calculator / Wikipedia / Search / LLM 组合）
pub fn default_examples() -> Vec<PlanExample> {
    vec![
        PlanExample::new(
            "Thomas, Toby, and Rebecca worked a total of 157 hours in one week. Thomas worked x hours. Toby worked 10 hours less than twice what Thomas worked, and Rebecca worked 8 hours less than Toby. How many hours did Rebecca work?",
            "Plan: Translate the problem into an algebraic expression and solve it with the language model. #E1 = LLM[Solve x + (2x - 10) + ((2x - 10) - 8) = 157]\n\
             Plan: Compute the hours Rebecca worked from the solved value. #E2 = Calculator[(2 * #E1 - 10) - 8]",
            &["LLM", "Calculator"],
        ),
        PlanExample::new(
            "What is 15% of 240 plus 12?",
            "Plan: Compute the percentage and add the constant. #E1 = Calculator[240 * 0.15 + 12]",
            &["Calculator"],
        ),
        PlanExample::new(
            "Were Scott Derrickson and Ed Wood of the same nationality?",
            "Plan: Look up Scott Derrickson to find his nationality. #E1 = Wikipedia[Scott Derrickson]\n\
             Plan: Look up Ed Wood to find his nationality. #E2 = Wikipedia[Ed Wood]\n\
             Plan: Compare the two nationalities. #E3 = LLM[Are the nationalities in these texts the same? Text 1: #E1 Text 2: #E2]",
            &["Wikipedia", "LLM"],
        ),
        PlanExample::new(
            "Which crate on docs.rs provides the CancellationToken type used with tokio?",
            "Plan: Fetch the tokio-util documentation page. #E1 = Search[https://docs.rs/tokio-util/latest/tokio_util/sync/struct.CancellationToken.html]\n\
             Plan: Extract the crate name from the page. #E2 = LLM[Which crate provides CancellationToken according to: #E1]",
            &["Search", "LLM"],
        ),
        PlanExample::new(
            "What is the capital of Australia?",
            "Plan: Answer from general knowledge. #E1 = LLM[What is the capital of Australia?]",
            &["LLM"],
        ),
    ]
}
