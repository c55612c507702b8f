//! 流水线数据模型：Step、Results（有序证据表）、PipelineState、PlanResult

use chrono::{DateTime, Utc};
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};

/// 计划中的一步：`Plan: <plan> <variable> = <tool>[<args>]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    pub plan: String,
    /// 证据变量，形如 #E1
    pub variable: String,
    pub tool: String,
    /// 参数原文，可能引用更早的变量
    pub args: String,
}

impl Step {
    pub fn new(
        plan: impl Into<String>,
        variable: impl Into<String>,
        tool: impl Into<String>,
        args: impl Into<String>,
    ) -> Self {
        Self {
            plan: plan.into(),
            variable: variable.into(),
            tool: tool.into(),
            args: args.into(),
        }
    }

    /// 变量编号（#E3 -> 3）
    pub fn index(&self) -> Option<u32> {
        variable_index(&self.variable)
    }

    /// `#E1 = Tool[args]`
    pub fn invocation(&self) -> String {
        format!("{} = {}[{}]", self.variable, self.tool, self.args)
    }

    /// 还原为计划文本行
    pub fn to_plan_line(&self) -> String {
        format!("Plan: {} {}", self.plan, self.invocation())
    }
}

pub(crate) fn variable_index(variable: &str) -> Option<u32> {
    variable.strip_prefix("#E")?.parse().ok()
}

/// 变量 -> 证据文本；按执行顺序保存，已写入的键不会被覆盖
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Results {
    entries: Vec<(String, String)>,
}

impl Results {
    pub fn new() -> Self {
        Self::default()
    }

    /// 写入证据；键已存在时不覆盖并返回 false
    pub fn insert(&mut self, variable: impl Into<String>, value: impl Into<String>) -> bool {
        let variable = variable.into();
        if self.contains(&variable) {
            return false;
        }
        self.entries.push((variable, value.into()));
        true
    }

    pub fn get(&self, variable: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == variable)
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, variable: &str) -> bool {
        self.entries.iter().any(|(k, _)| k == variable)
    }

    /// 按写入顺序遍历
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Serialize for Results {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (k, v) in &self.entries {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

/// 一次任务执行的聚合状态
#[derive(Debug, Clone, Serialize)]
pub struct PipelineState {
    /// 每个 Pipeline 实例创建一次，跨多次 process 保持不变
    pub session_id: String,
    pub task: String,
    /// Planner 原始输出（解析失败时也保留）
    pub plan_string: String,
    pub steps: Option<Vec<Step>>,
    pub results: Option<Results>,
    pub result: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub errors: Vec<String>,
}

impl PipelineState {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            task: String::new(),
            plan_string: String::new(),
            steps: None,
            results: None,
            result: None,
            timestamp: Utc::now(),
            errors: Vec::new(),
        }
    }

    /// 新任务开始：除 session_id 外全部重置
    pub fn reset(&mut self, task: impl Into<String>) {
        let session_id = std::mem::take(&mut self.session_id);
        *self = Self::new(session_id);
        self.task = task.into();
    }
}

/// Planner 输出
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanResult {
    pub plan_string: String,
    pub steps: Vec<Step>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_index_and_rendering() {
        let step = Step::new("Add the numbers", "#E12", "Calculator", "2 + 2");
        assert_eq!(step.index(), Some(12));
        assert_eq!(step.invocation(), "#E12 = Calculator[2 + 2]");
        assert_eq!(
            step.to_plan_line(),
            "Plan: Add the numbers #E12 = Calculator[2 + 2]"
        );
        assert_eq!(Step::new("", "E1", "", "").index(), None);
    }

    #[test]
    fn test_results_never_overwrite() {
        let mut r = Results::new();
        assert!(r.insert("#E1", "first"));
        assert!(!r.insert("#E1", "second"));
        assert_eq!(r.get("#E1"), Some("first"));
        assert_eq!(r.len(), 1);
    }

    #[test]
    fn test_results_keep_insertion_order() {
        let mut r = Results::new();
        r.insert("#E2", "b");
        r.insert("#E1", "a");
        let keys: Vec<_> = r.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["#E2", "#E1"]);
        let json = serde_json::to_string(&r).unwrap();
        assert_eq!(json, r##"{"#E2":"b","#E1":"a"}"##);
    }

    #[test]
    fn test_reset_keeps_session_id() {
        let mut state = PipelineState::new("session-1");
        state.plan_string = "old".into();
        state.errors.push("boom".into());
        state.result = Some("answer".into());
        state.reset("new task");
        assert_eq!(state.session_id, "session-1");
        assert_eq!(state.task, "new task");
        assert!(state.plan_string.is_empty());
        assert!(state.errors.is_empty());
        assert!(state.result.is_none());
    }
}
