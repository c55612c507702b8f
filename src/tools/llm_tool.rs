//! LLM 工具：通用推理能力，也是规划失败时回退计划所用的工具
//!
//! 调用经过 RetryingLlmClient，completion 事件的调用方身份为工具名。

use async_trait::async_trait;

use crate::core::Caller;
use crate::llm::{Message, RetryingLlmClient};
use crate::tools::Tool;

const LLM_TOOL_SYSTEM: &str =
    "You are a reasoning tool inside a larger pipeline. Respond in short directly with no extra words.";

pub struct LlmTool {
    name: String,
    llm: RetryingLlmClient,
}

impl LlmTool {
    pub fn new(name: impl Into<String>, llm: RetryingLlmClient) -> Self {
        Self {
            name: name.into(),
            llm,
        }
    }
}

#[async_trait]
impl Tool for LlmTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "A pretrained language model. Useful for general world knowledge, common sense reasoning and summarizing text. Prioritize it when confident in solving the problem without other tools. Input can be any instruction."
    }

    fn self_timed(&self) -> bool {
        true
    }

    async fn execute(&self, args: &str) -> Result<String, String> {
        let messages = [Message::system(LLM_TOOL_SYSTEM), Message::user(args)];
        self.llm
            .complete(&messages, None, Caller::Tool(self.name.clone()))
            .await
            .map(|s| s.trim().to_string())
            .map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{EventBus, PipelineEvent};
    use crate::llm::{MockLlmClient, RetryConfig};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_llm_tool_tags_completion_with_tool_name() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        let mock = Arc::new(MockLlmClient::with_responses(["  Paris  "]));
        let tool = LlmTool::new("LLM", RetryingLlmClient::new(mock, RetryConfig::default(), bus));

        assert_eq!(tool.execute("Capital of France?").await.unwrap(), "Paris");
        match rx.try_recv().unwrap() {
            PipelineEvent::Completion { caller, .. } => assert_eq!(caller, Caller::Tool("LLM".into())),
            other => panic!("unexpected {other:?}"),
        }
    }
}
