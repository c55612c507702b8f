//! LLM 客户端抽象
//!
//! 所有后端（OpenAI 兼容 / DeepSeek / Mock）实现 LlmClient：给定带角色的消息与可选结构化输出提示，返回文本。
//! EmbeddingProvider 是另一个边界：文本 -> 定长向量，供相似度检索类工具使用。

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Serialize;

use crate::core::LlmError;
use crate::llm::Message;

/// 单次调用的 token 用量
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl TokenUsage {
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }

    pub fn add(&mut self, other: &TokenUsage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
    }
}

/// 一次完成调用的结果：文本与（若后端提供）用量
#[derive(Debug, Clone, PartialEq)]
pub struct LlmResponse {
    pub content: String,
    pub usage: Option<TokenUsage>,
}

/// 结构化输出提示：名称 + 可选 JSON Schema（schemars 生成）
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseShape {
    pub name: String,
    pub schema: Option<serde_json::Value>,
}

impl ResponseShape {
    /// 只要求输出 JSON 对象，不限制结构
    pub fn json_object(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            schema: None,
        }
    }

    /// 按 Rust 类型生成 Schema
    pub fn for_type<T: JsonSchema>(name: impl Into<String>) -> Self {
        let schema = schemars::schema_for!(T);
        Self {
            name: name.into(),
            schema: serde_json::to_value(&schema).ok(),
        }
    }

    /// 拼入 system 消息的格式说明（后端不支持原生 response_format 时使用）
    pub fn instruction(&self) -> String {
        match &self.schema {
            Some(schema) => format!(
                "Respond with a single JSON object named `{}` that conforms to this JSON Schema. Output only the JSON.\n{}",
                self.name,
                serde_json::to_string_pretty(schema).unwrap_or_default()
            ),
            None => format!(
                "Respond with a single JSON object (`{}`). Output only the JSON.",
                self.name
            ),
        }
    }
}

/// LLM 客户端 trait：非流式完成
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(
        &self,
        messages: &[Message],
        shape: Option<&ResponseShape>,
    ) -> Result<LlmResponse, LlmError>;

    /// 模型名（日志用）
    fn model_name(&self) -> &str {
        "unknown"
    }
}

/// 嵌入提供方：将文本编码为定长向量
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError>;
}
