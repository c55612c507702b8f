//! LLM 层：客户端抽象与实现（OpenAI 兼容 / DeepSeek / Mock）以及调用可靠性层

pub mod embedding;
pub mod message;
pub mod mock;
pub mod openai;
pub mod provider;
pub mod retry;
pub mod traits;

pub use embedding::{cosine_similarity, create_embedder_from_config, OpenAiEmbedder};
pub use message::{Message, Role};
pub use mock::MockLlmClient;
pub use openai::OpenAiClient;
pub use provider::{create_embedder, create_llm_from_config, DEEPSEEK_CHAT};
pub use retry::{RetryConfig, RetryingLlmClient};
pub use traits::{EmbeddingProvider, LlmClient, LlmResponse, ResponseShape, TokenUsage};
