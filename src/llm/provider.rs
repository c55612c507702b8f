//! 后端选择：根据配置与环境变量创建 DeepSeek / OpenAI 兼容 / Mock 客户端
//!
//! DeepSeek 与 OpenAI 接口完全兼容，只需切换 base_url 与模型名。

use std::sync::Arc;

use crate::config::AppConfig;
use crate::llm::{create_embedder_from_config, EmbeddingProvider, LlmClient, MockLlmClient, OpenAiClient};

pub const DEEPSEEK_BASE_URL: &str = "https://api.deepseek.com";
pub const DEEPSEEK_CHAT: &str = "deepseek-chat";

/// 根据配置选择 LLM 后端；provider = "mock" 或没有任何 API Key 时使用 Mock
pub fn create_llm_from_config(cfg: &AppConfig) -> Arc<dyn LlmClient> {
    let provider = cfg.llm.provider.to_lowercase();
    if provider == "mock" {
        tracing::info!("Using Mock LLM (configured)");
        return Arc::new(MockLlmClient::new());
    }

    let deepseek_key = std::env::var("DEEPSEEK_API_KEY").ok();
    let openai_key = std::env::var("OPENAI_API_KEY").ok();
    // 有 DeepSeek Key，或配置为 deepseek 且仅有 OpenAI Key 时也走 DeepSeek 端点
    let use_deepseek =
        deepseek_key.is_some() || (provider == "deepseek" && openai_key.is_some());
    let use_openai = openai_key.is_some() && provider != "deepseek";

    if use_deepseek {
        let model = cfg
            .llm
            .deepseek
            .model
            .clone()
            .or_else(|| cfg.llm.model.clone())
            .unwrap_or_else(|| DEEPSEEK_CHAT.to_string());
        let key = deepseek_key.or(openai_key);
        tracing::info!("Using DeepSeek LLM ({})", model);
        Arc::new(OpenAiClient::new(
            Some(DEEPSEEK_BASE_URL),
            &model,
            key.as_deref(),
        ))
    } else if use_openai {
        let model = cfg
            .llm
            .openai
            .model
            .clone()
            .or_else(|| cfg.llm.model.clone())
            .unwrap_or_else(|| "gpt-4o-mini".to_string());
        tracing::info!("Using OpenAI LLM ({})", model);
        Arc::new(OpenAiClient::new(
            cfg.llm.base_url.as_deref(),
            &model,
            openai_key.as_deref(),
        ))
    } else {
        tracing::warn!("No API key set or provider unknown, using Mock LLM");
        Arc::new(MockLlmClient::new())
    }
}

/// 嵌入提供方：仅 OpenAI 兼容端点提供 embeddings
pub fn create_embedder(cfg: &AppConfig) -> Option<Arc<dyn EmbeddingProvider>> {
    create_embedder_from_config(
        cfg.llm.base_url.as_deref(),
        &cfg.llm.embedding_model,
        None,
    )
}
