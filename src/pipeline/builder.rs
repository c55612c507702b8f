//! Pipeline 构建器：统一组装 LLM、重试层、工具注册表与事件总线
//!
//! 工具注册表与事件总线都作为显式依赖注入；未指定时按配置创建默认值。

use std::sync::Arc;

use crate::config::AppConfig;
use crate::core::{CancelScope, EventBus};
use crate::llm::{EmbeddingProvider, LlmClient, RetryConfig, RetryingLlmClient};
use crate::pipeline::examples::{default_examples, PlanExample};
use crate::pipeline::{Pipeline, Planner, Solver, Worker};
use crate::tools::{
    CalculatorTool, DocSearchTool, LlmTool, SearchTool, ToolExecutor, ToolRegistry, WikipediaTool,
};

enum ToolSource {
    /// 构建器持有，可自动补注册回退工具
    Owned(ToolRegistry),
    /// 与其他 Pipeline 共享，原样使用
    Shared(Arc<ToolRegistry>),
}

pub struct PipelineBuilder {
    config: AppConfig,
    llm: Option<Arc<dyn LlmClient>>,
    tools: Option<ToolSource>,
    events: Option<EventBus>,
    retry: Option<RetryConfig>,
    examples: Vec<PlanExample>,
}

impl PipelineBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            llm: None,
            tools: None,
            events: None,
            retry: None,
            examples: default_examples(),
        }
    }

    /// 指定 LLM 后端；未指定时按配置创建
    pub fn with_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn with_tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = Some(ToolSource::Owned(tools));
        self
    }

    /// 共享注册表（多个 Pipeline 复用同一组工具）
    pub fn with_shared_tools(mut self, tools: Arc<ToolRegistry>) -> Self {
        self.tools = Some(ToolSource::Shared(tools));
        self
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn with_examples(mut self, examples: Vec<PlanExample>) -> Self {
        self.examples = examples;
        self
    }

    pub fn build(self) -> Pipeline {
        let events = self
            .events
            .unwrap_or_else(|| EventBus::new(self.config.pipeline.event_capacity));
        let llm = self
            .llm
            .unwrap_or_else(|| crate::llm::create_llm_from_config(&self.config));
        let retry = self
            .retry
            .unwrap_or_else(|| RetryConfig::from(&self.config.reliability));
        let cancel = CancelScope::new();
        let client =
            RetryingLlmClient::new(llm, retry, events.clone()).with_cancel_scope(cancel.clone());

        let pipeline_cfg = &self.config.pipeline;
        let tools = match self.tools {
            Some(ToolSource::Shared(tools)) => tools,
            Some(ToolSource::Owned(mut tools)) => {
                if !tools.contains(&pipeline_cfg.fallback_tool) {
                    tools.register(LlmTool::new(pipeline_cfg.fallback_tool.clone(), client.clone()));
                }
                Arc::new(tools)
            }
            None => Arc::new(build_tool_registry(
                &self.config,
                &client,
                crate::llm::create_embedder(&self.config),
            )),
        };
        if !tools.contains(&pipeline_cfg.fallback_tool) {
            tracing::warn!(
                tool = %pipeline_cfg.fallback_tool,
                "fallback tool is not registered; fallback plans will be answered by the worker"
            );
        }

        let planner = Planner::new(
            client.clone(),
            Arc::clone(&tools),
            events.clone(),
            self.examples,
            pipeline_cfg.fallback_tool.clone(),
            pipeline_cfg.max_steps,
        );
        let worker = Worker::new(
            ToolExecutor::new(Arc::clone(&tools), self.config.tools.tool_timeout_secs),
            client.clone(),
            events.clone(),
        )
        .with_strict_substitution(pipeline_cfg.strict_substitution);
        let solver = Solver::new(client, events.clone(), pipeline_cfg.evidence_budget_chars);

        Pipeline::from_parts(
            planner,
            worker,
            solver,
            tools,
            events,
            cancel,
            pipeline_cfg.degraded_answer_on_solve_failure,
        )
    }
}

/// 按配置构建内置工具：Calculator、LLM、Search、Wikipedia，以及可选的 DocSearch
pub fn build_tool_registry(
    config: &AppConfig,
    llm: &RetryingLlmClient,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
) -> ToolRegistry {
    let mut tools = ToolRegistry::new();
    tools.register(CalculatorTool);
    tools.register(LlmTool::new(config.pipeline.fallback_tool.clone(), llm.clone()));
    tools.register(SearchTool::new(
        config.tools.search.allowed_domains.clone(),
        config.tools.search.timeout_secs,
        config.tools.search.max_result_chars,
    ));
    tools.register(WikipediaTool::new(
        &config.tools.wikipedia.language,
        config.tools.wikipedia.timeout_secs,
        config.tools.wikipedia.max_result_chars,
    ));

    if let Some(dir) = &config.tools.doc_search.documents_dir {
        match (embedder, DocSearchTool::load_dir(dir)) {
            (Some(embedder), Ok(docs)) if !docs.is_empty() => {
                tracing::info!(documents = docs.len(), dir = %dir.display(), "DocSearch enabled");
                tools.register(DocSearchTool::new(embedder, docs, config.tools.doc_search.top_k));
            }
            (None, _) => {
                tracing::warn!("documents_dir set but no embedding provider available, DocSearch disabled")
            }
            (_, Err(e)) => {
                tracing::warn!(dir = %dir.display(), error = %e, "failed to read documents, DocSearch disabled")
            }
            _ => tracing::warn!(dir = %dir.display(), "no .md/.txt documents found, DocSearch disabled"),
        }
    }
    tools
}
