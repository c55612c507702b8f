//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `REWOO__*` 覆盖（双下划线表示嵌套，如 `REWOO__LLM__PROVIDER=openai`）。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub reliability: ReliabilitySection,
    pub pipeline: PipelineSection,
    pub tools: ToolsSection,
}

/// [app] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub name: String,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: "rewoo".to_string(),
        }
    }
}

/// [llm] 段：后端选择
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// 后端：deepseek / openai / mock；真实后端还需对应 API Key
    pub provider: String,
    pub model: Option<String>,
    pub base_url: Option<String>,
    pub deepseek: ProviderModelSection,
    pub openai: ProviderModelSection,
    pub embedding_model: String,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: "deepseek".to_string(),
            model: None,
            base_url: None,
            deepseek: ProviderModelSection::default(),
            openai: ProviderModelSection::default(),
            embedding_model: "text-embedding-3-small".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProviderModelSection {
    pub model: Option<String>,
}

/// [reliability] 段：每次 LLM 调用的超时与重试
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReliabilitySection {
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_ratio: f64,
}

impl Default for ReliabilitySection {
    fn default() -> Self {
        Self {
            timeout_secs: 10,
            max_retries: 3,
            base_delay_ms: 500,
            max_delay_ms: 8000,
            jitter_ratio: 0.25,
        }
    }
}

/// [pipeline] 段：规划步数、证据截断、回退工具与变量替换方式
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineSection {
    /// 提示模型的最大步数
    pub max_steps: usize,
    /// Solver 中单条证据最多保留的字符数
    pub evidence_budget_chars: usize,
    /// 规划失败时使用的通用推理工具名
    pub fallback_tool: String,
    /// true 时只替换完整的 #E<n> 记号（#E1 不会命中 #E10）
    pub strict_substitution: bool,
    /// Solver 失败时由流水线用原始证据拼出降级答案
    pub degraded_answer_on_solve_failure: bool,
    pub event_capacity: usize,
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            max_steps: 5,
            evidence_budget_chars: 300,
            fallback_tool: "LLM".to_string(),
            strict_substitution: false,
            degraded_answer_on_solve_failure: true,
            event_capacity: crate::core::DEFAULT_EVENT_CAPACITY,
        }
    }
}

/// [tools] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsSection {
    /// 单次工具调用超时（秒）
    pub tool_timeout_secs: u64,
    pub search: SearchSection,
    pub wikipedia: WikipediaSection,
    pub doc_search: DocSearchSection,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            tool_timeout_secs: 30,
            search: SearchSection::default(),
            wikipedia: WikipediaSection::default(),
            doc_search: DocSearchSection::default(),
        }
    }
}

/// [tools.search] 段：抓取 URL 的超时、最大字符数、允许的域名白名单
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SearchSection {
    pub timeout_secs: u64,
    pub max_result_chars: usize,
    pub allowed_domains: Vec<String>,
}

impl Default for SearchSection {
    fn default() -> Self {
        Self {
            timeout_secs: 15,
            max_result_chars: 8000,
            allowed_domains: vec![
                "en.wikipedia.org".into(),
                "github.com".into(),
                "raw.githubusercontent.com".into(),
                "stackoverflow.com".into(),
                "docs.rs".into(),
                "crates.io".into(),
                "doc.rust-lang.org".into(),
                "developer.mozilla.org".into(),
                "arxiv.org".into(),
                "news.ycombinator.com".into(),
            ],
        }
    }
}

/// [tools.wikipedia] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WikipediaSection {
    /// 语言子域，如 en / zh
    pub language: String,
    pub timeout_secs: u64,
    pub max_result_chars: usize,
}

impl Default for WikipediaSection {
    fn default() -> Self {
        Self {
            language: "en".to_string(),
            timeout_secs: 15,
            max_result_chars: 2000,
        }
    }
}

/// [tools.doc_search] 段：本地文档相似度检索（需要 embeddings 端点）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DocSearchSection {
    /// 文档目录（*.md / *.txt）；未设置时不注册该工具
    pub documents_dir: Option<PathBuf>,
    pub top_k: usize,
}

impl Default for DocSearchSection {
    fn default() -> Self {
        Self {
            documents_dir: None,
            top_k: 3,
        }
    }
}

/// 从 config 目录加载配置，环境变量 REWOO__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 REWOO__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        } else {
            tracing::warn!("Config file {:?} not found, ignoring", path);
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("REWOO")
            .separator("__")
            .try_parsing(true),
    );

    builder.build()?.try_deserialize()
}
