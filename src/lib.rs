//! ReWOO - Rust 规划-执行-求解智能体流水线
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误类型、事件总线、取消作用域
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / DeepSeek / Mock）、重试层、嵌入
//! - **observability**: tracing 初始化、事件日志、用量统计
//! - **pipeline**: Planner、Worker、Solver 与 Pipeline 编排
//! - **tools**: 工具箱（Calculator、LLM、Search、Wikipedia、DocSearch）与执行器

pub mod config;
pub mod core;
pub mod llm;
pub mod observability;
pub mod pipeline;
pub mod tools;

pub use pipeline::{Pipeline, PipelineBuilder, PipelineState};
