//! 工具箱：Tool trait、注册表、带超时的执行器与内置工具

pub mod calculator;
pub mod doc_search;
pub mod executor;
pub mod llm_tool;
pub mod registry;
pub mod search;
pub mod wikipedia;

pub use calculator::CalculatorTool;
pub use doc_search::{DocSearchTool, Document};
pub use executor::ToolExecutor;
pub use llm_tool::LlmTool;
pub use registry::{Tool, ToolRegistry};
pub use search::SearchTool;
pub use wikipedia::WikipediaTool;
