//! 核心层：错误分类、事件总线、取消作用域

pub mod error;
pub mod events;
pub mod shutdown;

pub use error::{AgentError, LlmError};
pub use events::{Caller, EventBus, PipelineEvent, DEFAULT_EVENT_CAPACITY};
pub use shutdown::{cancel_on_ctrl_c, CancelScope};
