//! Agent orchestration for colloquy.
//!
//! An [`Agent`] owns a conversation and a tool registry and references a
//! shared [`Model`](colloquy_backends::Model). Feeding it a user message
//! drives the full turn: prompt rendering with the tool-schema preamble,
//! backend generation, tool-call parsing and dispatch, bounded re-entry,
//! and history bookkeeping with automatic summarization.

pub mod agent;
pub mod context;
pub mod summarize_tool;
pub mod tool_protocol;

pub use agent::{Agent, AgentConfig, AgentState};
pub use context::{ContextManager, SummaryRequest};
pub use summarize_tool::SummarizationTool;
pub use tool_protocol::parse_tool_calls;
