//! Tool trait — the abstraction over agent capabilities.
//!
//! Tools are what the model can call during a turn: manage a todo list,
//! keep notes, control summarization, or anything a caller registers.
//! Each tool advertises a JSON Schema for its parameters and receives its
//! arguments as a JSON value.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use crate::error::ToolError;

/// A tool's advertised interface: what the model sees in the schema
/// preamble before deciding to call it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// The tool name (unique per agent)
    pub name: String,

    /// Human-readable description of what the tool does
    pub description: String,

    /// JSON Schema describing the tool's parameters
    pub parameters: serde_json::Value,
}

/// A request to execute a tool, parsed out of model output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Name of the tool to execute
    pub name: String,

    /// Arguments as a JSON value (always re-serializes as valid JSON)
    pub arguments: serde_json::Value,
}

/// The core Tool trait.
///
/// Implementations return their result as a JSON value; execution errors
/// are reported back to the model as an error object rather than
/// propagating out of the turn.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "todo", "notes").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the model).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's parameters.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Execute the tool with the given arguments, returning a JSON result.
    async fn execute(&self, arguments: serde_json::Value)
        -> std::result::Result<serde_json::Value, ToolError>;

    /// This tool's advertised descriptor.
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

/// A registry of available tools, keyed by name.
///
/// The orchestrator uses this to:
/// 1. Advertise tool descriptors in the prompt preamble
/// 2. Look up and execute tools when the model requests them
///
/// Registration replaces any entry with the same name. Tools are never
/// auto-removed; they live as long as the owning agent.
pub struct ToolRegistry {
    tools: HashMap<String, Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        let name = tool.name().to_string();
        self.tools.insert(name, tool);
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.get(name).map(|t| t.as_ref())
    }

    /// All tool descriptors, sorted by name so the advertised schema is
    /// deterministic.
    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        let mut descriptors: Vec<ToolDescriptor> =
            self.tools.values().map(|t| t.descriptor()).collect();
        descriptors.sort_by(|a, b| a.name.cmp(&b.name));
        descriptors
    }

    /// Execute a tool call, erroring when the tool is unknown.
    pub async fn execute(
        &self,
        call: &ToolCall,
    ) -> std::result::Result<serde_json::Value, ToolError> {
        let tool = self
            .tools
            .get(&call.name)
            .ok_or_else(|| ToolError::NotFound(call.name.clone()))?;
        tool.execute(call.arguments.clone()).await
    }

    /// List all registered tool names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
