//! Todo list tool — a persistent task list the model can manage.
//!
//! Operations are dispatched by a required `operation` field:
//! `add(title)`, `list`, `complete(id)`, `delete(id)`. Ids are assigned by
//! a monotonic counter rehydrated from the stored maximum on load.

use async_trait::async_trait;
use colloquy_core::{Tool, ToolError};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::debug;

use crate::store;

const TOOL_NAME: &str = "todo";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TodoItem {
    pub id: u64,
    pub title: String,
    pub status: TodoStatus,
    pub created: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TodoStatus {
    Pending,
    Completed,
}

/// On-disk shape: `{"todos":[...]}`.
#[derive(Debug, Default, Serialize, Deserialize)]
struct TodoFile {
    todos: Vec<TodoItem>,
}

struct TodoState {
    items: Vec<TodoItem>,
    next_id: u64,
    path: Option<PathBuf>,
}

/// The built-in todo list tool.
pub struct TodoTool {
    state: Mutex<TodoState>,
}

impl TodoTool {
    /// Create a todo tool backed by a JSON file. The file is loaded now;
    /// an absent or malformed file starts empty.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_path(Some(path.into()))
    }

    /// Create a memory-only todo tool (state is lost on drop).
    pub fn in_memory() -> Self {
        Self::with_path(None)
    }

    fn with_path(path: Option<PathBuf>) -> Self {
        let file: TodoFile = store::load_or_default(path.as_deref());
        let next_id = file.todos.iter().map(|t| t.id).max().unwrap_or(0) + 1;
        debug!(count = file.todos.len(), next_id, "Todo store loaded");
        Self {
            state: Mutex::new(TodoState {
                items: file.todos,
                next_id,
                path,
            }),
        }
    }

    fn run(&self, params: &serde_json::Value) -> Result<serde_json::Value, ToolError> {
        let Some(operation) = params["operation"].as_str() else {
            return Ok(error_json("Missing required 'operation' field"));
        };

        let mut state = self.state.lock().map_err(|_| ToolError::ExecutionFailed {
            tool_name: TOOL_NAME.into(),
            reason: "Todo state poisoned".into(),
        })?;

        match operation {
            "add" => {
                let title = params["title"].as_str().unwrap_or("");
                if title.is_empty() {
                    return Ok(error_json("Title is required"));
                }

                let item = TodoItem {
                    id: state.next_id,
                    title: title.to_string(),
                    status: TodoStatus::Pending,
                    created: store::timestamp_now(),
                    completed: None,
                };
                state.next_id += 1;
                state.items.push(item.clone());
                save(&state)?;

                Ok(serde_json::json!({
                    "success": true,
                    "message": "Todo added successfully",
                    "todo": item,
                }))
            }

            "list" => Ok(serde_json::json!({ "todos": state.items })),

            "complete" => {
                let Some(id) = params["id"].as_u64() else {
                    return Ok(error_json("Todo ID is required"));
                };
                let Some(item) = state.items.iter_mut().find(|t| t.id == id) else {
                    return Ok(error_json("Todo not found"));
                };
                item.status = TodoStatus::Completed;
                item.completed = Some(store::timestamp_now());
                save(&state)?;

                Ok(serde_json::json!({
                    "success": true,
                    "message": "Todo marked as completed",
                }))
            }

            "delete" => {
                let Some(id) = params["id"].as_u64() else {
                    return Ok(error_json("Todo ID is required"));
                };
                let before = state.items.len();
                state.items.retain(|t| t.id != id);
                if state.items.len() == before {
                    return Ok(error_json("Todo not found"));
                }
                save(&state)?;

                Ok(serde_json::json!({
                    "success": true,
                    "message": "Todo deleted successfully",
                }))
            }

            other => Ok(error_json(&format!("Unknown operation: {other}"))),
        }
    }
}

fn save(state: &TodoState) -> Result<(), ToolError> {
    store::save(
        state.path.as_deref(),
        TOOL_NAME,
        &TodoFile {
            todos: state.items.clone(),
        },
    )
}

fn error_json(message: &str) -> serde_json::Value {
    serde_json::json!({ "error": message })
}

#[async_trait]
impl Tool for TodoTool {
    fn name(&self) -> &str {
        TOOL_NAME
    }

    fn description(&self) -> &str {
        "Manage a todo list: add, list, complete, or delete tasks"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "operation": {
                    "type": "string",
                    "enum": ["add", "list", "complete", "delete"],
                    "description": "Operation to perform"
                },
                "title": {
                    "type": "string",
                    "description": "Todo title (required for 'add')"
                },
                "id": {
                    "type": "number",
                    "description": "Todo ID (required for 'complete' and 'delete')"
                }
            },
            "required": ["operation"]
        })
    }

    async fn execute(
        &self,
        arguments: serde_json::Value,
    ) -> Result<serde_json::Value, ToolError> {
        self.run(&arguments)
    }
}
