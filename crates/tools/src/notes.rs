//! Notes tool — persistent free-form notes with tags.
//!
//! Operations: `create(content, tags?)`, `read(id)`, `update(id, content?,
//! tags?)`, `delete(id)`, `search(query)`, `list`. Search is a
//! case-insensitive substring match over content and tags; an empty query
//! returns everything.

use async_trait::async_trait;
use colloquy_core::{Tool, ToolError};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::debug;

use crate::store;

const TOOL_NAME: &str = "notes";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Note {
    pub id: u64,
    pub content: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub created: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified: Option<String>,
}

/// On-disk shape: `{"notes":[...]}`.
#[derive(Debug, Default, Serialize, Deserialize)]
struct NotesFile {
    notes: Vec<Note>,
}

struct NotesState {
    notes: Vec<Note>,
    next_id: u64,
    path: Option<PathBuf>,
}

/// The built-in notes tool.
pub struct NotesTool {
    state: Mutex<NotesState>,
}

impl NotesTool {
    /// Create a notes tool backed by a JSON file. The file is loaded now;
    /// an absent or malformed file starts empty.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_path(Some(path.into()))
    }

    /// Create a memory-only notes tool.
    pub fn in_memory() -> Self {
        Self::with_path(None)
    }

    fn with_path(path: Option<PathBuf>) -> Self {
        let file: NotesFile = store::load_or_default(path.as_deref());
        let next_id = file.notes.iter().map(|n| n.id).max().unwrap_or(0) + 1;
        debug!(count = file.notes.len(), next_id, "Notes store loaded");
        Self {
            state: Mutex::new(NotesState {
                notes: file.notes,
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
            reason: "Notes state poisoned".into(),
        })?;

        match operation {
            "create" => {
                let content = params["content"].as_str().unwrap_or("");
                if content.is_empty() {
                    return Ok(error_json("Content is required"));
                }

                let note = Note {
                    id: state.next_id,
                    content: content.to_string(),
                    tags: parse_tags(&params["tags"]),
                    created: store::timestamp_now(),
                    modified: None,
                };
                state.next_id += 1;
                state.notes.push(note.clone());
                save(&state)?;

                Ok(serde_json::json!({
                    "success": true,
                    "message": "Note created successfully",
                    "note": note,
                }))
            }

            "read" => {
                let Some(id) = params["id"].as_u64() else {
                    return Ok(error_json("Note ID is required"));
                };
                match state.notes.iter().find(|n| n.id == id) {
                    Some(note) => Ok(serde_json::json!({ "note": note })),
                    None => Ok(error_json("Note not found")),
                }
            }

            "update" => {
                let Some(id) = params["id"].as_u64() else {
                    return Ok(error_json("Note ID is required"));
                };
                let new_content = params["content"].as_str().map(str::to_string);
                let new_tags = if params["tags"].is_array() {
                    Some(parse_tags(&params["tags"]))
                } else {
                    None
                };

                let Some(note) = state.notes.iter_mut().find(|n| n.id == id) else {
                    return Ok(error_json("Note not found"));
                };
                if let Some(content) = new_content {
                    note.content = content;
                }
                if let Some(tags) = new_tags {
                    note.tags = tags;
                }
                note.modified = Some(store::timestamp_now());
                let note = note.clone();
                save(&state)?;

                Ok(serde_json::json!({
                    "success": true,
                    "message": "Note updated successfully",
                    "note": note,
                }))
            }

            "delete" => {
                let Some(id) = params["id"].as_u64() else {
                    return Ok(error_json("Note ID is required"));
                };
                let before = state.notes.len();
                state.notes.retain(|n| n.id != id);
                if state.notes.len() == before {
                    return Ok(error_json("Note not found"));
                }
                save(&state)?;

                Ok(serde_json::json!({
                    "success": true,
                    "message": "Note deleted successfully",
                }))
            }

            "search" => {
                let query = params["query"].as_str().unwrap_or("").to_lowercase();
                let matches: Vec<&Note> = state
                    .notes
                    .iter()
                    .filter(|n| note_matches(n, &query))
                    .collect();
                Ok(serde_json::json!({ "notes": matches }))
            }

            "list" => Ok(serde_json::json!({ "notes": state.notes })),

            other => Ok(error_json(&format!("Unknown operation: {other}"))),
        }
    }
}

/// Case-insensitive substring match on content and on each tag.
/// An empty query matches everything.
fn note_matches(note: &Note, query_lower: &str) -> bool {
    if query_lower.is_empty() {
        return true;
    }
    note.content.to_lowercase().contains(query_lower)
        || note
            .tags
            .iter()
            .any(|t| t.to_lowercase().contains(query_lower))
}

fn parse_tags(value: &serde_json::Value) -> Vec<String> {
    value
        .as_array()
        .map(|arr| {
            arr.iter()
                .filter_map(|t| t.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

fn save(state: &NotesState) -> Result<(), ToolError> {
    store::save(
        state.path.as_deref(),
        TOOL_NAME,
        &NotesFile {
            notes: state.notes.clone(),
        },
    )
}

fn error_json(message: &str) -> serde_json::Value {
    serde_json::json!({ "error": message })
}

#[async_trait]
impl Tool for NotesTool {
    fn name(&self) -> &str {
        TOOL_NAME
    }

    fn description(&self) -> &str {
        "Keep persistent notes: create, read, update, delete, search, or list them"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "operation": {
                    "type": "string",
                    "enum": ["create", "read", "update", "delete", "search", "list"],
                    "description": "Operation to perform"
                },
                "content": {
                    "type": "string",
                    "description": "Note content (required for 'create', optional for 'update')"
                },
                "tags": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Tags for categorizing the note"
                },
                "id": {
                    "type": "number",
                    "description": "Note ID (required for 'read', 'update', and 'delete')"
                },
                "query": {
                    "type": "string",
                    "description": "Search text matched against content and tags (for 'search')"
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
