//! Summarization control — a built-in tool over the context manager.
//!
//! Lets the model (or a caller driving the tool directly) inspect context
//! occupancy, force a summary, or toggle automatic summarization. The tool
//! shares the agent's context manager and model handle, so a triggered
//! summary is indistinguishable from an automatic one.

use async_trait::async_trait;
use colloquy_backends::{GenerationParams, Model};
use colloquy_core::{Tool, ToolError};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::info;

use crate::context::{ContextManager, SUMMARY_MAX_TOKENS, SUMMARY_TEMPERATURE};

const TOOL_NAME: &str = "summarize";

/// The built-in summarization-control tool.
pub struct SummarizationTool {
    context: Arc<Mutex<ContextManager>>,
    model: Arc<Model>,
}

impl SummarizationTool {
    pub fn new(context: Arc<Mutex<ContextManager>>, model: Arc<Model>) -> Self {
        Self { context, model }
    }

    fn ctx(&self) -> MutexGuard<'_, ContextManager> {
        self.context
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl Tool for SummarizationTool {
    fn name(&self) -> &str {
        TOOL_NAME
    }

    fn description(&self) -> &str {
        "Control conversation summarization: check status, trigger a summary now, \
         or enable/disable automatic summarization"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "operation": {
                    "type": "string",
                    "enum": ["status", "trigger", "enable", "disable"],
                    "description": "Operation to perform"
                }
            },
            "required": ["operation"]
        })
    }

    async fn execute(
        &self,
        arguments: serde_json::Value,
    ) -> Result<serde_json::Value, ToolError> {
        let Some(operation) = arguments["operation"].as_str() else {
            return Ok(serde_json::json!({ "error": "Missing required 'operation' field" }));
        };

        match operation {
            "status" => {
                let ctx = self.ctx();
                Ok(serde_json::json!({
                    "enabled": ctx.summarize_enabled(),
                    "threshold": ctx.threshold(),
                    "context_size": ctx.context_size(),
                    "estimated_tokens": ctx.estimated_tokens(),
                    "should_summarize": ctx.is_full(),
                }))
            }

            "trigger" => {
                // Force a summary regardless of occupancy.
                let request = self.ctx().build_summary_request();
                let Some(request) = request else {
                    return Ok(serde_json::json!({
                        "success": true,
                        "message": "Nothing to summarize",
                    }));
                };

                let params = GenerationParams {
                    temperature: SUMMARY_TEMPERATURE,
                    max_tokens: Some(SUMMARY_MAX_TOKENS),
                };
                let summary = self
                    .model
                    .generate(&request.prompt, &params)
                    .await
                    .map_err(|e| ToolError::ExecutionFailed {
                        tool_name: TOOL_NAME.into(),
                        reason: format!("Summary generation failed: {e}"),
                    })?;

                self.ctx().apply_summary(&request, &summary);
                info!(folded = request.count, "Summary applied via trigger");

                Ok(serde_json::json!({
                    "success": true,
                    "message": "Conversation summarized",
                    "messages_summarized": request.count,
                }))
            }

            "enable" => {
                self.ctx().set_summarize_enabled(true);
                Ok(serde_json::json!({ "success": true, "enabled": true }))
            }

            "disable" => {
                self.ctx().set_summarize_enabled(false);
                Ok(serde_json::json!({ "success": true, "enabled": false }))
            }

            other => Ok(serde_json::json!({
                "error": format!("Unknown operation: {other}"),
            })),
        }
    }
}
