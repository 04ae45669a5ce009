//! The tool-call protocol: schema advertisement, envelope parsing, and
//! dispatch.
//!
//! Models signal a tool call by emitting a JSON object at the top level of
//! their reply, either `{"tool_calls":[{"name":...,"parameters":...}]}` or
//! the single-call shorthand `{"name":...,"parameters":...}`. The parser is
//! deliberately forgiving: anything that is not such an object is treated
//! as a plain text reply, never an error.

use colloquy_core::{ToolCall, ToolDescriptor, ToolRegistry};
use tracing::{debug, warn};

/// Render the tool-schema preamble advertised to the model.
pub fn render_tool_preamble(descriptors: &[ToolDescriptor]) -> String {
    let mut out = String::from("You have access to the following tools:\n\n");
    for desc in descriptors {
        out.push_str("Tool: ");
        out.push_str(&desc.name);
        out.push('\n');
        out.push_str("Description: ");
        out.push_str(&desc.description);
        out.push('\n');
        out.push_str("Parameters: ");
        out.push_str(&desc.parameters.to_string());
        out.push_str("\n\n");
    }
    out.push_str(
        "To call a tool, respond with a single JSON object of the form:\n\
         {\"tool_calls\": [{\"name\": \"<tool_name>\", \"parameters\": { ... }}]}\n\
         Respond with plain text when no tool is needed.",
    );
    out
}

/// Inject the preamble into a rendered prompt as a system block positioned
/// immediately after the system message (or first, when there is none).
pub fn inject_preamble(prompt: &str, preamble: &str) -> String {
    let block = format!("<|im_start|>system\n{preamble}<|im_end|>\n");
    if prompt.starts_with("<|im_start|>system") {
        if let Some(end) = prompt.find("<|im_end|>\n") {
            let insert_at = end + "<|im_end|>\n".len();
            let mut out = String::with_capacity(prompt.len() + block.len());
            out.push_str(&prompt[..insert_at]);
            out.push_str(&block);
            out.push_str(&prompt[insert_at..]);
            return out;
        }
    }
    format!("{block}{prompt}")
}

/// Parse tool calls out of a model reply.
///
/// Scans for the first `{`, extracts a brace-matched slice (honoring string
/// literals and escapes), and accepts either envelope form. Anything else
/// yields the empty list; this function never fails.
pub fn parse_tool_calls(output: &str) -> Vec<ToolCall> {
    let Some(candidate) = extract_json_object(output) else {
        return Vec::new();
    };
    let Ok(value) = serde_json::from_str::<serde_json::Value>(candidate) else {
        return Vec::new();
    };

    let mut calls = Vec::new();
    if let Some(list) = value.get("tool_calls").and_then(|v| v.as_array()) {
        for entry in list {
            if let Some(call) = to_tool_call(entry) {
                calls.push(call);
            }
        }
    } else if let Some(call) = to_tool_call(&value) {
        calls.push(call);
    }
    calls
}

fn to_tool_call(value: &serde_json::Value) -> Option<ToolCall> {
    let name = value.get("name")?.as_str()?;
    let arguments = value
        .get("parameters")
        .cloned()
        .unwrap_or_else(|| serde_json::json!({}));
    Some(ToolCall {
        name: name.to_string(),
        arguments,
    })
}

/// Extract the first brace-matched JSON object slice, respecting string
/// literals and backslash escapes inside them.
fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Dispatch tool calls in order and format their results for the model.
///
/// Unknown tools and execution failures become `{"error":...,"tool_name":...}`
/// objects so the model can recover within the same turn. Each result is
/// framed with the tool name; results are separated by blank lines.
pub async fn execute_tool_calls(registry: &ToolRegistry, calls: &[ToolCall]) -> String {
    let mut blocks = Vec::with_capacity(calls.len());
    for call in calls {
        let result = match registry.execute(call).await {
            Ok(value) => {
                debug!(tool = %call.name, "Tool executed");
                value
            }
            Err(e) => {
                warn!(tool = %call.name, error = %e, "Tool call failed");
                match e {
                    colloquy_core::ToolError::NotFound(_) => serde_json::json!({
                        "error": "Tool not found",
                        "tool_name": call.name,
                    }),
                    other => serde_json::json!({
                        "error": other.to_string(),
                        "tool_name": call.name,
                    }),
                }
            }
        };
        blocks.push(format!("Tool '{}' returned:\n{}", call.name, result));
    }
    blocks.join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use colloquy_core::{Tool, ToolError};
    use serde_json::json;

    #[test]
    fn parses_tool_calls_envelope() {
        let output = r#"{"tool_calls":[{"name":"add","parameters":{"a":2,"b":3}}]}"#;
        let calls = parse_tool_calls(output);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "add");
        assert_eq!(calls[0].arguments, json!({"a": 2, "b": 3}));
    }

    #[test]
    fn parses_single_object_form() {
        let output = r#"{"name":"todo","parameters":{"operation":"list"}}"#;
        let calls = parse_tool_calls(output);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "todo");
    }

    #[test]
    fn parses_multiple_calls_in_order() {
        let output = r#"{"tool_calls":[
            {"name":"first","parameters":{}},
            {"name":"second","parameters":{"x":1}}
        ]}"#;
        let calls = parse_tool_calls(output);
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].name, "first");
        assert_eq!(calls[1].name, "second");
    }

    #[test]
    fn finds_envelope_embedded_in_text() {
        let output = r#"Let me check that for you.
{"tool_calls":[{"name":"notes","parameters":{"operation":"list"}}]}"#;
        let calls = parse_tool_calls(output);
        assert_eq!(calls.len(), 1);
    }

    #[test]
    fn malformed_json_yields_empty_list() {
        assert!(parse_tool_calls("I think { this is not valid json").is_empty());
        assert!(parse_tool_calls("no braces at all").is_empty());
        assert!(parse_tool_calls("").is_empty());
        assert!(parse_tool_calls("{\"unclosed\": true").is_empty());
    }

    #[test]
    fn plain_json_without_envelope_yields_empty_list() {
        assert!(parse_tool_calls(r#"{"answer": 42}"#).is_empty());
        assert!(parse_tool_calls(r#"{"tool_calls": "not an array"}"#).is_empty());
    }

    #[test]
    fn missing_parameters_default_to_empty_object() {
        let calls = parse_tool_calls(r#"{"tool_calls":[{"name":"list_all"}]}"#);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].arguments, json!({}));
    }

    #[test]
    fn braces_inside_string_literals_are_skipped() {
        let output = r#"{"tool_calls":[{"name":"echo","parameters":{"text":"a } b { c \" d"}}]}"#;
        let calls = parse_tool_calls(output);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].arguments["text"], "a } b { c \" d");
    }

    #[test]
    fn parsed_arguments_reserialize_as_valid_json() {
        let output = r#"{"tool_calls":[{"name":"t","parameters":{"nested":{"deep":[1,2]}}}]}"#;
        for call in parse_tool_calls(output) {
            let text = serde_json::to_string(&call.arguments).unwrap();
            assert!(serde_json::from_str::<serde_json::Value>(&text).is_ok());
        }
    }

    #[test]
    fn extract_handles_escaped_quotes() {
        let text = r#"prefix {"key": "value with \" and \\"} suffix"#;
        let slice = extract_json_object(text).unwrap();
        assert!(serde_json::from_str::<serde_json::Value>(slice).is_ok());
    }

    #[test]
    fn preamble_lists_tools_and_envelope() {
        let descriptors = vec![ToolDescriptor {
            name: "todo".into(),
            description: "Manage a todo list".into(),
            parameters: json!({"type": "object"}),
        }];
        let preamble = render_tool_preamble(&descriptors);
        assert!(preamble.contains("Tool: todo"));
        assert!(preamble.contains("Manage a todo list"));
        assert!(preamble.contains(r#"{"type":"object"}"#));
        assert!(preamble.contains("\"tool_calls\""));
    }

    #[test]
    fn preamble_injected_after_system_message() {
        let prompt = "<|im_start|>system\nBe helpful.<|im_end|>\n\
                      <|im_start|>user\nHi<|im_end|>\n\
                      <|im_start|>assistant\n";
        let injected = inject_preamble(prompt, "TOOLS HERE");
        let system_end = injected.find("Be helpful.").unwrap();
        let tools_at = injected.find("TOOLS HERE").unwrap();
        let user_at = injected.find("Hi").unwrap();
        assert!(system_end < tools_at);
        assert!(tools_at < user_at);
    }

    #[test]
    fn preamble_prepended_without_system_message() {
        let prompt = "<|im_start|>user\nHi<|im_end|>\n<|im_start|>assistant\n";
        let injected = inject_preamble(prompt, "TOOLS HERE");
        assert!(injected.starts_with("<|im_start|>system\nTOOLS HERE<|im_end|>\n"));
    }

    struct AddTool;

    #[async_trait]
    impl Tool for AddTool {
        fn name(&self) -> &str {
            "add"
        }
        fn description(&self) -> &str {
            "Add two numbers"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            json!({"type": "object", "properties": {"a": {"type": "number"}, "b": {"type": "number"}}})
        }
        async fn execute(&self, args: serde_json::Value) -> Result<serde_json::Value, ToolError> {
            let a = args["a"].as_f64().ok_or_else(|| {
                ToolError::InvalidArguments("missing 'a'".into())
            })?;
            let b = args["b"].as_f64().ok_or_else(|| {
                ToolError::InvalidArguments("missing 'b'".into())
            })?;
            Ok(json!({"sum": a + b}))
        }
    }

    #[tokio::test]
    async fn execute_frames_results() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(AddTool));

        let calls = parse_tool_calls(r#"{"tool_calls":[{"name":"add","parameters":{"a":2,"b":3}}]}"#);
        let block = execute_tool_calls(&registry, &calls).await;
        assert!(block.starts_with("Tool 'add' returned:\n"));
        assert!(block.contains(r#""sum":5"#) || block.contains(r#""sum":5.0"#));
    }

    #[tokio::test]
    async fn unknown_tool_reports_error_without_invocation() {
        let registry = ToolRegistry::new();
        let calls = vec![ToolCall {
            name: "ghost".into(),
            arguments: json!({}),
        }];
        let block = execute_tool_calls(&registry, &calls).await;
        assert!(block.contains(r#""error":"Tool not found""#));
        assert!(block.contains(r#""tool_name":"ghost""#));
    }

    #[tokio::test]
    async fn failing_tool_reports_error_json() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(AddTool));
        let calls = vec![ToolCall {
            name: "add".into(),
            arguments: json!({"a": 1}),
        }];
        let block = execute_tool_calls(&registry, &calls).await;
        assert!(block.contains("\"error\""));
        assert!(block.contains(r#""tool_name":"add""#));
    }

    #[tokio::test]
    async fn multiple_results_separated_by_blank_lines() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(AddTool));
        let calls = vec![
            ToolCall {
                name: "add".into(),
                arguments: json!({"a": 1, "b": 1}),
            },
            ToolCall {
                name: "add".into(),
                arguments: json!({"a": 2, "b": 2}),
            },
        ];
        let block = execute_tool_calls(&registry, &calls).await;
        let parts: Vec<&str> = block.split("\n\n").collect();
        assert_eq!(parts.len(), 2);
        assert!(parts[0].contains("sum"));
        assert!(parts[1].contains("sum"));
    }
}
