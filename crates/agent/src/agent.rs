//! The agent orchestrator — the heart of colloquy.
//!
//! One turn follows a **render → generate → parse → dispatch** cycle:
//!
//! 1. Append the user message to the conversation (or build a one-shot
//!    transcript when history management is off)
//! 2. Render the prompt, injecting the tool-schema preamble
//! 3. Call the backend
//! 4. If the reply is a tool-call envelope: execute the tools, feed the
//!    results back as a user turn, and re-enter step 2
//! 5. Otherwise the reply is final: record it and return it
//!
//! Re-entry is bounded so a model that keeps emitting tool calls cannot
//! loop forever.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use colloquy_backends::{GenerationParams, Model};
use colloquy_core::{diag, Error, Message, Result, Role, Tool, ToolRegistry};
use colloquy_tools::{NotesTool, TodoTool};
use tracing::{debug, info, warn};

use crate::context::{self, ContextManager, SUMMARY_MAX_TOKENS, SUMMARY_TEMPERATURE};
use crate::summarize_tool::SummarizationTool;
use crate::tool_protocol::{
    execute_tool_calls, inject_preamble, parse_tool_calls, render_tool_preamble,
};

/// Fewest tool re-entries an agent may be configured with.
const MIN_TOOL_ROUNDS: u32 = 3;

/// Configuration for an agent, captured at construction.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// System prompt defining the agent's role (kept at position 0)
    pub system_prompt: Option<String>,

    /// Sampling temperature
    pub temperature: f32,

    /// Maximum tokens per generation; `None` leaves it to the backend
    pub max_tokens: Option<u32>,

    /// Whether tool-call envelopes in replies are parsed and dispatched
    pub enable_tool_calling: bool,

    /// Whether the agent maintains conversation history across turns
    pub enable_history_management: bool,

    /// Whether todo, notes, and summarization tools register automatically
    /// (memory-only storage)
    pub enable_builtin_tools: bool,

    /// Maximum tool re-entries per turn; clamped to at least 3
    pub max_tool_rounds: u32,

    /// Context window override; defaults to the model's reported size
    pub context_size: Option<usize>,

    /// Occupancy share at which the context counts as full
    pub summarize_threshold: f32,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            system_prompt: None,
            temperature: 0.7,
            max_tokens: None,
            enable_tool_calling: true,
            enable_history_management: true,
            enable_builtin_tools: true,
            max_tool_rounds: 8,
            context_size: None,
            summarize_threshold: context::DEFAULT_FULL_THRESHOLD,
        }
    }
}

impl AgentConfig {
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_tool_calling(mut self, enabled: bool) -> Self {
        self.enable_tool_calling = enabled;
        self
    }

    pub fn with_history_management(mut self, enabled: bool) -> Self {
        self.enable_history_management = enabled;
        self
    }

    pub fn with_builtin_tools(mut self, enabled: bool) -> Self {
        self.enable_builtin_tools = enabled;
        self
    }

    pub fn with_max_tool_rounds(mut self, rounds: u32) -> Self {
        self.max_tool_rounds = rounds;
        self
    }

    pub fn with_context_size(mut self, size: usize) -> Self {
        self.context_size = Some(size);
        self
    }

    pub fn with_summarize_threshold(mut self, threshold: f32) -> Self {
        self.summarize_threshold = threshold;
        self
    }
}

/// Where the orchestrator is within a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    /// Between turns (initial and terminal)
    Idle,
    /// A backend generation is in flight
    AwaitingGeneration,
    /// A reply arrived and is being inspected
    Responding,
    /// Parsed tool calls are being executed
    DispatchingTools,
}

/// A conversational agent: one model reference, one conversation, one
/// tool registry. Single-threaded by construction; `&mut self` on the
/// turn-driving methods enforces one call site at a time.
pub struct Agent {
    model: Arc<Model>,
    config: AgentConfig,
    context: Arc<Mutex<ContextManager>>,
    tools: ToolRegistry,
    state: AgentState,
}

impl Agent {
    /// Create an agent bound to a model.
    ///
    /// With `enable_builtin_tools` set, the todo, notes, and summarization
    /// tools register automatically with memory-only storage; use the
    /// `enable_builtin_*` methods instead to give them persistence paths.
    pub fn new(model: Arc<Model>, mut config: AgentConfig) -> Self {
        if config.max_tool_rounds < MIN_TOOL_ROUNDS {
            debug!(
                requested = config.max_tool_rounds,
                "Raising max_tool_rounds to the minimum"
            );
            config.max_tool_rounds = MIN_TOOL_ROUNDS;
        }

        let context_size = config
            .context_size
            .unwrap_or_else(|| model.info().context_size);
        let context = Arc::new(Mutex::new(ContextManager::new(
            config.system_prompt.clone(),
            context_size,
            config.summarize_threshold,
        )));

        let mut agent = Self {
            model,
            config,
            context,
            tools: ToolRegistry::new(),
            state: AgentState::Idle,
        };

        if agent.config.enable_builtin_tools {
            agent.enable_builtin_todo(None);
            agent.enable_builtin_notes(None);
            agent.enable_builtin_summarization();
        }

        agent
    }

    /// Register a tool. Replaces any tool with the same name.
    pub fn register_tool(&mut self, tool: Box<dyn Tool>) {
        info!(tool = tool.name(), "Registering tool");
        self.tools.register(tool);
    }

    /// Register the built-in todo tool, persisted at `storage_path`
    /// (memory-only when `None`).
    pub fn enable_builtin_todo(&mut self, storage_path: Option<&Path>) {
        let tool = match storage_path {
            Some(path) => TodoTool::new(path),
            None => TodoTool::in_memory(),
        };
        self.tools.register(Box::new(tool));
    }

    /// Register the built-in notes tool, persisted at `storage_path`
    /// (memory-only when `None`).
    pub fn enable_builtin_notes(&mut self, storage_path: Option<&Path>) {
        let tool = match storage_path {
            Some(path) => NotesTool::new(path),
            None => NotesTool::in_memory(),
        };
        self.tools.register(Box::new(tool));
    }

    /// Register the summarization-control tool and switch automatic
    /// summarization on.
    pub fn enable_builtin_summarization(&mut self) {
        self.ctx().set_summarize_enabled(true);
        self.tools.register(Box::new(SummarizationTool::new(
            self.context.clone(),
            self.model.clone(),
        )));
    }

    /// Current position in the turn state machine.
    pub fn state(&self) -> AgentState {
        self.state
    }

    /// Registered tool names, in advertisement order.
    pub fn tool_names(&self) -> Vec<String> {
        self.tools.names().into_iter().map(String::from).collect()
    }

    /// Append a message to the history without generating. Any role
    /// string is accepted; `system`, `user`, and `assistant` are the
    /// significant ones.
    pub fn add_message(&mut self, role: &str, content: &str) {
        self.ctx().conversation_mut().push(Message {
            role: Role::from(role),
            content: content.to_string(),
        });
    }

    /// Remove all history and reinstate the configured system prompt as
    /// the sole entry.
    pub fn clear_history(&mut self) {
        self.ctx().conversation_mut().clear();
    }

    /// A snapshot of the conversation.
    pub fn history(&self) -> Vec<Message> {
        self.ctx().conversation().messages().to_vec()
    }

    /// The conversation as a JSON array of `{role, content}` objects.
    pub fn history_json(&self) -> Result<String> {
        let result = self.ctx().conversation().to_json().map_err(Error::from);
        diag::track(&result);
        result
    }

    /// Drive one full turn: feed in a user message, interleave any tool
    /// calls, and return the final assistant text.
    pub async fn respond(&mut self, user_message: &str) -> Result<String> {
        let result = self.respond_inner(user_message).await;
        diag::track(&result);
        self.state = AgentState::Idle;
        result
    }

    /// Streaming variant of [`Agent::respond`].
    ///
    /// When tool calling is active the turn is generated in blocking form
    /// (the parser needs the full text) and `on_token` fires once with the
    /// final reply; otherwise tokens are forwarded as the backend produces
    /// them. Returns the full reply either way.
    pub async fn respond_stream(
        &mut self,
        user_message: &str,
        mut on_token: impl FnMut(&str),
    ) -> Result<String> {
        if self.tools_active() {
            let text = self.respond(user_message).await?;
            on_token(&text);
            return Ok(text);
        }

        let result = self.respond_stream_inner(user_message, &mut on_token).await;
        diag::track(&result);
        self.state = AgentState::Idle;
        result
    }

    // --- Turn internals ---

    async fn respond_inner(&mut self, user_message: &str) -> Result<String> {
        let params = self.params();
        let history_on = self.config.enable_history_management;

        // With history off, the turn lives in a local transcript: the
        // system prompt, this message, and any tool exchanges.
        let mut local: Vec<Message> = Vec::new();
        if history_on {
            self.ctx().conversation_mut().push(Message::user(user_message));
        } else {
            if let Some(prompt) = &self.config.system_prompt {
                local.push(Message::system(prompt.clone()));
            }
            local.push(Message::user(user_message));
        }

        let mut rounds: u32 = 0;
        loop {
            self.maybe_summarize().await;

            let prompt = self.build_prompt(&local, history_on);
            self.state = AgentState::AwaitingGeneration;
            let response = self.model.generate(&prompt, &params).await?;
            self.state = AgentState::Responding;

            let calls = if self.tools_active() {
                parse_tool_calls(&response)
            } else {
                Vec::new()
            };

            if calls.is_empty() || rounds >= self.config.max_tool_rounds {
                if !calls.is_empty() {
                    warn!(
                        rounds,
                        "Max tool rounds reached; returning raw response"
                    );
                }
                if history_on {
                    self.ctx()
                        .conversation_mut()
                        .push(Message::assistant(response.clone()));
                }
                return Ok(response);
            }

            rounds += 1;
            self.state = AgentState::DispatchingTools;
            debug!(count = calls.len(), round = rounds, "Dispatching tool calls");
            let results = execute_tool_calls(&self.tools, &calls).await;

            if history_on {
                let mut ctx = self.ctx();
                ctx.conversation_mut().push(Message::assistant(response));
                ctx.conversation_mut().push(Message::user(results));
            } else {
                local.push(Message::assistant(response));
                local.push(Message::user(results));
            }
            // Re-enter with the tool results already in the transcript.
        }
    }

    async fn respond_stream_inner(
        &mut self,
        user_message: &str,
        on_token: &mut dyn FnMut(&str),
    ) -> Result<String> {
        let params = self.params();
        let history_on = self.config.enable_history_management;

        let mut local: Vec<Message> = Vec::new();
        if history_on {
            self.ctx().conversation_mut().push(Message::user(user_message));
        } else {
            if let Some(prompt) = &self.config.system_prompt {
                local.push(Message::system(prompt.clone()));
            }
            local.push(Message::user(user_message));
        }

        self.maybe_summarize().await;

        let prompt = self.build_prompt(&local, history_on);
        self.state = AgentState::AwaitingGeneration;
        let mut stream = self.model.generate_stream(&prompt, &params).await?;
        self.state = AgentState::Responding;

        let mut full = String::new();
        while let Some(chunk) = stream.recv().await {
            match chunk {
                Ok(token) => {
                    on_token(&token);
                    full.push_str(&token);
                }
                Err(e) => {
                    // Partial output never reaches the history.
                    return Err(e.into());
                }
            }
        }

        if history_on {
            self.ctx()
                .conversation_mut()
                .push(Message::assistant(full.clone()));
        }
        Ok(full)
    }

    /// Summarize before a generation when enabled and the window is full.
    /// Failure is non-fatal: the turn proceeds with the full history.
    async fn maybe_summarize(&self) {
        let request = {
            let ctx = self.ctx();
            if !ctx.summarize_enabled() || !ctx.is_full() {
                return;
            }
            ctx.build_summary_request()
        };
        let Some(request) = request else { return };

        info!(folding = request.count, "Context full, summarizing");
        let params = GenerationParams {
            temperature: SUMMARY_TEMPERATURE,
            max_tokens: Some(SUMMARY_MAX_TOKENS),
        };
        match self.model.generate(&request.prompt, &params).await {
            Ok(text) => self.ctx().apply_summary(&request, &text),
            Err(e) => {
                warn!(error = %e, "Auto-summarization failed; continuing with full history");
            }
        }
    }

    fn build_prompt(&self, local: &[Message], history_on: bool) -> String {
        let prompt = if history_on {
            self.ctx().render()
        } else {
            context::render_chatml(local)
        };
        if self.tools_active() {
            let preamble = render_tool_preamble(&self.tools.descriptors());
            inject_preamble(&prompt, &preamble)
        } else {
            prompt
        }
    }

    fn tools_active(&self) -> bool {
        self.config.enable_tool_calling && !self.tools.is_empty()
    }

    fn params(&self) -> GenerationParams {
        GenerationParams {
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
        }
    }

    fn ctx(&self) -> MutexGuard<'_, ContextManager> {
        // Single-threaded agents cannot deadlock here; recover from a
        // poisoned lock rather than panicking.
        self.context
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
