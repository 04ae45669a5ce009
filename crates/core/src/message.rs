//! Message and Conversation domain types.
//!
//! These are the core value objects that flow through the system:
//! a user message enters the conversation, the agent renders the transcript
//! into a prompt, and the backend's reply is appended as an assistant turn.

use serde::{Deserialize, Serialize};

/// The role of a message sender in a conversation.
///
/// Three roles are significant to the orchestrator; anything else is
/// carried through verbatim as [`Role::Other`] so arbitrary role strings
/// round-trip through the history JSON.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Role {
    /// System instructions (system prompt, summaries)
    System,
    /// The end user (and tool-result turns fed back to the model)
    User,
    /// The model's reply
    Assistant,
    /// Any other role string, preserved as-is
    Other(String),
}

impl Role {
    /// The canonical lowercase string for this role.
    pub fn as_str(&self) -> &str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Other(s) => s,
        }
    }
}

impl From<&str> for Role {
    fn from(s: &str) -> Self {
        match s {
            "system" => Role::System,
            "user" => Role::User,
            "assistant" => Role::Assistant,
            other => Role::Other(other.to_string()),
        }
    }
}

impl From<String> for Role {
    fn from(s: String) -> Self {
        Role::from(s.as_str())
    }
}

impl From<Role> for String {
    fn from(role: Role) -> Self {
        role.as_str().to_string()
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single message in a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Who sent this message
    pub role: Role,

    /// The text content
    pub content: String,
}

impl Message {
    /// Create a new user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    /// Create a new assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    /// Create a new system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }
}

/// Content prefix marking a synthetic summary message produced by
/// conversation summarization.
pub const SUMMARY_PREFIX: &str = "[Previous conversation summary]: ";

/// An ordered sequence of messages with an optional configured system prompt.
///
/// Invariants:
/// - If a system prompt was configured, position 0 holds it as a `system`
///   message (summarization never removes it).
/// - After summarization, at most one additional `system` message (the
///   summary, tagged with [`SUMMARY_PREFIX`]) sits before the surviving
///   non-system turns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    /// Ordered messages
    messages: Vec<Message>,

    /// The configured system prompt, reinstated by [`Conversation::clear`]
    system_prompt: Option<String>,
}

impl Conversation {
    /// Create a conversation, seeded with the system prompt when one is
    /// configured. Empty prompts are treated as absent.
    pub fn new(system_prompt: Option<String>) -> Self {
        let system_prompt = system_prompt.filter(|p| !p.is_empty());
        let mut messages = Vec::new();
        if let Some(prompt) = &system_prompt {
            messages.push(Message::system(prompt.clone()));
        }
        Self {
            messages,
            system_prompt,
        }
    }

    /// Whether a system prompt was configured at construction.
    pub fn has_system_prompt(&self) -> bool {
        self.system_prompt.is_some()
    }

    /// The configured system prompt, if any.
    pub fn system_prompt(&self) -> Option<&str> {
        self.system_prompt.as_deref()
    }

    /// Append a message. Append order equals call order.
    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// All messages in order.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Remove all messages and reinstate the configured system prompt as
    /// the sole entry (or leave the conversation empty when none was set).
    pub fn clear(&mut self) {
        self.messages.clear();
        if let Some(prompt) = &self.system_prompt {
            self.messages.push(Message::system(prompt.clone()));
        }
    }

    /// The messages that participate in summarization: everything after the
    /// configured system prompt. Returns the start offset and the slice.
    pub fn summarizable(&self) -> (usize, &[Message]) {
        let offset = usize::from(
            self.system_prompt.is_some()
                && self
                    .messages
                    .first()
                    .is_some_and(|m| m.role == Role::System),
        );
        (offset, &self.messages[offset..])
    }

    /// Replace the message range `[start, start + count)` with a single
    /// summary message. Used by summarization; the caller guarantees the
    /// range excludes the configured system prompt.
    pub fn replace_with_summary(&mut self, start: usize, count: usize, summary_text: &str) {
        let summary = Message::system(format!("{SUMMARY_PREFIX}{summary_text}"));
        self.messages.splice(start..start + count, [summary]);
    }

    /// Serialize the transcript as a JSON array of `{role, content}`
    /// objects, 2-space indented, in order.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&self.messages)
    }

    /// Rebuild a transcript from the JSON produced by [`Conversation::to_json`].
    pub fn from_json(json: &str, system_prompt: Option<String>) -> serde_json::Result<Self> {
        let messages: Vec<Message> = serde_json::from_str(json)?;
        Ok(Self {
            messages,
            system_prompt: system_prompt.filter(|p| !p.is_empty()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_round_trips_arbitrary_strings() {
        for raw in ["system", "user", "assistant", "tool", "critic"] {
            let role = Role::from(raw);
            assert_eq!(role.as_str(), raw);
            let json = serde_json::to_string(&role).unwrap();
            assert_eq!(json, format!("\"{raw}\""));
            let back: Role = serde_json::from_str(&json).unwrap();
            assert_eq!(back, role);
        }
    }

    #[test]
    fn new_conversation_seeds_system_prompt() {
        let conv = Conversation::new(Some("You are helpful.".into()));
        assert_eq!(conv.len(), 1);
        assert_eq!(conv.messages()[0].role, Role::System);
        assert_eq!(conv.messages()[0].content, "You are helpful.");
    }

    #[test]
    fn empty_system_prompt_is_absent() {
        let conv = Conversation::new(Some(String::new()));
        assert!(conv.is_empty());
        assert!(!conv.has_system_prompt());
    }

    #[test]
    fn clear_reinstates_system_prompt() {
        let mut conv = Conversation::new(Some("Be brief.".into()));
        conv.push(Message::user("Hello"));
        conv.push(Message::assistant("Hi"));
        conv.clear();
        assert_eq!(conv.len(), 1);
        assert_eq!(conv.messages()[0].content, "Be brief.");
    }

    #[test]
    fn clear_without_system_prompt_empties() {
        let mut conv = Conversation::new(None);
        conv.push(Message::user("Hello"));
        conv.clear();
        assert!(conv.is_empty());
    }

    #[test]
    fn summarizable_skips_configured_system_prompt() {
        let mut conv = Conversation::new(Some("sys".into()));
        conv.push(Message::user("a"));
        conv.push(Message::assistant("b"));
        let (offset, slice) = conv.summarizable();
        assert_eq!(offset, 1);
        assert_eq!(slice.len(), 2);

        let conv = Conversation::new(None);
        let (offset, slice) = conv.summarizable();
        assert_eq!(offset, 0);
        assert!(slice.is_empty());
    }

    #[test]
    fn replace_with_summary_preserves_prompt_and_tail() {
        let mut conv = Conversation::new(Some("sys".into()));
        for i in 0..4 {
            conv.push(Message::user(format!("msg {i}")));
        }
        conv.replace_with_summary(1, 2, "first two messages");
        assert_eq!(conv.len(), 4); // sys + summary + 2 survivors
        assert_eq!(conv.messages()[0].content, "sys");
        assert_eq!(conv.messages()[1].role, Role::System);
        assert!(conv.messages()[1]
            .content
            .starts_with("[Previous conversation summary]: "));
        assert_eq!(conv.messages()[2].content, "msg 2");
    }

    #[test]
    fn history_json_round_trip() {
        let mut conv = Conversation::new(Some("sys".into()));
        conv.push(Message::user("question"));
        conv.push(Message::assistant("answer"));
        conv.push(Message {
            role: Role::Other("tool".into()),
            content: "result".into(),
        });

        let json = conv.to_json().unwrap();
        // 2-space indent
        assert!(json.contains("\n  {"));
        let back = Conversation::from_json(&json, Some("sys".into())).unwrap();
        assert_eq!(back.messages(), conv.messages());
    }

    #[test]
    fn history_json_is_ordered_role_content_array() {
        let mut conv = Conversation::new(None);
        conv.push(Message::user("first"));
        conv.push(Message::assistant("second"));
        let parsed: serde_json::Value = serde_json::from_str(&conv.to_json().unwrap()).unwrap();
        let arr = parsed.as_array().unwrap();
        assert_eq!(arr.len(), 2);
        assert_eq!(arr[0]["role"], "user");
        assert_eq!(arr[0]["content"], "first");
        assert_eq!(arr[1]["role"], "assistant");
    }
}
