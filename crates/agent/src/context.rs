//! History rendering, token occupancy, and summarization.
//!
//! The context manager owns the conversation transcript and everything
//! derived from it: the ChatML prompt the backend sees, the cheap
//! chars/4 token estimate that decides when the window is getting full,
//! and the fold-the-oldest-turns-into-a-summary operation.
//!
//! Summarization is split into two phases so no lock is held across the
//! backend call: [`ContextManager::build_summary_request`] captures the
//! range and prompt, the caller generates the summary text, and
//! [`ContextManager::apply_summary`] splices it in.

use colloquy_core::{Conversation, Message};
use tracing::debug;

/// Temperature used for summary generation.
pub const SUMMARY_TEMPERATURE: f32 = 0.3;

/// Token cap for summary generation.
pub const SUMMARY_MAX_TOKENS: u32 = 256;

/// Default occupancy threshold that marks the context "full".
pub const DEFAULT_FULL_THRESHOLD: f32 = 0.75;

/// Share of the summarizable history folded into a summary.
const SUMMARY_RATIO: f32 = 0.6;

/// Render messages in ChatML framing, terminated with an open assistant
/// turn so the model continues from there.
pub fn render_chatml(messages: &[Message]) -> String {
    let mut prompt = String::new();
    for msg in messages {
        prompt.push_str("<|im_start|>");
        prompt.push_str(msg.role.as_str());
        prompt.push('\n');
        prompt.push_str(&msg.content);
        prompt.push_str("<|im_end|>\n");
    }
    prompt.push_str("<|im_start|>assistant\n");
    prompt
}

/// Estimate the token count for a string.
///
/// Heuristic: 1 token is roughly 4 characters. Rounds up. Deliberately
/// cheap and backend-independent so summarization stays deterministic.
pub fn estimate_tokens(text: &str) -> usize {
    text.len().div_ceil(4)
}

/// A captured summarization request: which messages to fold and the
/// prompt that asks the backend for their summary.
#[derive(Debug, Clone)]
pub struct SummaryRequest {
    /// Index of the first message to replace
    pub start: usize,
    /// Number of messages to replace
    pub count: usize,
    /// The summarization prompt
    pub prompt: String,
}

/// Owns the transcript and its occupancy policy.
pub struct ContextManager {
    conversation: Conversation,
    context_size: usize,
    threshold: f32,
    summarize_enabled: bool,
}

impl ContextManager {
    pub fn new(system_prompt: Option<String>, context_size: usize, threshold: f32) -> Self {
        Self {
            conversation: Conversation::new(system_prompt),
            context_size,
            threshold,
            summarize_enabled: false,
        }
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn conversation_mut(&mut self) -> &mut Conversation {
        &mut self.conversation
    }

    pub fn context_size(&self) -> usize {
        self.context_size
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn summarize_enabled(&self) -> bool {
        self.summarize_enabled
    }

    pub fn set_summarize_enabled(&mut self, enabled: bool) {
        self.summarize_enabled = enabled;
    }

    /// Render the full transcript into the prompt format.
    pub fn render(&self) -> String {
        render_chatml(self.conversation.messages())
    }

    /// Estimated token occupancy of the rendered transcript.
    pub fn estimated_tokens(&self) -> usize {
        estimate_tokens(&self.render())
    }

    /// Whether occupancy has reached the configured share of the window.
    pub fn is_full(&self) -> bool {
        self.estimated_tokens() as f32 >= self.threshold * self.context_size as f32
    }

    /// Capture a summarization request for the oldest ~60% of the
    /// summarizable history. Returns `None` when there is nothing worth
    /// folding (two or fewer non-system-prompt messages).
    pub fn build_summary_request(&self) -> Option<SummaryRequest> {
        let (offset, candidates) = self.conversation.summarizable();
        if candidates.len() <= 2 {
            return None;
        }

        let count = ((candidates.len() as f32 * SUMMARY_RATIO).floor() as usize).max(2);

        let mut prompt = String::from(
            "Summarize the following conversation concisely, \
             preserving key facts, decisions, and open questions.\n\n",
        );
        for msg in &candidates[..count] {
            prompt.push_str(msg.role.as_str());
            prompt.push_str(": ");
            prompt.push_str(&msg.content);
            prompt.push('\n');
        }
        prompt.push_str("\nSummary:");

        Some(SummaryRequest {
            start: offset,
            count,
            prompt,
        })
    }

    /// Replace the captured range with a single summary message. The
    /// configured system prompt at position 0 is never touched.
    pub fn apply_summary(&mut self, request: &SummaryRequest, summary_text: &str) {
        debug!(
            folded = request.count,
            remaining = self.conversation.len() - request.count,
            "Applying conversation summary"
        );
        self.conversation
            .replace_with_summary(request.start, request.count, summary_text.trim());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use colloquy_core::Role;

    fn manager_with(system: Option<&str>, turns: usize) -> ContextManager {
        let mut mgr = ContextManager::new(
            system.map(str::to_string),
            2048,
            DEFAULT_FULL_THRESHOLD,
        );
        for i in 0..turns {
            if i % 2 == 0 {
                mgr.conversation_mut().push(Message::user(format!("question {i}")));
            } else {
                mgr.conversation_mut()
                    .push(Message::assistant(format!("answer {i}")));
            }
        }
        mgr
    }

    #[test]
    fn render_tags_roles_and_opens_assistant_turn() {
        let mgr = manager_with(Some("Be helpful."), 2);
        let prompt = mgr.render();
        assert!(prompt.starts_with("<|im_start|>system\nBe helpful.<|im_end|>\n"));
        assert!(prompt.contains("<|im_start|>user\nquestion 0<|im_end|>\n"));
        assert!(prompt.contains("<|im_start|>assistant\nanswer 1<|im_end|>\n"));
        assert!(prompt.ends_with("<|im_start|>assistant\n"));
    }

    #[test]
    fn token_estimate_rounds_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("test"), 1);
        assert_eq!(estimate_tokens("hello"), 2);
        assert_eq!(estimate_tokens(&"a".repeat(100)), 25);
    }

    #[test]
    fn is_full_respects_threshold() {
        let mut mgr = ContextManager::new(None, 100, 0.75);
        assert!(!mgr.is_full());
        // Push enough content to cross 75 estimated tokens
        mgr.conversation_mut().push(Message::user("x".repeat(400)));
        assert!(mgr.is_full());
    }

    #[test]
    fn summary_request_needs_more_than_two_messages() {
        let mgr = manager_with(Some("sys"), 2);
        assert!(mgr.build_summary_request().is_none());

        let mgr = manager_with(None, 2);
        assert!(mgr.build_summary_request().is_none());

        let mgr = manager_with(None, 3);
        let req = mgr.build_summary_request().unwrap();
        assert_eq!(req.count, 2); // floor(0.6 * 3) = 1, raised to 2
    }

    #[test]
    fn summarizing_a_lone_system_prompt_is_a_noop() {
        let mut mgr = manager_with(Some("sys"), 0);
        assert!(mgr.build_summary_request().is_none());
        // Nothing changed
        assert_eq!(mgr.conversation_mut().len(), 1);
    }

    #[test]
    fn summary_request_covers_sixty_percent() {
        let mgr = manager_with(Some("sys"), 30);
        let req = mgr.build_summary_request().unwrap();
        assert_eq!(req.start, 1); // skips the system prompt
        assert_eq!(req.count, 18); // floor(0.6 * 30)
        assert!(req.prompt.contains("question 0"));
        assert!(req.prompt.contains("user: "));
        assert!(req.prompt.ends_with("Summary:"));
        // Only the first 18 turns appear
        assert!(!req.prompt.contains("question 18"));
    }

    #[test]
    fn apply_summary_preserves_system_prompt() {
        let mut mgr = manager_with(Some("sys"), 30);
        let req = mgr.build_summary_request().unwrap();
        mgr.apply_summary(&req, "they talked about thirty things");

        let messages = mgr.conversation().messages();
        // sys + summary + 12 survivors
        assert_eq!(messages.len(), 14);
        assert_eq!(messages[0].content, "sys");
        assert_eq!(messages[1].role, Role::System);
        assert!(messages[1]
            .content
            .starts_with("[Previous conversation summary]: "));
        assert_eq!(messages[2].content, "question 18");
    }

    #[test]
    fn repeated_summaries_never_stack() {
        let mut mgr = manager_with(None, 20);
        let req = mgr.build_summary_request().unwrap();
        mgr.apply_summary(&req, "first summary");

        // Fill up again and summarize again; the old summary message is a
        // candidate and gets folded into the new one.
        for i in 0..10 {
            mgr.conversation_mut().push(Message::user(format!("more {i}")));
        }
        let req = mgr.build_summary_request().unwrap();
        mgr.apply_summary(&req, "second summary");

        let summaries = mgr
            .conversation()
            .messages()
            .iter()
            .filter(|m| m.content.starts_with("[Previous conversation summary]: "))
            .count();
        assert_eq!(summaries, 1);
    }

    #[test]
    fn summarize_enabled_defaults_off() {
        let mgr = ContextManager::new(None, 2048, DEFAULT_FULL_THRESHOLD);
        assert!(!mgr.summarize_enabled());
    }
}
