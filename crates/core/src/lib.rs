//! # Colloquy Core
//!
//! Domain types, traits, and error definitions for the colloquy agent
//! runtime. This crate defines the domain model that the backend, agent,
//! and tool crates implement against.
//!
//! ## Design Philosophy
//!
//! Every subsystem is defined as a trait here. Implementations live in their
//! respective crates. This enables:
//! - Swapping backends and tools via configuration
//! - Easy testing with mock/stub implementations
//! - Clean dependency graph (all crates depend inward on core)

pub mod diag;
pub mod error;
pub mod message;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use error::{BackendError, Error, ErrorKind, Result, ToolError};
pub use message::{Conversation, Message, Role};
pub use tool::{Tool, ToolCall, ToolDescriptor, ToolRegistry};

/// Library version string, e.g. `"0.1.0"`.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// Library version as `(major, minor, patch)` components.
pub fn version_components() -> (u32, u32, u32) {
    let mut parts = env!("CARGO_PKG_VERSION")
        .split('.')
        .map(|p| p.parse::<u32>().unwrap_or(0));
    (
        parts.next().unwrap_or(0),
        parts.next().unwrap_or(0),
        parts.next().unwrap_or(0),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_nonempty() {
        assert!(!version().is_empty());
    }

    #[test]
    fn version_components_match_string() {
        let (major, minor, patch) = version_components();
        assert_eq!(version(), format!("{major}.{minor}.{patch}"));
    }
}
