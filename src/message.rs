//! Chat message primitives shared by the agents and the model backend.
//!
//! Messages carry a role and text content and serialize directly into the
//! OpenRouter-compatible `messages` array. Conversation history handed to
//! the Writer is clamped to the most recent [`crate::config::HISTORY_MESSAGE_CAP`]
//! entries via [`clamp_history`].

use serde::{Deserialize, Serialize};

/// A single conversation message with a role and text content.
///
/// # Examples
/// ```
/// use veriweave::message::ChatMessage;
///
/// let user = ChatMessage::user("What does the contract say about renewals?");
/// assert!(user.has_role(ChatMessage::USER));
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChatMessage {
    /// The role of the message sender ("user", "assistant", "system").
    pub role: String,
    /// The text content of the message.
    pub content: String,
}

impl ChatMessage {
    /// User input message role.
    pub const USER: &'static str = "user";
    /// Assistant response message role.
    pub const ASSISTANT: &'static str = "assistant";
    /// System prompt message role.
    pub const SYSTEM: &'static str = "system";

    #[must_use]
    pub fn new(role: &str, content: &str) -> Self {
        Self {
            role: role.to_string(),
            content: content.to_string(),
        }
    }

    /// Creates a user message.
    #[must_use]
    pub fn user(content: &str) -> Self {
        Self::new(Self::USER, content)
    }

    /// Creates an assistant message.
    #[must_use]
    pub fn assistant(content: &str) -> Self {
        Self::new(Self::ASSISTANT, content)
    }

    /// Creates a system message.
    #[must_use]
    pub fn system(content: &str) -> Self {
        Self::new(Self::SYSTEM, content)
    }

    /// Returns true if this message has the specified role.
    #[must_use]
    pub fn has_role(&self, role: &str) -> bool {
        self.role == role
    }
}

/// Keep only the trailing `cap` messages of a conversation history.
///
/// The most recent turns carry the context the Writer needs; everything
/// older is dropped before prompt assembly.
#[must_use]
pub fn clamp_history(history: &[ChatMessage], cap: usize) -> &[ChatMessage] {
    let start = history.len().saturating_sub(cap);
    &history[start..]
}
