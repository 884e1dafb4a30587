//! Model backend client.
//!
//! One chat-completion call per invocation, in a buffered and a
//! token-streaming variant. Both take a cancellation token derived from
//! the owning session; cancellation terminates a stream immediately
//! without waiting for the remote side to close.
//!
//! The [`ChatModel`] trait is the seam the orchestrator talks through;
//! [`HttpChatModel`] is the production implementation against an
//! OpenRouter-compatible endpoint.

mod client;
mod sse;

pub use client::HttpChatModel;

use async_trait::async_trait;
use miette::Diagnostic;
use thiserror::Error;

use crate::cancel::CancelToken;
use crate::message::ChatMessage;

/// Inputs for a single chat-completion call.
#[derive(Clone, Debug)]
pub struct CompletionRequest {
    /// Model identifier understood by the backend.
    pub model: String,
    /// System prompt injected as the first message.
    pub system_prompt: String,
    /// Conversation messages following the system prompt.
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    /// Optional `response_format` pass-through (e.g. `{"type":"json_object"}`).
    pub response_format: Option<serde_json::Value>,
}

impl CompletionRequest {
    #[must_use]
    pub fn new(model: impl Into<String>, system_prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            system_prompt: system_prompt.into(),
            messages: Vec::new(),
            temperature: 0.2,
            max_tokens: None,
            response_format: None,
        }
    }

    #[must_use]
    pub fn with_messages(mut self, messages: Vec<ChatMessage>) -> Self {
        self.messages = messages;
        self
    }

    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    #[must_use]
    pub fn with_json_response(mut self) -> Self {
        self.response_format = Some(serde_json::json!({"type": "json_object"}));
        self
    }
}

/// Transport-level failures from the model backend.
#[derive(Debug, Error, Diagnostic)]
pub enum ModelError {
    /// Connection-level failure before or during the exchange.
    #[error("model HTTP transport failure: {message}")]
    #[diagnostic(
        code(veriweave::model::transport),
        help("Check network reachability and the configured base URL.")
    )]
    Transport { message: String },

    /// Non-2xx response; carries the status and a capped body excerpt.
    #[error("model HTTP error {status}: {body}")]
    #[diagnostic(
        code(veriweave::model::status),
        help("Inspect the response body excerpt for the backend's reason.")
    )]
    Status { status: u16, body: String },

    /// The SSE stream produced a frame that could not be decoded, or
    /// ended before the terminal `[DONE]` marker.
    #[error("model HTTP stream failed: {detail}")]
    #[diagnostic(code(veriweave::model::stream))]
    Stream { detail: String },

    /// The response body did not contain assistant content.
    #[error("model response malformed: {detail}")]
    #[diagnostic(code(veriweave::model::malformed))]
    Malformed { detail: String },

    /// The owning session was cancelled mid-call.
    #[error("cancelled")]
    #[diagnostic(code(veriweave::model::cancelled))]
    Cancelled,
}

/// Failure of a streaming call, retaining the deltas produced before the
/// error point so callers can surface partial progress.
#[derive(Debug, Error, Diagnostic)]
#[error("{source}")]
pub struct StreamFailure {
    #[source]
    pub source: ModelError,
    /// Concatenation of all deltas received before the failure.
    pub partial: String,
}

/// A chat-completion backend.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Run one buffered completion and return the full assistant content.
    async fn complete(
        &self,
        request: CompletionRequest,
        cancel: CancelToken,
    ) -> Result<String, ModelError>;

    /// Run one streaming completion. Each text delta is sent into
    /// `deltas` as it arrives; the full concatenation is returned once
    /// the stream terminates. On failure the partial concatenation is
    /// returned inside the error.
    async fn complete_stream(
        &self,
        request: CompletionRequest,
        cancel: CancelToken,
        deltas: flume::Sender<String>,
    ) -> Result<String, StreamFailure>;
}
