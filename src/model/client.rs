//! OpenRouter-compatible HTTP chat-completion client.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use serde_json::{Value, json};
use tracing::{debug, instrument};

use super::sse;
use super::{ChatModel, CompletionRequest, ModelError, StreamFailure};
use crate::cancel::CancelToken;
use crate::config::PipelineConfig;

const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Cap on buffered-but-unframed SSE bytes; a server that never emits an
/// event boundary must not grow memory without bound.
const MAX_SSE_BUFFER_BYTES: usize = 4 * 1024 * 1024;

/// Cap on error-body reads.
const MAX_ERROR_BODY_BYTES: usize = 32 * 1024;

/// Production [`ChatModel`] over an OpenRouter-compatible endpoint.
///
/// Holds only per-call state beyond the shared connection pool; safe for
/// concurrent invocation across sessions.
pub struct HttpChatModel {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    http_referer: String,
    app_title: String,
}

impl HttpChatModel {
    /// Build a client from the process configuration.
    ///
    /// No total request timeout is set: streams legitimately run for tens
    /// of seconds. The per-session wall clock bounds the overall call.
    #[must_use]
    pub fn new(config: &PipelineConfig) -> Self {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .expect("build shared HTTP client");
        Self {
            http,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            http_referer: config.http_referer.clone(),
            app_title: config.app_title.clone(),
        }
    }

    fn request_body(request: &CompletionRequest, stream: bool) -> Value {
        let mut messages = Vec::with_capacity(request.messages.len() + 1);
        if !request.system_prompt.is_empty() {
            messages.push(json!({
                "role": "system",
                "content": request.system_prompt,
            }));
        }
        for msg in &request.messages {
            messages.push(json!({"role": msg.role, "content": msg.content}));
        }

        let mut body = serde_json::Map::new();
        body.insert("model".into(), json!(request.model));
        body.insert("messages".into(), Value::Array(messages));
        body.insert("temperature".into(), json!(request.temperature));
        if stream {
            body.insert("stream".into(), json!(true));
        }
        if let Some(max_tokens) = request.max_tokens {
            body.insert("max_tokens".into(), json!(max_tokens));
        }
        if let Some(format) = &request.response_format {
            body.insert("response_format".into(), format.clone());
        }
        Value::Object(body)
    }

    async fn send(
        &self,
        request: &CompletionRequest,
        stream: bool,
    ) -> Result<reqwest::Response, ModelError> {
        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .http
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("HTTP-Referer", &self.http_referer)
            .header("X-Title", &self.app_title)
            .json(&Self::request_body(request, stream))
            .send()
            .await
            .map_err(|e| ModelError::Transport {
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = read_capped_body(response).await;
            return Err(ModelError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }
}

/// Read a response body with a hard size cap, for error excerpts.
async fn read_capped_body(response: reqwest::Response) -> String {
    let mut body = Vec::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let Ok(chunk) = chunk else { break };
        body.extend_from_slice(&chunk);
        if body.len() > MAX_ERROR_BODY_BYTES {
            body.truncate(MAX_ERROR_BODY_BYTES);
            return format!("{}...(truncated)", String::from_utf8_lossy(&body));
        }
    }
    String::from_utf8_lossy(&body).into_owned()
}

#[async_trait]
impl ChatModel for HttpChatModel {
    #[instrument(skip(self, request, cancel), fields(model = %request.model))]
    async fn complete(
        &self,
        request: CompletionRequest,
        mut cancel: CancelToken,
    ) -> Result<String, ModelError> {
        let exchange = async {
            let response = self.send(&request, false).await?;
            let body: Value = response
                .json()
                .await
                .map_err(|e| ModelError::Transport {
                    message: e.to_string(),
                })?;
            sse::message_text(&body)
                .map(str::to_owned)
                .ok_or_else(|| ModelError::Malformed {
                    detail: "response carried no assistant content".into(),
                })
        };

        tokio::select! {
            () = cancel.cancelled() => Err(ModelError::Cancelled),
            result = exchange => result,
        }
    }

    #[instrument(skip(self, request, cancel, deltas), fields(model = %request.model))]
    async fn complete_stream(
        &self,
        request: CompletionRequest,
        mut cancel: CancelToken,
        deltas: flume::Sender<String>,
    ) -> Result<String, StreamFailure> {
        let mut full = String::new();

        let response = tokio::select! {
            () = cancel.cancelled() => Err(ModelError::Cancelled),
            sent = self.send(&request, true) => sent,
        }
        .map_err(|source| StreamFailure {
            source,
            partial: String::new(),
        })?;

        let mut body = response.bytes_stream();
        let mut buffer: Vec<u8> = Vec::new();

        loop {
            let chunk = tokio::select! {
                () = cancel.cancelled() => {
                    return Err(StreamFailure { source: ModelError::Cancelled, partial: full });
                }
                chunk = body.next() => chunk,
            };

            let Some(chunk) = chunk else {
                // Connection closed before the terminal marker.
                return Err(StreamFailure {
                    source: ModelError::Stream {
                        detail: "connection closed before stream completed".into(),
                    },
                    partial: full,
                });
            };

            let chunk = chunk.map_err(|e| StreamFailure {
                source: ModelError::Transport {
                    message: e.to_string(),
                },
                partial: full.clone(),
            })?;
            buffer.extend_from_slice(&chunk);

            if buffer.len() > MAX_SSE_BUFFER_BYTES {
                return Err(StreamFailure {
                    source: ModelError::Stream {
                        detail: "SSE buffer exceeded maximum size".into(),
                    },
                    partial: full,
                });
            }

            while let Some(event) = sse::drain_next_event(&mut buffer) {
                if event.is_empty() {
                    continue;
                }
                let Ok(event) = std::str::from_utf8(&event) else {
                    return Err(StreamFailure {
                        source: ModelError::Stream {
                            detail: "invalid UTF-8 in SSE stream".into(),
                        },
                        partial: full,
                    });
                };

                let Some(data) = sse::extract_data(event) else {
                    continue;
                };
                if data == sse::DONE_MARKER {
                    return Ok(full);
                }

                let frame: Value = serde_json::from_str(&data).map_err(|e| StreamFailure {
                    source: ModelError::Stream {
                        detail: format!("malformed SSE frame: {e}: {}", excerpt(&data)),
                    },
                    partial: full.clone(),
                })?;

                if let Some(text) = sse::delta_text(&frame) {
                    full.push_str(text);
                    if deltas.send(text.to_string()).is_err() {
                        // Receiver gone; keep accumulating for the return value.
                        debug!("delta receiver dropped; continuing buffered");
                    }
                }
            }
        }
    }
}

fn excerpt(data: &str) -> &str {
    let cut = data
        .char_indices()
        .take_while(|(i, _)| *i < 120)
        .last()
        .map_or(0, |(i, c)| i + c.len_utf8());
    &data[..cut]
}
