//! # Veriweave: Retrieval-Grounded Multi-Agent Verification Pipeline
//!
//! Veriweave turns a user query plus a corpus of previously ingested
//! documents into a cited, fact-checked answer with a per-claim evidence
//! ledger. Three cooperating model agents run around a retrieval step:
//!
//! - **Writer** drafts a cited answer from the retrieved context,
//!   streaming tokens to observers as it goes;
//! - **Skeptic** critiques the draft, hunting hallucinations, uncited
//!   claims, and contradictions;
//! - **Judge** extracts atomic claims, issues a verdict per claim, and
//!   emits the structured ledger that drives the quality gates.
//!
//! Gates that fail trigger a bounded revision loop (at most two cycles);
//! exhausting the budget is not an error, the last accepted response is
//! persisted with its residual gap.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use veriweave::api::QueryService;
//! use veriweave::config::PipelineConfig;
//! use veriweave::model::HttpChatModel;
//! use veriweave::store::{MemoryStore, QueryMode, StaticMembership};
//!
//! # use veriweave::retrieval::{Chunk, Retriever, RetrieverError};
//! # struct NoopRetriever;
//! # #[async_trait::async_trait]
//! # impl Retriever for NoopRetriever {
//! #     async fn search(&self, _: &str, _: &str, _: f64, _: usize)
//! #         -> Result<Vec<Chunk>, RetrieverError> { Ok(vec![]) }
//! # }
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Arc::new(PipelineConfig::from_env()?);
//! let service = QueryService::new(
//!     Arc::clone(&config),
//!     Arc::new(HttpChatModel::new(&config)),
//!     Arc::new(NoopRetriever),
//!     Arc::new(MemoryStore::new()),
//!     Arc::new(StaticMembership::new().with_member("workspace", "user")),
//! );
//!
//! let session_id = service
//!     .start_query("workspace", "user", "What changed in Q3?", QueryMode::Answer, vec![])
//!     .await?;
//!
//! // Poll for progress and the final, verified response.
//! let progress = service.get_progress("user", &session_id).await?;
//! println!("phase = {:?}", progress.phase);
//! # Ok(())
//! # }
//! ```
//!
//! ## Module Guide
//!
//! - [`api`] - Query entry point, observer reads, cancellation
//! - [`pipeline`] - Phase state machine and quality-gate policy
//! - [`model`] - Buffered and streaming chat-completion client
//! - [`retrieval`] - Retriever seam and citation-indexed context blocks
//! - [`ledger`] - Typed evidence ledger and the total Judge-output parser
//! - [`prompts`] - Deterministic Writer/Skeptic/Judge/Revision prompts
//! - [`progress`] - Per-session streamed progress channel
//! - [`store`] - Session store trait with in-memory and SQLite backends
//! - [`config`] - Process-wide configuration
//! - [`cancel`] - Cancellation handle/token pair
//! - [`error`] - Terminal error funnel taxonomy

pub mod api;
pub mod cancel;
pub mod config;
pub mod error;
pub mod ledger;
pub mod message;
pub mod model;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod retrieval;
pub mod store;
pub mod telemetry;
