//! Durable state for sessions, claims, evidence, and progress.
//!
//! Two backends share the [`SessionStore`] trait: [`MemoryStore`] for
//! tests and ephemeral runs, [`SqliteStore`] for durable deployments.
//! Both enforce monotonic session status transitions; a session that has
//! reached `completed` or `error` never moves again.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use miette::Diagnostic;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ledger::{Claim, Conflict, EvidenceEntry};
use crate::progress::ProgressRecord;

/// Lifecycle state of one query execution.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    #[default]
    Processing,
    Completed,
    Error,
}

impl SessionStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }

    #[must_use]
    pub fn from_loose(label: &str) -> Self {
        match label {
            "completed" => Self::Completed,
            "error" => Self::Error,
            _ => Self::Processing,
        }
    }

    /// Status transitions only move forward: `processing` may become
    /// anything, terminal states only re-assert themselves.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        match self {
            Self::Processing => true,
            Self::Completed | Self::Error => next == self,
        }
    }
}

/// Requested answer style for the Writer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryMode {
    #[default]
    Answer,
    Draft,
}

impl QueryMode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Answer => "answer",
            Self::Draft => "draft",
        }
    }

    #[must_use]
    pub fn from_loose(label: &str) -> Self {
        match label {
            "draft" => Self::Draft,
            _ => Self::Answer,
        }
    }
}

/// Inputs for creating a session row.
#[derive(Clone, Debug)]
pub struct NewSession {
    pub session_id: String,
    pub workspace_id: String,
    pub user_id: String,
    pub query: String,
    pub mode: QueryMode,
}

/// One query execution, as stored.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub session_id: String,
    pub workspace_id: String,
    pub user_id: String,
    pub query: String,
    pub mode: QueryMode,
    pub status: SessionStatus,
    pub response: Option<String>,
    pub evidence_coverage: f64,
    pub unsupported_claim_count: u32,
    pub revision_cycles: u32,
    pub processing_time_ms: u64,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl SessionRecord {
    #[must_use]
    pub fn from_new(new: &NewSession) -> Self {
        Self {
            session_id: new.session_id.clone(),
            workspace_id: new.workspace_id.clone(),
            user_id: new.user_id.clone(),
            query: new.query.clone(),
            mode: new.mode,
            status: SessionStatus::Processing,
            response: None,
            evidence_coverage: 0.0,
            unsupported_claim_count: 0,
            revision_cycles: 0,
            processing_time_ms: 0,
            error_message: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }
}

/// Partial update applied to a session row. Unset fields keep their
/// stored value.
#[derive(Clone, Debug, Default)]
pub struct SessionPatch {
    pub status: Option<SessionStatus>,
    pub response: Option<String>,
    pub evidence_coverage: Option<f64>,
    pub unsupported_claim_count: Option<u32>,
    pub revision_cycles: Option<u32>,
    pub processing_time_ms: Option<u64>,
    pub error_message: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl SessionPatch {
    /// Patch finalizing a successful session.
    #[must_use]
    pub fn completed(
        response: String,
        evidence_coverage: f64,
        unsupported_claim_count: u32,
        revision_cycles: u32,
        processing_time_ms: u64,
    ) -> Self {
        Self {
            status: Some(SessionStatus::Completed),
            response: Some(response),
            evidence_coverage: Some(evidence_coverage),
            unsupported_claim_count: Some(unsupported_claim_count),
            revision_cycles: Some(revision_cycles),
            processing_time_ms: Some(processing_time_ms),
            completed_at: Some(Utc::now()),
            ..Self::default()
        }
    }

    /// Patch finalizing a failed session.
    #[must_use]
    pub fn failed(error_message: String, processing_time_ms: u64) -> Self {
        Self {
            status: Some(SessionStatus::Error),
            error_message: Some(error_message),
            processing_time_ms: Some(processing_time_ms),
            completed_at: Some(Utc::now()),
            ..Self::default()
        }
    }
}

/// Evidence ledger for the latest revision cycle of a session.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerView {
    pub revision_cycle: u32,
    pub claims: Vec<Claim>,
    pub evidence: Vec<EvidenceEntry>,
    pub conflicts: Vec<Conflict>,
}

/// Store failures.
#[derive(Debug, Error, Diagnostic)]
pub enum StoreError {
    #[error("session not found: {session_id}")]
    #[diagnostic(code(veriweave::store::not_found))]
    NotFound { session_id: String },

    #[error("progress not found for session: {session_id}")]
    #[diagnostic(code(veriweave::store::progress_not_found))]
    ProgressNotFound { session_id: String },

    #[error("invalid status transition for session {session_id}: {from} -> {to}")]
    #[diagnostic(
        code(veriweave::store::invalid_transition),
        help("Session status only moves forward: processing -> completed | error.")
    )]
    InvalidTransition {
        session_id: String,
        from: &'static str,
        to: &'static str,
    },

    #[error("backend error: {message}")]
    #[diagnostic(
        code(veriweave::store::backend),
        help("Check storage connectivity and permissions; backend message: {message}.")
    )]
    Backend { message: String },

    #[error("serialization error: {0}")]
    #[diagnostic(code(veriweave::store::serde))]
    Serde(#[from] serde_json::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Backend {
            message: err.to_string(),
        }
    }
}

/// Durable state for sessions, claims, evidence entries, and progress.
///
/// Implementations serialize writes per session and enforce the
/// monotonic status transition rule. Ledger writes are keyed by
/// revision cycle so historical cycles stay inspectable; [`SessionStore::ledger`]
/// returns only the latest cycle.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create_session(&self, session: NewSession) -> Result<(), StoreError>;

    async fn get_session(&self, session_id: &str) -> Result<SessionRecord, StoreError>;

    async fn patch_session(
        &self,
        session_id: &str,
        patch: SessionPatch,
    ) -> Result<(), StoreError>;

    async fn insert_claim(
        &self,
        session_id: &str,
        revision_cycle: u32,
        claim: &Claim,
    ) -> Result<(), StoreError>;

    async fn insert_evidence(
        &self,
        session_id: &str,
        revision_cycle: u32,
        entry: &EvidenceEntry,
    ) -> Result<(), StoreError>;

    async fn insert_conflict(
        &self,
        session_id: &str,
        revision_cycle: u32,
        conflict: &Conflict,
    ) -> Result<(), StoreError>;

    /// Ledger for the latest revision cycle with any claims.
    async fn ledger(&self, session_id: &str) -> Result<LedgerView, StoreError>;

    async fn set_progress(&self, record: &ProgressRecord) -> Result<(), StoreError>;

    async fn get_progress(&self, session_id: &str) -> Result<ProgressRecord, StoreError>;
}

/// Workspace-membership predicate guarding every API operation.
#[async_trait]
pub trait Membership: Send + Sync {
    async fn is_member(&self, user_id: &str, workspace_id: &str) -> bool;
}

/// Fixed membership table, for tests and single-tenant deployments.
#[derive(Debug, Default)]
pub struct StaticMembership {
    members: FxHashMap<String, Vec<String>>,
}

impl StaticMembership {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_member(mut self, workspace_id: &str, user_id: &str) -> Self {
        self.members
            .entry(workspace_id.to_string())
            .or_default()
            .push(user_id.to_string());
        self
    }
}

#[async_trait]
impl Membership for StaticMembership {
    async fn is_member(&self, user_id: &str, workspace_id: &str) -> bool {
        self.members
            .get(workspace_id)
            .is_some_and(|users| users.iter().any(|u| u == user_id))
    }
}
