//! Per-session progress channel.
//!
//! One current [`ProgressRecord`] per session is the source of truth for
//! polling observers. Writes are serialized per session and applied
//! last-write-wins; Writer token deltas are throttled so at most one
//! record write happens per N deltas, with a final write always carrying
//! the complete buffered content.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::store::{SessionStore, StoreError};

/// Pipeline phase being executed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Retrieval,
    Writer,
    Skeptic,
    Judge,
    Revision,
}

impl Phase {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Retrieval => "retrieval",
            Self::Writer => "writer",
            Self::Skeptic => "skeptic",
            Self::Judge => "judge",
            Self::Revision => "revision",
        }
    }

    #[must_use]
    pub fn from_loose(label: &str) -> Self {
        match label {
            "writer" => Self::Writer,
            "skeptic" => Self::Skeptic,
            "judge" => Self::Judge,
            "revision" => Self::Revision,
            _ => Self::Retrieval,
        }
    }
}

/// Status of the current phase.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    Pending,
    InProgress,
    Completed,
    Error,
}

impl PhaseStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }

    #[must_use]
    pub fn from_loose(label: &str) -> Self {
        match label {
            "in_progress" => Self::InProgress,
            "completed" => Self::Completed,
            "error" => Self::Error,
            _ => Self::Pending,
        }
    }
}

/// Single row per session, last-write-wins.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressRecord {
    pub session_id: String,
    pub phase: Phase,
    pub status: PhaseStatus,
    pub details: Option<String>,
    pub streamed_content: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl ProgressRecord {
    #[must_use]
    pub fn new(session_id: impl Into<String>, phase: Phase, status: PhaseStatus) -> Self {
        Self {
            session_id: session_id.into(),
            phase,
            status,
            details: None,
            streamed_content: None,
            updated_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    #[must_use]
    pub fn with_streamed_content(mut self, content: impl Into<String>) -> Self {
        self.streamed_content = Some(content.into());
        self
    }
}

/// Shared write path for progress updates.
///
/// Every write for a session goes through that session's async mutex, so
/// updates land in submission order and an observer can never read an
/// interleaving that regresses behind what it already saw.
pub struct ProgressChannel {
    store: Arc<dyn SessionStore>,
    update_every: usize,
    locks: Mutex<FxHashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl ProgressChannel {
    #[must_use]
    pub fn new(store: Arc<dyn SessionStore>, update_every: usize) -> Self {
        Self {
            store,
            update_every: update_every.max(1),
            locks: Mutex::new(FxHashMap::default()),
        }
    }

    fn session_lock(&self, session_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Overwrite the session's record atomically.
    pub async fn publish(&self, record: ProgressRecord) -> Result<(), StoreError> {
        let lock = self.session_lock(&record.session_id);
        let _guard = lock.lock().await;
        self.store.set_progress(&record).await
    }

    /// Mark a phase transition.
    pub async fn phase(
        &self,
        session_id: &str,
        phase: Phase,
        status: PhaseStatus,
    ) -> Result<(), StoreError> {
        self.publish(ProgressRecord::new(session_id, phase, status))
            .await
    }

    /// Transition to `status = error` with the failure message.
    pub async fn fail(&self, session_id: &str, phase: Phase, message: &str) {
        let record =
            ProgressRecord::new(session_id, phase, PhaseStatus::Error).with_details(message);
        if let Err(err) = self.publish(record).await {
            warn!(session = %session_id, error = %err, "failed to publish error progress");
        }
    }

    /// Begin a throttled streamed update for the Writer phase.
    #[must_use]
    pub fn start_stream(self: &Arc<Self>, session_id: &str, phase: Phase) -> StreamedUpdate {
        StreamedUpdate {
            channel: Arc::clone(self),
            session_id: session_id.to_string(),
            phase,
            buffered: String::new(),
            deltas_since_write: 0,
        }
    }

    /// Drop the per-session lock entry once a session is finished.
    pub fn forget(&self, session_id: &str) {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.remove(session_id);
    }
}

/// Accumulates streamed deltas and writes the buffered content through
/// the channel at most once every `update_every` deltas.
pub struct StreamedUpdate {
    channel: Arc<ProgressChannel>,
    session_id: String,
    phase: Phase,
    buffered: String,
    deltas_since_write: usize,
}

impl StreamedUpdate {
    /// Append one delta; flushes a progress write every Nth delta.
    pub async fn push_delta(&mut self, delta: &str) -> Result<(), StoreError> {
        self.buffered.push_str(delta);
        self.deltas_since_write += 1;
        if self.deltas_since_write >= self.channel.update_every {
            self.deltas_since_write = 0;
            self.write_snapshot(PhaseStatus::InProgress).await?;
        }
        Ok(())
    }

    /// Content buffered so far.
    #[must_use]
    pub fn buffered(&self) -> &str {
        &self.buffered
    }

    /// Final update carrying the complete buffered content.
    pub async fn finish(mut self) -> Result<String, StoreError> {
        self.write_snapshot(PhaseStatus::Completed).await?;
        Ok(std::mem::take(&mut self.buffered))
    }

    async fn write_snapshot(&self, status: PhaseStatus) -> Result<(), StoreError> {
        let record = ProgressRecord::new(self.session_id.clone(), self.phase, status)
            .with_streamed_content(self.buffered.clone());
        self.channel.publish(record).await
    }
}
