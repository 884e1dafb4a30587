//! Shared fakes for integration tests: a scripted chat model, a fixed
//! retriever, and a store wrapper that records every progress write.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use veriweave::cancel::CancelToken;
use veriweave::ledger::{Claim, Conflict, EvidenceEntry};
use veriweave::model::{ChatModel, CompletionRequest, ModelError, StreamFailure};
use veriweave::progress::{Phase, PhaseStatus, ProgressRecord};
use veriweave::retrieval::{Chunk, Retriever, RetrieverError};
use veriweave::store::{
    LedgerView, MemoryStore, NewSession, SessionPatch, SessionRecord, SessionStore, StoreError,
};

/// One scripted model reply, consumed in order across all agent calls.
#[derive(Clone, Debug)]
pub enum Reply {
    /// Full text; streamed calls chop it into small deltas.
    Text(String),
    /// HTTP-level failure.
    Fail(u16, String),
    /// Stream some deltas, then abort with an HTTP failure.
    StreamAbort(Vec<String>),
    /// Block until the session is cancelled.
    Hang,
}

/// Scripted [`ChatModel`]; pops one [`Reply`] per call.
pub struct FakeModel {
    replies: Mutex<VecDeque<Reply>>,
}

impl FakeModel {
    pub fn scripted(replies: Vec<Reply>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
        })
    }

    fn next_reply(&self) -> Reply {
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Reply::Fail(500, "script exhausted".to_string()))
    }
}

#[async_trait]
impl ChatModel for FakeModel {
    async fn complete(
        &self,
        _request: CompletionRequest,
        mut cancel: CancelToken,
    ) -> Result<String, ModelError> {
        match self.next_reply() {
            Reply::Text(text) => Ok(text),
            Reply::Fail(status, body) => Err(ModelError::Status { status, body }),
            Reply::StreamAbort(deltas) => Err(ModelError::Status {
                status: 502,
                body: deltas.concat(),
            }),
            Reply::Hang => {
                cancel.cancelled().await;
                Err(ModelError::Cancelled)
            }
        }
    }

    async fn complete_stream(
        &self,
        _request: CompletionRequest,
        mut cancel: CancelToken,
        deltas: flume::Sender<String>,
    ) -> Result<String, StreamFailure> {
        match self.next_reply() {
            Reply::Text(text) => {
                let mut full = String::new();
                for piece in chop(&text) {
                    full.push_str(&piece);
                    let _ = deltas.send(piece);
                }
                Ok(full)
            }
            Reply::Fail(status, body) => Err(StreamFailure {
                source: ModelError::Status { status, body },
                partial: String::new(),
            }),
            Reply::StreamAbort(pieces) => {
                let mut partial = String::new();
                for piece in pieces {
                    partial.push_str(&piece);
                    let _ = deltas.send(piece);
                }
                Err(StreamFailure {
                    source: ModelError::Status {
                        status: 502,
                        body: "upstream reset mid-stream".to_string(),
                    },
                    partial,
                })
            }
            Reply::Hang => {
                cancel.cancelled().await;
                Err(StreamFailure {
                    source: ModelError::Cancelled,
                    partial: String::new(),
                })
            }
        }
    }
}

fn chop(text: &str) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(4)
        .map(|chunk| chunk.iter().collect())
        .collect()
}

/// Retriever returning a fixed chunk list for every search.
pub struct FixedRetriever {
    chunks: Vec<Chunk>,
}

impl FixedRetriever {
    pub fn with_chunks(chunks: Vec<Chunk>) -> Arc<Self> {
        Arc::new(Self { chunks })
    }

    pub fn empty() -> Arc<Self> {
        Arc::new(Self { chunks: vec![] })
    }
}

#[async_trait]
impl Retriever for FixedRetriever {
    async fn search(
        &self,
        _workspace_id: &str,
        _query: &str,
        _threshold: f64,
        _limit: usize,
    ) -> Result<Vec<Chunk>, RetrieverError> {
        Ok(self.chunks.clone())
    }
}

pub fn chunk(id: &str, content: &str, file: &str) -> Chunk {
    Chunk {
        chunk_id: id.to_string(),
        content: content.to_string(),
        document_filename: Some(file.to_string()),
        score: 0.9,
    }
}

/// Store wrapper recording the order of progress writes per session.
pub struct RecordingStore {
    inner: MemoryStore,
    trace: Mutex<Vec<(Phase, PhaseStatus)>>,
}

impl RecordingStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: MemoryStore::new(),
            trace: Mutex::new(Vec::new()),
        })
    }

    pub fn progress_trace(&self) -> Vec<(Phase, PhaseStatus)> {
        self.trace.lock().unwrap().clone()
    }
}

#[async_trait]
impl SessionStore for RecordingStore {
    async fn create_session(&self, session: NewSession) -> Result<(), StoreError> {
        self.inner.create_session(session).await
    }

    async fn get_session(&self, session_id: &str) -> Result<SessionRecord, StoreError> {
        self.inner.get_session(session_id).await
    }

    async fn patch_session(
        &self,
        session_id: &str,
        patch: SessionPatch,
    ) -> Result<(), StoreError> {
        self.inner.patch_session(session_id, patch).await
    }

    async fn insert_claim(
        &self,
        session_id: &str,
        revision_cycle: u32,
        claim: &Claim,
    ) -> Result<(), StoreError> {
        self.inner.insert_claim(session_id, revision_cycle, claim).await
    }

    async fn insert_evidence(
        &self,
        session_id: &str,
        revision_cycle: u32,
        entry: &EvidenceEntry,
    ) -> Result<(), StoreError> {
        self.inner
            .insert_evidence(session_id, revision_cycle, entry)
            .await
    }

    async fn insert_conflict(
        &self,
        session_id: &str,
        revision_cycle: u32,
        conflict: &Conflict,
    ) -> Result<(), StoreError> {
        self.inner
            .insert_conflict(session_id, revision_cycle, conflict)
            .await
    }

    async fn ledger(&self, session_id: &str) -> Result<LedgerView, StoreError> {
        self.inner.ledger(session_id).await
    }

    async fn set_progress(&self, record: &ProgressRecord) -> Result<(), StoreError> {
        self.trace
            .lock()
            .unwrap()
            .push((record.phase, record.status));
        self.inner.set_progress(record).await
    }

    async fn get_progress(&self, session_id: &str) -> Result<ProgressRecord, StoreError> {
        self.inner.get_progress(session_id).await
    }
}

/// A judge payload with uniform verdict over `supported` supported and
/// `unsupported` not_found claims, all material importance.
///
/// Claim ids are stable (`s-0`, `u-0`, ...): a real Judge plausibly
/// reuses the same id for the same claim on every revision pass, and
/// the stores must tolerate that.
pub fn judge_json(verified_response: &str, supported: usize, unsupported: usize) -> String {
    let mut claims = Vec::new();
    for i in 0..supported {
        claims.push(format!(
            r#"{{"claimId": "s-{i}", "claimText": "supported claim {i}", "claimType": "fact",
                "importance": "material", "sourceTag": "cite:1", "verdict": "supported",
                "confidenceScore": 0.9, "chunkIds": ["1"]}}"#
        ));
    }
    for i in 0..unsupported {
        claims.push(format!(
            r#"{{"claimId": "u-{i}", "claimText": "unsupported claim {i}", "claimType": "fact",
                "importance": "material", "sourceTag": "missing", "verdict": "not_found",
                "confidenceScore": 0.2, "chunkIds": []}}"#
        ));
    }
    format!(
        r#"{{"verifiedResponse": "{verified_response}", "claims": [{}],
            "conflicts": [], "expertAdditions": [], "riskFlags": []}}"#,
        claims.join(",")
    )
}
