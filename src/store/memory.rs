//! Volatile in-process store. Fast, non-durable; suitable for tests and
//! ephemeral runs.

use std::sync::RwLock;

use async_trait::async_trait;
use rustc_hash::FxHashMap;

use super::{
    LedgerView, NewSession, SessionPatch, SessionRecord, SessionStore, StoreError,
};
use crate::ledger::{Claim, Conflict, EvidenceEntry};
use crate::progress::ProgressRecord;

#[derive(Default)]
struct LedgerRows {
    claims: Vec<(u32, Claim)>,
    evidence: Vec<(u32, EvidenceEntry)>,
    conflicts: Vec<(u32, Conflict)>,
}

/// In-memory [`SessionStore`] backed by `RwLock`ed maps.
#[derive(Default)]
pub struct MemoryStore {
    sessions: RwLock<FxHashMap<String, SessionRecord>>,
    ledgers: RwLock<FxHashMap<String, LedgerRows>>,
    progress: RwLock<FxHashMap<String, ProgressRecord>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_err(what: &str) -> StoreError {
        StoreError::Backend {
            message: format!("lock poisoned: {what}"),
        }
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn create_session(&self, session: NewSession) -> Result<(), StoreError> {
        let mut sessions = self
            .sessions
            .write()
            .map_err(|_| Self::lock_err("sessions"))?;
        sessions.insert(
            session.session_id.clone(),
            SessionRecord::from_new(&session),
        );
        Ok(())
    }

    async fn get_session(&self, session_id: &str) -> Result<SessionRecord, StoreError> {
        let sessions = self
            .sessions
            .read()
            .map_err(|_| Self::lock_err("sessions"))?;
        sessions
            .get(session_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                session_id: session_id.to_string(),
            })
    }

    async fn patch_session(
        &self,
        session_id: &str,
        patch: SessionPatch,
    ) -> Result<(), StoreError> {
        let mut sessions = self
            .sessions
            .write()
            .map_err(|_| Self::lock_err("sessions"))?;
        let record = sessions
            .get_mut(session_id)
            .ok_or_else(|| StoreError::NotFound {
                session_id: session_id.to_string(),
            })?;

        if let Some(next) = patch.status {
            if !record.status.can_transition_to(next) {
                return Err(StoreError::InvalidTransition {
                    session_id: session_id.to_string(),
                    from: record.status.as_str(),
                    to: next.as_str(),
                });
            }
            record.status = next;
        }
        if let Some(response) = patch.response {
            record.response = Some(response);
        }
        if let Some(coverage) = patch.evidence_coverage {
            record.evidence_coverage = coverage;
        }
        if let Some(count) = patch.unsupported_claim_count {
            record.unsupported_claim_count = count;
        }
        if let Some(cycles) = patch.revision_cycles {
            record.revision_cycles = cycles;
        }
        if let Some(elapsed) = patch.processing_time_ms {
            record.processing_time_ms = elapsed;
        }
        if let Some(message) = patch.error_message {
            record.error_message = Some(message);
        }
        if let Some(at) = patch.completed_at {
            record.completed_at = Some(at);
        }
        Ok(())
    }

    async fn insert_claim(
        &self,
        session_id: &str,
        revision_cycle: u32,
        claim: &Claim,
    ) -> Result<(), StoreError> {
        let mut ledgers = self.ledgers.write().map_err(|_| Self::lock_err("ledgers"))?;
        ledgers
            .entry(session_id.to_string())
            .or_default()
            .claims
            .push((revision_cycle, claim.clone()));
        Ok(())
    }

    async fn insert_evidence(
        &self,
        session_id: &str,
        revision_cycle: u32,
        entry: &EvidenceEntry,
    ) -> Result<(), StoreError> {
        let mut ledgers = self.ledgers.write().map_err(|_| Self::lock_err("ledgers"))?;
        ledgers
            .entry(session_id.to_string())
            .or_default()
            .evidence
            .push((revision_cycle, entry.clone()));
        Ok(())
    }

    async fn insert_conflict(
        &self,
        session_id: &str,
        revision_cycle: u32,
        conflict: &Conflict,
    ) -> Result<(), StoreError> {
        let mut ledgers = self.ledgers.write().map_err(|_| Self::lock_err("ledgers"))?;
        ledgers
            .entry(session_id.to_string())
            .or_default()
            .conflicts
            .push((revision_cycle, conflict.clone()));
        Ok(())
    }

    async fn ledger(&self, session_id: &str) -> Result<LedgerView, StoreError> {
        let ledgers = self.ledgers.read().map_err(|_| Self::lock_err("ledgers"))?;
        let Some(rows) = ledgers.get(session_id) else {
            return Ok(LedgerView::default());
        };
        let latest = rows
            .claims
            .iter()
            .map(|(cycle, _)| *cycle)
            .max()
            .unwrap_or(0);
        Ok(LedgerView {
            revision_cycle: latest,
            claims: rows
                .claims
                .iter()
                .filter(|(cycle, _)| *cycle == latest)
                .map(|(_, c)| c.clone())
                .collect(),
            evidence: rows
                .evidence
                .iter()
                .filter(|(cycle, _)| *cycle == latest)
                .map(|(_, e)| e.clone())
                .collect(),
            conflicts: rows
                .conflicts
                .iter()
                .filter(|(cycle, _)| *cycle == latest)
                .map(|(_, c)| c.clone())
                .collect(),
        })
    }

    async fn set_progress(&self, record: &ProgressRecord) -> Result<(), StoreError> {
        let mut progress = self
            .progress
            .write()
            .map_err(|_| Self::lock_err("progress"))?;
        progress.insert(record.session_id.clone(), record.clone());
        Ok(())
    }

    async fn get_progress(&self, session_id: &str) -> Result<ProgressRecord, StoreError> {
        let progress = self
            .progress
            .read()
            .map_err(|_| Self::lock_err("progress"))?;
        progress
            .get(session_id)
            .cloned()
            .ok_or_else(|| StoreError::ProgressNotFound {
                session_id: session_id.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{ClaimType, Importance, SourceTag, Verdict};
    use crate::store::{QueryMode, SessionStatus};

    fn new_session(id: &str) -> NewSession {
        NewSession {
            session_id: id.to_string(),
            workspace_id: "w1".to_string(),
            user_id: "u1".to_string(),
            query: "what changed?".to_string(),
            mode: QueryMode::Answer,
        }
    }

    fn claim(id: &str, text: &str) -> Claim {
        Claim {
            claim_id: id.to_string(),
            claim_text: text.to_string(),
            claim_type: ClaimType::Fact,
            importance: Importance::Material,
            requires_citation: true,
        }
    }

    fn evidence(claim_id: &str, verdict: Verdict) -> EvidenceEntry {
        EvidenceEntry {
            claim_id: claim_id.to_string(),
            source_tag: SourceTag::Cite(1),
            verdict,
            confidence_score: 0.8,
            chunk_ids: vec!["1".to_string()],
            evidence_snippet: None,
            expert_assessment: None,
            notes: None,
        }
    }

    #[tokio::test]
    async fn create_and_get_roundtrip() {
        let store = MemoryStore::new();
        store.create_session(new_session("s1")).await.unwrap();
        let record = store.get_session("s1").await.unwrap();
        assert_eq!(record.status, SessionStatus::Processing);
        assert_eq!(record.workspace_id, "w1");
        assert!(record.response.is_none());
    }

    #[tokio::test]
    async fn terminal_status_rejects_further_transitions() {
        let store = MemoryStore::new();
        store.create_session(new_session("s1")).await.unwrap();
        store
            .patch_session("s1", SessionPatch::completed("done".into(), 0.9, 0, 0, 10))
            .await
            .unwrap();
        let err = store
            .patch_session("s1", SessionPatch::failed("late".into(), 20))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransition { .. }));
        let record = store.get_session("s1").await.unwrap();
        assert_eq!(record.status, SessionStatus::Completed);
        assert_eq!(record.response.as_deref(), Some("done"));
    }

    #[tokio::test]
    async fn ledger_returns_latest_cycle_only() {
        let store = MemoryStore::new();
        store.create_session(new_session("s1")).await.unwrap();

        store
            .insert_claim("s1", 0, &claim("c0", "cycle zero"))
            .await
            .unwrap();
        store
            .insert_evidence("s1", 0, &evidence("c0", Verdict::NotFound))
            .await
            .unwrap();

        store
            .insert_claim("s1", 1, &claim("c1", "cycle one"))
            .await
            .unwrap();
        store
            .insert_evidence("s1", 1, &evidence("c1", Verdict::Supported))
            .await
            .unwrap();

        let ledger = store.ledger("s1").await.unwrap();
        assert_eq!(ledger.revision_cycle, 1);
        assert_eq!(ledger.claims.len(), 1);
        assert_eq!(ledger.claims[0].claim_text, "cycle one");
        assert_eq!(ledger.evidence[0].verdict, Verdict::Supported);
    }

    #[tokio::test]
    async fn missing_session_is_not_found() {
        let store = MemoryStore::new();
        let err = store.get_session("nope").await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }
}
