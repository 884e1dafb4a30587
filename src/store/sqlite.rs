//! SQLite-backed session store.
//!
//! Durable storage for sessions, per-cycle claim/evidence/conflict
//! ledgers, and the single progress row per session. Embedded migrations
//! (`./migrations`) run on connect. Pure serialization stays out of the
//! query layer: JSON columns go through `serde_json`, timestamps are
//! RFC 3339 text.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool, sqlite::SqliteRow};
use tracing::instrument;

use super::{
    LedgerView, NewSession, QueryMode, SessionPatch, SessionRecord, SessionStatus, SessionStore,
    StoreError,
};
use crate::ledger::{
    Claim, ClaimType, Conflict, EvidenceEntry, Importance, SourceTag, Verdict,
};
use crate::progress::{Phase, PhaseStatus, ProgressRecord};

/// SQLite-backed [`SessionStore`].
///
/// Storage grows with `(sessions × revision cycles × claims)`; completed
/// sessions can be pruned with plain SQL on `created_at`.
pub struct SqliteStore {
    pool: Arc<SqlitePool>,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore").finish()
    }
}

impl SqliteStore {
    /// Connect (or create) a SQLite database at `database_url` and run
    /// pending migrations. Example URL: `sqlite://veriweave.db`.
    #[instrument(skip(database_url))]
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        // Ensure the underlying file exists; SqlitePool does not create it.
        if let Some(path) = database_url.strip_prefix("sqlite://") {
            let path = path.trim();
            if !path.is_empty() && path != ":memory:" {
                let p = std::path::Path::new(path);
                if let Some(parent) = p.parent() {
                    let _ = std::fs::create_dir_all(parent);
                }
                if !p.exists() {
                    let _ = std::fs::File::create_new(p);
                }
            }
        }

        let pool = SqlitePool::connect(database_url).await?;
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| StoreError::Backend {
                message: e.to_string(),
            })?;
        Ok(Self {
            pool: Arc::new(pool),
        })
    }

    async fn latest_cycle(&self, session_id: &str) -> Result<Option<u32>, StoreError> {
        let row = sqlx::query("SELECT MAX(revision_cycle) AS cycle FROM claims WHERE session_id = ?")
            .bind(session_id)
            .fetch_one(&*self.pool)
            .await?;
        let cycle: Option<i64> = row.try_get("cycle")?;
        Ok(cycle.map(|c| c as u32))
    }
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Backend {
            message: format!("invalid stored timestamp: {e}"),
        })
}

fn decode_session(row: &SqliteRow) -> Result<SessionRecord, StoreError> {
    let created_at: String = row.try_get("created_at")?;
    let completed_at: Option<String> = row.try_get("completed_at")?;
    let status: String = row.try_get("status")?;
    let mode: String = row.try_get("mode")?;
    Ok(SessionRecord {
        session_id: row.try_get("id")?,
        workspace_id: row.try_get("workspace_id")?,
        user_id: row.try_get("user_id")?,
        query: row.try_get("query")?,
        mode: QueryMode::from_loose(&mode),
        status: SessionStatus::from_loose(&status),
        response: row.try_get("response")?,
        evidence_coverage: row.try_get("evidence_coverage")?,
        unsupported_claim_count: row.try_get::<i64, _>("unsupported_claim_count")? as u32,
        revision_cycles: row.try_get::<i64, _>("revision_cycles")? as u32,
        processing_time_ms: row.try_get::<i64, _>("processing_time_ms")? as u64,
        error_message: row.try_get("error_message")?,
        created_at: parse_timestamp(&created_at)?,
        completed_at: completed_at.as_deref().map(parse_timestamp).transpose()?,
    })
}

fn decode_claim(row: &SqliteRow) -> Result<Claim, StoreError> {
    let claim_type: String = row.try_get("claim_type")?;
    let importance: String = row.try_get("importance")?;
    Ok(Claim {
        claim_id: row.try_get("claim_id")?,
        claim_text: row.try_get("claim_text")?,
        claim_type: ClaimType::from_loose(&claim_type),
        importance: Importance::from_loose(&importance),
        requires_citation: row.try_get::<i64, _>("requires_citation")? != 0,
    })
}

fn decode_evidence(row: &SqliteRow) -> Result<EvidenceEntry, StoreError> {
    let source_tag: String = row.try_get("source_tag")?;
    let verdict: String = row.try_get("verdict")?;
    let chunk_ids: String = row.try_get("chunk_ids")?;
    Ok(EvidenceEntry {
        claim_id: row.try_get("claim_id")?,
        source_tag: SourceTag::from_loose(&source_tag),
        verdict: Verdict::from_loose(&verdict),
        confidence_score: row.try_get("confidence_score")?,
        chunk_ids: serde_json::from_str(&chunk_ids)?,
        evidence_snippet: row.try_get("evidence_snippet")?,
        expert_assessment: row.try_get("expert_assessment")?,
        notes: row.try_get("notes")?,
    })
}

fn decode_conflict(row: &SqliteRow) -> Result<Conflict, StoreError> {
    Ok(Conflict {
        claim_text: row.try_get("claim_text")?,
        domain: row.try_get("domain")?,
        comparison: row.try_get("comparison")?,
    })
}

#[async_trait]
impl SessionStore for SqliteStore {
    #[instrument(skip(self, session), fields(session_id = %session.session_id))]
    async fn create_session(&self, session: NewSession) -> Result<(), StoreError> {
        let record = SessionRecord::from_new(&session);
        sqlx::query(
            "INSERT INTO sessions (id, workspace_id, user_id, query, mode, status, \
             evidence_coverage, unsupported_claim_count, revision_cycles, \
             processing_time_ms, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, 0, 0, 0, 0, ?)",
        )
        .bind(&record.session_id)
        .bind(&record.workspace_id)
        .bind(&record.user_id)
        .bind(&record.query)
        .bind(record.mode.as_str())
        .bind(record.status.as_str())
        .bind(record.created_at.to_rfc3339())
        .execute(&*self.pool)
        .await?;
        Ok(())
    }

    async fn get_session(&self, session_id: &str) -> Result<SessionRecord, StoreError> {
        let row = sqlx::query("SELECT * FROM sessions WHERE id = ?")
            .bind(session_id)
            .fetch_optional(&*self.pool)
            .await?
            .ok_or_else(|| StoreError::NotFound {
                session_id: session_id.to_string(),
            })?;
        decode_session(&row)
    }

    #[instrument(skip(self, patch))]
    async fn patch_session(
        &self,
        session_id: &str,
        patch: SessionPatch,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query("SELECT status FROM sessions WHERE id = ?")
            .bind(session_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| StoreError::NotFound {
                session_id: session_id.to_string(),
            })?;
        let current = SessionStatus::from_loose(&row.try_get::<String, _>("status")?);

        if let Some(next) = patch.status {
            if !current.can_transition_to(next) {
                return Err(StoreError::InvalidTransition {
                    session_id: session_id.to_string(),
                    from: current.as_str(),
                    to: next.as_str(),
                });
            }
        }

        sqlx::query(
            "UPDATE sessions SET \
             status = COALESCE(?, status), \
             response = COALESCE(?, response), \
             evidence_coverage = COALESCE(?, evidence_coverage), \
             unsupported_claim_count = COALESCE(?, unsupported_claim_count), \
             revision_cycles = COALESCE(?, revision_cycles), \
             processing_time_ms = COALESCE(?, processing_time_ms), \
             error_message = COALESCE(?, error_message), \
             completed_at = COALESCE(?, completed_at) \
             WHERE id = ?",
        )
        .bind(patch.status.map(SessionStatus::as_str))
        .bind(patch.response)
        .bind(patch.evidence_coverage)
        .bind(patch.unsupported_claim_count.map(i64::from))
        .bind(patch.revision_cycles.map(i64::from))
        .bind(patch.processing_time_ms.map(|v| v as i64))
        .bind(patch.error_message)
        .bind(patch.completed_at.map(|at| at.to_rfc3339()))
        .bind(session_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn insert_claim(
        &self,
        session_id: &str,
        revision_cycle: u32,
        claim: &Claim,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO claims (id, claim_id, session_id, revision_cycle, claim_text, \
             claim_type, importance, requires_citation, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(&claim.claim_id)
        .bind(session_id)
        .bind(i64::from(revision_cycle))
        .bind(&claim.claim_text)
        .bind(claim.claim_type.as_str())
        .bind(claim.importance.as_str())
        .bind(i64::from(claim.requires_citation))
        .bind(Utc::now().to_rfc3339())
        .execute(&*self.pool)
        .await?;
        Ok(())
    }

    async fn insert_evidence(
        &self,
        session_id: &str,
        revision_cycle: u32,
        entry: &EvidenceEntry,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO evidence (id, claim_id, session_id, revision_cycle, source_tag, \
             verdict, confidence_score, chunk_ids, evidence_snippet, expert_assessment, notes) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(&entry.claim_id)
        .bind(session_id)
        .bind(i64::from(revision_cycle))
        .bind(entry.source_tag.encode())
        .bind(entry.verdict.as_str())
        .bind(entry.confidence_score)
        .bind(serde_json::to_string(&entry.chunk_ids)?)
        .bind(&entry.evidence_snippet)
        .bind(&entry.expert_assessment)
        .bind(&entry.notes)
        .execute(&*self.pool)
        .await?;
        Ok(())
    }

    async fn insert_conflict(
        &self,
        session_id: &str,
        revision_cycle: u32,
        conflict: &Conflict,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO conflicts (id, session_id, revision_cycle, claim_text, domain, \
             comparison) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(session_id)
        .bind(i64::from(revision_cycle))
        .bind(&conflict.claim_text)
        .bind(&conflict.domain)
        .bind(&conflict.comparison)
        .execute(&*self.pool)
        .await?;
        Ok(())
    }

    async fn ledger(&self, session_id: &str) -> Result<LedgerView, StoreError> {
        let Some(cycle) = self.latest_cycle(session_id).await? else {
            return Ok(LedgerView::default());
        };

        let claim_rows = sqlx::query(
            "SELECT * FROM claims WHERE session_id = ? AND revision_cycle = ? ORDER BY rowid",
        )
        .bind(session_id)
        .bind(i64::from(cycle))
        .fetch_all(&*self.pool)
        .await?;

        let evidence_rows = sqlx::query(
            "SELECT * FROM evidence WHERE session_id = ? AND revision_cycle = ? ORDER BY rowid",
        )
        .bind(session_id)
        .bind(i64::from(cycle))
        .fetch_all(&*self.pool)
        .await?;

        let conflict_rows = sqlx::query(
            "SELECT * FROM conflicts WHERE session_id = ? AND revision_cycle = ? ORDER BY rowid",
        )
        .bind(session_id)
        .bind(i64::from(cycle))
        .fetch_all(&*self.pool)
        .await?;

        Ok(LedgerView {
            revision_cycle: cycle,
            claims: claim_rows
                .iter()
                .map(decode_claim)
                .collect::<Result<_, _>>()?,
            evidence: evidence_rows
                .iter()
                .map(decode_evidence)
                .collect::<Result<_, _>>()?,
            conflicts: conflict_rows
                .iter()
                .map(decode_conflict)
                .collect::<Result<_, _>>()?,
        })
    }

    async fn set_progress(&self, record: &ProgressRecord) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO progress (session_id, phase, status, details, streamed_content, \
             updated_at) VALUES (?, ?, ?, ?, ?, ?) \
             ON CONFLICT (session_id) DO UPDATE SET \
             phase = excluded.phase, status = excluded.status, details = excluded.details, \
             streamed_content = excluded.streamed_content, updated_at = excluded.updated_at",
        )
        .bind(&record.session_id)
        .bind(record.phase.as_str())
        .bind(record.status.as_str())
        .bind(&record.details)
        .bind(&record.streamed_content)
        .bind(record.updated_at.to_rfc3339())
        .execute(&*self.pool)
        .await?;
        Ok(())
    }

    async fn get_progress(&self, session_id: &str) -> Result<ProgressRecord, StoreError> {
        let row = sqlx::query("SELECT * FROM progress WHERE session_id = ?")
            .bind(session_id)
            .fetch_optional(&*self.pool)
            .await?
            .ok_or_else(|| StoreError::ProgressNotFound {
                session_id: session_id.to_string(),
            })?;
        let phase: String = row.try_get("phase")?;
        let status: String = row.try_get("status")?;
        let updated_at: String = row.try_get("updated_at")?;
        Ok(ProgressRecord {
            session_id: row.try_get("session_id")?,
            phase: Phase::from_loose(&phase),
            status: PhaseStatus::from_loose(&status),
            details: row.try_get("details")?,
            streamed_content: row.try_get("streamed_content")?,
            updated_at: parse_timestamp(&updated_at)?,
        })
    }
}
