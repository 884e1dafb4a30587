//! Phase sequencer and revision controller for one session.
//!
//! A session is a single logical thread of control: phases run strictly
//! in order, each phase's persistence commits before the next phase
//! starts, and every external call takes a cancellation token derived
//! from the session. Terminal failures funnel into
//! `PatchSession(status = error)` plus a matching progress record; Judge
//! parse failures are recovered locally and never terminate the session.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use tracing::{debug, instrument, warn};

use crate::cancel::{CancelHandle, CancelToken};
use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::ledger::{JudgeResult, parse::parse_judge_output};
use crate::message::ChatMessage;
use crate::model::{ChatModel, CompletionRequest, ModelError, StreamFailure};
use crate::pipeline::gates::{self, GateDecision};
use crate::progress::{Phase, PhaseStatus, ProgressChannel};
use crate::prompts;
use crate::retrieval::{Retriever, build_context};
use crate::store::{QueryMode, SessionPatch, SessionStore, StoreError};

/// Canned response when retrieval returns zero chunks.
pub const NO_RELEVANT_DOCUMENTS_RESPONSE: &str = "I couldn't find any relevant documents in your \
     knowledge base to answer this query. Please upload relevant documents first.";

/// Inputs for one pipeline run; the session row already exists.
#[derive(Clone, Debug)]
pub struct SessionRequest {
    pub session_id: String,
    pub workspace_id: String,
    pub query: String,
    pub mode: QueryMode,
    pub history: Vec<ChatMessage>,
}

/// A terminal failure plus the phase it happened in, for the progress
/// record.
struct PhaseFailure {
    phase: Phase,
    error: PipelineError,
}

fn fail_at<E: Into<PipelineError>>(phase: Phase) -> impl FnOnce(E) -> PhaseFailure {
    move |error| PhaseFailure {
        phase,
        error: error.into(),
    }
}

fn stream_failure_error(failure: StreamFailure) -> PipelineError {
    debug!(
        partial_len = failure.partial.len(),
        "discarding partial streamed content after failure"
    );
    if matches!(failure.source, ModelError::Cancelled) {
        PipelineError::Cancelled
    } else {
        PipelineError::Model(failure.source)
    }
}

/// Phase sequencer, revision controller, quality-gate evaluator, and
/// error funnel for sessions.
pub struct Orchestrator {
    config: Arc<PipelineConfig>,
    model: Arc<dyn ChatModel>,
    retriever: Arc<dyn Retriever>,
    store: Arc<dyn SessionStore>,
    progress: Arc<ProgressChannel>,
}

impl Orchestrator {
    #[must_use]
    pub fn new(
        config: Arc<PipelineConfig>,
        model: Arc<dyn ChatModel>,
        retriever: Arc<dyn Retriever>,
        store: Arc<dyn SessionStore>,
        progress: Arc<ProgressChannel>,
    ) -> Self {
        Self {
            config,
            model,
            retriever,
            store,
            progress,
        }
    }

    /// Run one session to completion, funneling every terminal failure
    /// into the session row and progress record. Never panics the task.
    #[instrument(skip(self, request, cancel), fields(session_id = %request.session_id))]
    pub async fn run_session(&self, request: SessionRequest, cancel: CancelHandle) {
        let started = Instant::now();
        let current_phase = Arc::new(Mutex::new(Phase::Retrieval));

        let outcome = tokio::time::timeout(
            self.config.session_timeout,
            self.execute(&request, cancel.token(), started, Arc::clone(&current_phase)),
        )
        .await;

        let failure = match outcome {
            Ok(Ok(())) => return,
            Ok(Err(failure)) => failure,
            Err(_) => {
                // Reap any in-flight model stream before finalizing.
                cancel.cancel();
                PhaseFailure {
                    phase: *current_phase.lock().unwrap_or_else(|e| e.into_inner()),
                    error: PipelineError::TimedOut {
                        seconds: self.config.session_timeout.as_secs(),
                    },
                }
            }
        };

        self.finalize_error(&request.session_id, failure, started)
            .await;
    }

    async fn execute(
        &self,
        request: &SessionRequest,
        cancel: CancelToken,
        started: Instant,
        current_phase: Arc<Mutex<Phase>>,
    ) -> Result<(), PhaseFailure> {
        let session_id = request.session_id.as_str();
        let enter_phase = |phase: Phase| {
            *current_phase.lock().unwrap_or_else(|e| e.into_inner()) = phase;
        };

        // Retrieval.
        enter_phase(Phase::Retrieval);
        self.progress
            .phase(session_id, Phase::Retrieval, PhaseStatus::InProgress)
            .await
            .map_err(fail_at(Phase::Retrieval))?;
        let chunks = self
            .retriever
            .search(
                &request.workspace_id,
                &request.query,
                self.config.retrieval_threshold,
                self.config.retrieval_limit,
            )
            .await
            .map_err(fail_at(Phase::Retrieval))?;
        self.progress
            .phase(session_id, Phase::Retrieval, PhaseStatus::Completed)
            .await
            .map_err(fail_at(Phase::Retrieval))?;

        if chunks.is_empty() {
            let patch = SessionPatch::completed(
                NO_RELEVANT_DOCUMENTS_RESPONSE.to_string(),
                0.0,
                0,
                0,
                elapsed_ms(started),
            );
            self.store
                .patch_session(session_id, patch)
                .await
                .map_err(fail_at(Phase::Retrieval))?;
            return Ok(());
        }

        let context = build_context(&chunks);

        // Writer, streaming with throttled progress updates.
        enter_phase(Phase::Writer);
        if cancel.is_cancelled() {
            return Err(fail_at(Phase::Writer)(PipelineError::Cancelled));
        }
        let mut writer_text = self
            .writer_phase(request, &context, cancel.clone())
            .await?;

        // Skeptic, buffered; the report stays in memory only.
        enter_phase(Phase::Skeptic);
        if cancel.is_cancelled() {
            return Err(fail_at(Phase::Skeptic)(PipelineError::Cancelled));
        }
        self.progress
            .phase(session_id, Phase::Skeptic, PhaseStatus::InProgress)
            .await
            .map_err(fail_at(Phase::Skeptic))?;
        let skeptic_request =
            CompletionRequest::new(&self.config.skeptic_model, prompts::skeptic_system_prompt())
                .with_messages(vec![ChatMessage::user(&prompts::skeptic_user_message(
                    &context,
                    &writer_text,
                ))])
                .with_temperature(0.3);
        let skeptic_report = self
            .model
            .complete(skeptic_request, cancel.clone())
            .await
            .map_err(fail_at(Phase::Skeptic))?;
        self.progress
            .phase(session_id, Phase::Skeptic, PhaseStatus::Completed)
            .await
            .map_err(fail_at(Phase::Skeptic))?;

        // Judge and the bounded revision loop.
        let mut cycle: u32 = 0;
        loop {
            enter_phase(Phase::Judge);
            if cancel.is_cancelled() {
                return Err(fail_at(Phase::Judge)(PipelineError::Cancelled));
            }
            let judge = self
                .judge_phase(session_id, &context, &writer_text, &skeptic_report, cycle, &cancel)
                .await?;

            let decision = gates::evaluate(&judge, cycle, &self.config);
            let response = judge
                .verified_response
                .clone()
                .unwrap_or_else(|| writer_text.clone());

            if !decision.revise || cycle >= self.config.max_revision_cycles {
                // Gates passed, or the revision budget is exhausted; the
                // last accepted response is persisted either way.
                self.complete_session(session_id, response, &decision, cycle, started)
                    .await
                    .map_err(fail_at(Phase::Judge))?;
                return Ok(());
            }

            enter_phase(Phase::Revision);
            writer_text = self
                .revision_phase(session_id, &context, &response, &judge, &decision, &cancel)
                .await?;
            cycle += 1;
        }
    }

    async fn writer_phase(
        &self,
        request: &SessionRequest,
        context: &str,
        cancel: CancelToken,
    ) -> Result<String, PhaseFailure> {
        let session_id = request.session_id.as_str();
        self.progress
            .phase(session_id, Phase::Writer, PhaseStatus::InProgress)
            .await
            .map_err(fail_at(Phase::Writer))?;

        let completion =
            CompletionRequest::new(&self.config.writer_model, prompts::writer_system_prompt(request.mode))
                .with_messages(prompts::writer_messages(
                    context,
                    &request.query,
                    &request.history,
                    self.config.history_message_cap,
                ))
                .with_temperature(0.3);

        let (tx, rx) = flume::unbounded();
        let model = Arc::clone(&self.model);
        let stream_cancel = cancel.clone();
        let handle =
            tokio::spawn(async move { model.complete_stream(completion, stream_cancel, tx).await });

        let mut stream = self.progress.start_stream(session_id, Phase::Writer);
        while let Ok(delta) = rx.recv_async().await {
            stream
                .push_delta(&delta)
                .await
                .map_err(fail_at(Phase::Writer))?;
        }

        let outcome = handle.await.map_err(|e| PhaseFailure {
            phase: Phase::Writer,
            error: PipelineError::Internal {
                message: e.to_string(),
            },
        })?;

        match outcome {
            Ok(full) => {
                stream.finish().await.map_err(fail_at(Phase::Writer))?;
                Ok(full)
            }
            Err(failure) => Err(PhaseFailure {
                phase: Phase::Writer,
                error: stream_failure_error(failure),
            }),
        }
    }

    async fn judge_phase(
        &self,
        session_id: &str,
        context: &str,
        writer_text: &str,
        skeptic_report: &str,
        cycle: u32,
        cancel: &CancelToken,
    ) -> Result<JudgeResult, PhaseFailure> {
        self.progress
            .phase(session_id, Phase::Judge, PhaseStatus::InProgress)
            .await
            .map_err(fail_at(Phase::Judge))?;

        let judge_request =
            CompletionRequest::new(&self.config.judge_model, prompts::judge_system_prompt(cycle))
                .with_messages(vec![ChatMessage::user(&prompts::judge_user_message(
                    context,
                    writer_text,
                    skeptic_report,
                ))])
                .with_temperature(0.0)
                .with_json_response();

        let raw = self
            .model
            .complete(judge_request, cancel.clone())
            .await
            .map_err(fail_at(Phase::Judge))?;

        // Parse failures do not terminate the session; they surface as
        // risk flags on an empty ledger.
        let judge = parse_judge_output(&raw);
        for flag in &judge.risk_flags {
            warn!(
                session = %session_id,
                flag = %flag.flag_type,
                severity = %flag.severity.as_str(),
                "judge risk flag"
            );
        }

        self.persist_ledger(session_id, cycle, &judge)
            .await
            .map_err(fail_at(Phase::Judge))?;

        self.progress
            .phase(session_id, Phase::Judge, PhaseStatus::Completed)
            .await
            .map_err(fail_at(Phase::Judge))?;

        Ok(judge)
    }

    async fn revision_phase(
        &self,
        session_id: &str,
        context: &str,
        previous_response: &str,
        judge: &JudgeResult,
        decision: &GateDecision,
        cancel: &CancelToken,
    ) -> Result<String, PhaseFailure> {
        if cancel.is_cancelled() {
            return Err(fail_at(Phase::Revision)(PipelineError::Cancelled));
        }
        self.progress
            .phase(session_id, Phase::Revision, PhaseStatus::InProgress)
            .await
            .map_err(fail_at(Phase::Revision))?;

        // The most severe fired gate drives the revision emphasis.
        let system_prompt = match decision.primary() {
            Some(reason) => format!(
                "{}\n\n{}",
                prompts::revision_system_prompt(),
                reason.instruction()
            ),
            None => prompts::revision_system_prompt(),
        };

        let judge_json = judge.to_judge_json().to_string();
        let revision_request = CompletionRequest::new(&self.config.writer_model, system_prompt)
            .with_messages(vec![ChatMessage::user(&prompts::revision_user_message(
                context,
                previous_response,
                &judge_json,
            ))])
            .with_temperature(0.2);

        let revised = self
            .model
            .complete(revision_request, cancel.clone())
            .await
            .map_err(fail_at(Phase::Revision))?;

        self.progress
            .phase(session_id, Phase::Revision, PhaseStatus::Completed)
            .await
            .map_err(fail_at(Phase::Revision))?;

        Ok(revised)
    }

    async fn persist_ledger(
        &self,
        session_id: &str,
        cycle: u32,
        judge: &JudgeResult,
    ) -> Result<(), StoreError> {
        for claim in &judge.claims {
            self.store.insert_claim(session_id, cycle, claim).await?;
        }
        for entry in &judge.evidence {
            self.store.insert_evidence(session_id, cycle, entry).await?;
        }
        for conflict in &judge.conflicts {
            self.store
                .insert_conflict(session_id, cycle, conflict)
                .await?;
        }
        Ok(())
    }

    async fn complete_session(
        &self,
        session_id: &str,
        response: String,
        decision: &GateDecision,
        cycle: u32,
        started: Instant,
    ) -> Result<(), StoreError> {
        let patch = SessionPatch::completed(
            response,
            decision.metrics.evidence_coverage,
            decision.metrics.unsupported as u32,
            cycle,
            elapsed_ms(started),
        );
        self.store.patch_session(session_id, patch).await?;
        self.progress.forget(session_id);
        Ok(())
    }

    async fn finalize_error(&self, session_id: &str, failure: PhaseFailure, started: Instant) {
        let message = if failure.error.is_cancelled() {
            "cancelled".to_string()
        } else {
            failure.error.to_string()
        };

        let patch = SessionPatch::failed(message.clone(), elapsed_ms(started));
        if let Err(err) = self.store.patch_session(session_id, patch).await {
            warn!(session = %session_id, error = %err, "failed to persist error state");
        }
        self.progress.fail(session_id, failure.phase, &message).await;
        self.progress.forget(session_id);
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}
