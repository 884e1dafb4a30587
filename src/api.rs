//! Public entry point for queries.
//!
//! [`QueryService::start_query`] verifies membership, creates the session
//! row, seeds the progress record, schedules the pipeline as a detached
//! task, and returns the opaque session id immediately. Observers poll
//! [`QueryService::get_session`] and [`QueryService::get_progress`]; both
//! are pure reads, and `status` on the session is the sole truth source
//! for readiness.

use std::sync::{Arc, Mutex};

use miette::Diagnostic;
use rustc_hash::FxHashMap;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{instrument, warn};
use uuid::Uuid;

use crate::cancel::CancelHandle;
use crate::config::PipelineConfig;
use crate::message::ChatMessage;
use crate::model::ChatModel;
use crate::pipeline::{Orchestrator, SessionRequest};
use crate::progress::{Phase, PhaseStatus, ProgressChannel, ProgressRecord};
use crate::retrieval::Retriever;
use crate::store::{
    LedgerView, Membership, NewSession, QueryMode, SessionRecord, SessionStore, StoreError,
};

/// Failures surfaced to API callers.
#[derive(Debug, Error, Diagnostic)]
pub enum ApiError {
    /// The user is not a member of the workspace. No writes happened.
    #[error("user {user_id} is not a member of workspace {workspace_id}")]
    #[diagnostic(
        code(veriweave::api::forbidden),
        help("Workspace membership is required for every session operation.")
    )]
    Forbidden {
        user_id: String,
        workspace_id: String,
    },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Store(#[from] StoreError),
}

/// Query entry point plus observer reads for one process.
pub struct QueryService {
    config: Arc<PipelineConfig>,
    store: Arc<dyn SessionStore>,
    progress: Arc<ProgressChannel>,
    membership: Arc<dyn Membership>,
    orchestrator: Arc<Orchestrator>,
    running: Mutex<FxHashMap<String, CancelHandle>>,
    admission: Option<Arc<Semaphore>>,
}

impl QueryService {
    /// Wire a service from its collaborators. The progress channel is
    /// built here so the orchestrator and observers share one write path.
    #[must_use]
    pub fn new(
        config: Arc<PipelineConfig>,
        model: Arc<dyn ChatModel>,
        retriever: Arc<dyn Retriever>,
        store: Arc<dyn SessionStore>,
        membership: Arc<dyn Membership>,
    ) -> Arc<Self> {
        let progress = Arc::new(ProgressChannel::new(
            Arc::clone(&store),
            config.stream_update_every,
        ));
        let orchestrator = Arc::new(Orchestrator::new(
            Arc::clone(&config),
            model,
            retriever,
            Arc::clone(&store),
            Arc::clone(&progress),
        ));
        let admission = config
            .admission_limit
            .map(|limit| Arc::new(Semaphore::new(limit)));
        Arc::new(Self {
            config,
            store,
            progress,
            membership,
            orchestrator,
            running: Mutex::new(FxHashMap::default()),
            admission,
        })
    }

    /// Accept a query: verify membership, create the session, initialize
    /// progress to `(retrieval, pending)`, schedule the pipeline, and
    /// return the session id without waiting for any phase.
    #[instrument(skip(self, query, history), fields(workspace_id = %workspace_id))]
    pub async fn start_query(
        self: &Arc<Self>,
        workspace_id: &str,
        user_id: &str,
        query: &str,
        mode: QueryMode,
        history: Vec<ChatMessage>,
    ) -> Result<String, ApiError> {
        self.require_member(user_id, workspace_id).await?;

        let session_id = Uuid::new_v4().to_string();
        self.store
            .create_session(NewSession {
                session_id: session_id.clone(),
                workspace_id: workspace_id.to_string(),
                user_id: user_id.to_string(),
                query: query.to_string(),
                mode,
            })
            .await?;
        self.progress
            .publish(ProgressRecord::new(
                session_id.clone(),
                Phase::Retrieval,
                PhaseStatus::Pending,
            ))
            .await?;

        let cancel = CancelHandle::new();
        {
            let mut running = self.running.lock().unwrap_or_else(|e| e.into_inner());
            running.insert(session_id.clone(), cancel.clone());
        }

        let request = SessionRequest {
            session_id: session_id.clone(),
            workspace_id: workspace_id.to_string(),
            query: query.to_string(),
            mode,
            history,
        };
        let service = Arc::clone(self);
        tokio::spawn(async move {
            let _permit = match &service.admission {
                Some(semaphore) => match Arc::clone(semaphore).acquire_owned().await {
                    Ok(permit) => Some(permit),
                    Err(_) => {
                        warn!("admission semaphore closed; running unbounded");
                        None
                    }
                },
                None => None,
            };
            let session_id = request.session_id.clone();
            service.orchestrator.run_session(request, cancel).await;
            let mut running = service.running.lock().unwrap_or_else(|e| e.into_inner());
            running.remove(&session_id);
        });

        Ok(session_id)
    }

    /// Current session snapshot, including metrics and the final response
    /// once `status` is `completed`.
    pub async fn get_session(
        &self,
        user_id: &str,
        session_id: &str,
    ) -> Result<SessionRecord, ApiError> {
        let record = self.store.get_session(session_id).await?;
        self.require_member(user_id, &record.workspace_id).await?;
        Ok(record)
    }

    /// Current phase snapshot, including any partial streamed content.
    pub async fn get_progress(
        &self,
        user_id: &str,
        session_id: &str,
    ) -> Result<ProgressRecord, ApiError> {
        let record = self.store.get_session(session_id).await?;
        self.require_member(user_id, &record.workspace_id).await?;
        Ok(self.store.get_progress(session_id).await?)
    }

    /// Evidence ledger for the latest revision cycle.
    pub async fn get_ledger(
        &self,
        user_id: &str,
        session_id: &str,
    ) -> Result<LedgerView, ApiError> {
        let record = self.store.get_session(session_id).await?;
        self.require_member(user_id, &record.workspace_id).await?;
        Ok(self.store.ledger(session_id).await?)
    }

    /// Cancel a running session. Returns false when the session is not
    /// currently running (already finished or unknown).
    pub fn cancel(&self, session_id: &str) -> bool {
        let running = self.running.lock().unwrap_or_else(|e| e.into_inner());
        match running.get(session_id) {
            Some(handle) => {
                handle.cancel();
                true
            }
            None => false,
        }
    }

    /// Number of sessions currently running in this process.
    #[must_use]
    pub fn running_sessions(&self) -> usize {
        self.running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    /// The configuration this service was built with.
    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    async fn require_member(&self, user_id: &str, workspace_id: &str) -> Result<(), ApiError> {
        if self.membership.is_member(user_id, workspace_id).await {
            Ok(())
        } else {
            Err(ApiError::Forbidden {
                user_id: user_id.to_string(),
                workspace_id: workspace_id.to_string(),
            })
        }
    }
}
