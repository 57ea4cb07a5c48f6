//! Evaluation dashboard controller.
//!
//! Owns the page state: the session it was opened with, the uploaded file
//! handles, and at most one running poll loop. The presentation layer reads
//! state only through [`Dashboard::subscribe`] / [`Dashboard::snapshot`].

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{info, warn};

use crate::api_client::ApiClient;
use crate::config::Config;
use crate::errors::{ClientError, ClientResult};
use crate::evaluate::{build_request, submit_evaluation};
use crate::models::upload::FileHandles;
use crate::poller::{EvaluationSnapshot, HttpJobSource, JobSource, Phase, PollHandle, Poller};
use crate::session::{KeyValueStore, Session, SessionStore};
use crate::upload::{upload_documents, DocumentFile};

/// Poll cadence and bound.
#[derive(Debug, Clone, Copy)]
pub struct PollSettings {
    pub interval: Duration,
    pub timeout: Duration,
}

impl From<&Config> for PollSettings {
    fn from(config: &Config) -> Self {
        Self {
            interval: config.poll_interval,
            timeout: config.poll_timeout,
        }
    }
}

pub struct Dashboard<S: KeyValueStore> {
    api: ApiClient,
    sessions: SessionStore<S>,
    session: Session,
    handles: Option<FileHandles>,
    poller: Poller,
    snapshots: Arc<watch::Sender<EvaluationSnapshot>>,
    active: Option<PollHandle>,
}

impl<S: KeyValueStore> Dashboard<S> {
    /// Opens the dashboard for the stored session.
    ///
    /// Returns `ClientError::SessionMissing` when token or tenant is absent;
    /// the caller must send the user to login instead.
    pub fn open(
        api: ApiClient,
        sessions: SessionStore<S>,
        settings: PollSettings,
    ) -> ClientResult<Self> {
        let session = sessions.require()?;
        let source: Arc<dyn JobSource> =
            Arc::new(HttpJobSource::new(api.clone(), session.clone()));
        let poller = Poller::new(source, settings.interval, settings.timeout);
        let (snapshots, _) = watch::channel(EvaluationSnapshot::default());

        info!(tenant_id = %session.tenant_id, "dashboard opened");
        Ok(Self {
            api,
            sessions,
            session,
            handles: None,
            poller,
            snapshots: Arc::new(snapshots),
            active: None,
        })
    }

    /// Swaps in a differently configured poller (fixed seed, other source).
    pub fn with_poller(mut self, poller: Poller) -> Self {
        self.poller = poller;
        self
    }

    pub fn snapshot(&self) -> EvaluationSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<EvaluationSnapshot> {
        self.snapshots.subscribe()
    }

    /// Uploads both documents and keeps the returned handles for `evaluate`.
    pub async fn upload(
        &mut self,
        cv: Option<DocumentFile>,
        project_report: Option<DocumentFile>,
    ) -> ClientResult<FileHandles> {
        let handles = upload_documents(&self.api, &self.session, cv, project_report).await?;
        self.handles = Some(handles.clone());
        Ok(handles)
    }

    /// Submits an evaluation for the uploaded documents and starts polling it.
    ///
    /// Any earlier poll loop is cancelled and fully stopped before the new
    /// job's state is published. Returns the new job id.
    pub async fn evaluate(
        &mut self,
        job_description: &str,
        study_case_brief: &str,
    ) -> ClientResult<String> {
        let request = build_request(self.handles.as_ref(), job_description, study_case_brief)?;

        self.cancel_active().await;

        let job = match submit_evaluation(&self.api, &self.session, &request).await {
            Ok(job) => job,
            Err(e) => {
                self.snapshots.send_replace(EvaluationSnapshot {
                    phase: Phase::RequestError,
                    error: Some(e.user_message()),
                    ..EvaluationSnapshot::default()
                });
                return Err(e);
            }
        };

        self.active = Some(self.poller.spawn(job.id.clone(), self.snapshots.clone()));
        Ok(job.id)
    }

    /// Waits until the current evaluation reaches a terminal phase and returns
    /// the final state. Returns the current state when nothing is polling.
    pub async fn wait_for_result(&mut self) -> EvaluationSnapshot {
        if let Some(handle) = self.active.take() {
            if let Some(snapshot) = handle.join().await {
                return snapshot;
            }
        }
        self.snapshot()
    }

    /// Stops polling and clears the stored session. The caller returns the
    /// user to login.
    pub async fn logout(mut self) -> ClientResult<()> {
        self.cancel_active().await;
        self.sessions.clear()
    }

    async fn cancel_active(&mut self) {
        if let Some(handle) = self.active.take() {
            if !handle.is_finished() {
                warn!("cancelling in-flight evaluation polling");
            }
            handle.cancel().await;
        }
    }
}

/// Treats a missing session as "go to login" rather than as a failure message.
pub fn requires_login(err: &ClientError) -> bool {
    matches!(err, ClientError::SessionMissing)
}
