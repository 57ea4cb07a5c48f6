//! Polling state machine that drives a submitted evaluation job to a terminal state.
//!
//! `PollMachine` holds the transitions and is clock- and network-free apart from
//! the `Instant` it is handed. `Poller` runs it as one serialized tokio task:
//! every tick waits for the previous request, missed ticks are skipped, and a
//! `watch` shutdown channel cancels the loop when a new evaluation starts.
//!
//! Phases:
//!
//! ```text
//! Idle → Queued → Processing → Completed | Failed
//!            ↘          ↘
//!             TimedOut | RequestError   (client-side terminals)
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::api_client::{ApiClient, RequestOptions};
use crate::errors::{ClientError, ClientResult};
use crate::models::job::{EvaluationResult, JobResponse, JobStatus};
use crate::session::Session;

/// Max synthetic increment per in-flight tick, and the ceiling it may reach.
const IN_FLIGHT_STEP: f64 = 8.0;
const IN_FLIGHT_CAP: f64 = 95.0;
/// Smaller step and ceiling while the job is not yet visible (404).
const NOT_FOUND_STEP: f64 = 5.0;
const NOT_FOUND_CAP: f64 = 85.0;
/// `tokio::time::interval` panics on a zero period.
const MIN_INTERVAL: Duration = Duration::from_millis(1);

pub const DEFAULT_FAILURE_MESSAGE: &str = "Evaluation failed";
pub const TIMEOUT_MESSAGE: &str = "Evaluation timed out. Please try again later.";

// ────────────────────────────────────────────────────────────────────────────
// Read-only projection
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    Queued,
    Processing,
    Completed,
    Failed,
    TimedOut,
    RequestError,
}

impl Phase {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Phase::Completed | Phase::Failed | Phase::TimedOut | Phase::RequestError
        )
    }
}

/// What the presentation layer sees. Only the active poll loop (or the
/// dashboard between loops) writes it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluationSnapshot {
    pub job_id: Option<String>,
    pub phase: Phase,
    pub progress: f64, // 0.0 – 100.0
    pub result: Option<EvaluationResult>,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub polls: u32,
}

impl Default for EvaluationSnapshot {
    fn default() -> Self {
        Self {
            job_id: None,
            phase: Phase::Idle,
            progress: 0.0,
            result: None,
            error: None,
            started_at: None,
            polls: 0,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Job status source
// ────────────────────────────────────────────────────────────────────────────

/// Where job status comes from. The HTTP implementation is the only one in
/// production; tests script responses through it.
#[async_trait]
pub trait JobSource: Send + Sync {
    async fn fetch_job(&self, job_id: &str) -> ClientResult<JobResponse>;
}

/// GET /result/{id} with the session's auth headers.
pub struct HttpJobSource {
    api: ApiClient,
    session: Session,
}

impl HttpJobSource {
    pub fn new(api: ApiClient, session: Session) -> Self {
        Self { api, session }
    }
}

#[async_trait]
impl JobSource for HttpJobSource {
    async fn fetch_job(&self, job_id: &str) -> ClientResult<JobResponse> {
        let options = RequestOptions::get().with_session(&self.session)?;
        self.api.request_resource_as("/result", job_id, options).await
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Transitions
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Continue,
    Stop,
}

/// Adds a random increment in `[0, max_step)` without ever passing `cap`
/// and without ever moving backwards.
fn advance_progress(progress: f64, max_step: f64, cap: f64, rng: &mut impl Rng) -> f64 {
    if progress >= cap {
        return progress;
    }
    (progress + rng.gen_range(0.0..max_step)).min(cap)
}

pub struct PollMachine {
    snapshot: EvaluationSnapshot,
    started: Instant,
    timeout: Duration,
    rng: StdRng,
}

impl PollMachine {
    /// Starts tracking `job_id`: progress 0, phase Queued, clock running.
    pub fn start(job_id: impl Into<String>, timeout: Duration, rng: StdRng) -> Self {
        Self {
            snapshot: EvaluationSnapshot {
                job_id: Some(job_id.into()),
                phase: Phase::Queued,
                started_at: Some(Utc::now()),
                ..EvaluationSnapshot::default()
            },
            started: Instant::now(),
            timeout,
            rng,
        }
    }

    pub fn snapshot(&self) -> &EvaluationSnapshot {
        &self.snapshot
    }

    pub fn job_id(&self) -> &str {
        self.snapshot.job_id.as_deref().unwrap_or_default()
    }

    /// Checked at the start of every tick, before any request is issued.
    pub fn check_timeout(&mut self, now: Instant) -> Step {
        let elapsed = now.saturating_duration_since(self.started);
        if elapsed <= self.timeout {
            return Step::Continue;
        }
        warn!(
            job_id = %self.job_id(),
            elapsed_secs = elapsed.as_secs(),
            "evaluation polling timed out"
        );
        self.finish(
            Phase::TimedOut,
            Some(ClientError::Timeout { elapsed }.user_message()),
        );
        Step::Stop
    }

    /// Classifies one poll outcome and applies the resulting transition.
    pub fn apply(&mut self, outcome: ClientResult<JobResponse>) -> Step {
        if self.snapshot.phase.is_terminal() {
            return Step::Stop;
        }
        self.snapshot.polls += 1;

        match outcome {
            Ok(job) => self.apply_job(job),
            Err(e) if e.is_retryable() => {
                let before = self.snapshot.progress;
                self.snapshot.progress =
                    advance_progress(before, NOT_FOUND_STEP, NOT_FOUND_CAP, &mut self.rng);
                debug!(
                    job_id = %self.job_id(),
                    progress = self.snapshot.progress,
                    "job not visible yet, retrying"
                );
                Step::Continue
            }
            Err(e) => {
                warn!(job_id = %self.job_id(), code = e.code(), "polling failed: {e}");
                self.finish(Phase::RequestError, Some(e.user_message()));
                Step::Stop
            }
        }
    }

    fn apply_job(&mut self, job: JobResponse) -> Step {
        match job.status {
            JobStatus::Completed => match job.result {
                Some(result) => {
                    info!(job_id = %self.job_id(), "evaluation completed");
                    self.snapshot.result = Some(result);
                    self.snapshot.progress = 100.0;
                    self.finish(Phase::Completed, None);
                    Step::Stop
                }
                None => {
                    warn!(job_id = %self.job_id(), "completed job has no result payload");
                    self.finish(
                        Phase::RequestError,
                        Some("Evaluation completed without a result".to_string()),
                    );
                    Step::Stop
                }
            },
            JobStatus::Failed => {
                let message = job
                    .error
                    .filter(|e| !e.trim().is_empty())
                    .unwrap_or_else(|| DEFAULT_FAILURE_MESSAGE.to_string());
                info!(job_id = %self.job_id(), "evaluation failed: {message}");
                self.finish(Phase::Failed, Some(message));
                Step::Stop
            }
            status => {
                // Forward-only: a late "queued" never undoes "processing".
                if status == JobStatus::Processing {
                    self.snapshot.phase = Phase::Processing;
                }
                self.snapshot.progress = advance_progress(
                    self.snapshot.progress,
                    IN_FLIGHT_STEP,
                    IN_FLIGHT_CAP,
                    &mut self.rng,
                );
                debug!(
                    job_id = %self.job_id(),
                    status = ?status,
                    progress = self.snapshot.progress,
                    "evaluation in flight"
                );
                Step::Continue
            }
        }
    }

    fn finish(&mut self, phase: Phase, error: Option<String>) {
        self.snapshot.phase = phase;
        self.snapshot.error = error;
    }

    pub fn into_snapshot(self) -> EvaluationSnapshot {
        self.snapshot
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Loop
// ────────────────────────────────────────────────────────────────────────────

/// Spawns poll loops with a fixed source and cadence.
#[derive(Clone)]
pub struct Poller {
    source: Arc<dyn JobSource>,
    interval: Duration,
    timeout: Duration,
    seed: Option<u64>,
}

impl Poller {
    /// A zero `interval` is raised to one millisecond.
    pub fn new(source: Arc<dyn JobSource>, interval: Duration, timeout: Duration) -> Self {
        if interval.is_zero() {
            warn!("zero poll interval requested, using {MIN_INTERVAL:?}");
        }
        Self {
            source,
            interval: interval.max(MIN_INTERVAL),
            timeout,
            seed: None,
        }
    }

    /// Fixes the progress RNG seed so runs are reproducible.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Starts polling `job_id`, publishing every transition to `snapshots`.
    pub fn spawn(
        &self,
        job_id: impl Into<String>,
        snapshots: Arc<watch::Sender<EvaluationSnapshot>>,
    ) -> PollHandle {
        let rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let machine = PollMachine::start(job_id, self.timeout, rng);
        snapshots.send_replace(machine.snapshot().clone());

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(run_loop(
            machine,
            self.source.clone(),
            self.interval,
            snapshots,
            shutdown_rx,
        ));

        PollHandle {
            shutdown_tx,
            task: Some(task),
        }
    }
}

async fn run_loop(
    mut machine: PollMachine,
    source: Arc<dyn JobSource>,
    interval: Duration,
    snapshots: Arc<watch::Sender<EvaluationSnapshot>>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> EvaluationSnapshot {
    let job_id = machine.job_id().to_string();
    info!(
        job_id = %job_id,
        interval_ms = interval.as_millis() as u64,
        "polling started"
    );

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // The first tick fires immediately; the first poll waits one interval.
    ticker.tick().await;

    loop {
        let step = tokio::select! {
            biased;
            _ = shutdown_signalled(&mut shutdown_rx) => {
                info!(job_id = %job_id, "polling cancelled");
                break;
            }
            step = poll_once(&mut machine, &job_id, source.as_ref(), &mut ticker) => step,
        };

        snapshots.send_replace(machine.snapshot().clone());
        if step == Step::Stop {
            break;
        }
    }

    machine.into_snapshot()
}

async fn poll_once(
    machine: &mut PollMachine,
    job_id: &str,
    source: &dyn JobSource,
    ticker: &mut tokio::time::Interval,
) -> Step {
    ticker.tick().await;
    if machine.check_timeout(Instant::now()) == Step::Stop {
        return Step::Stop;
    }
    let outcome = source.fetch_job(job_id).await;
    machine.apply(outcome)
}

/// Resolves once shutdown is requested or the sender side is gone.
async fn shutdown_signalled(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}

/// Owns one running poll loop. Dropping it aborts the loop.
pub struct PollHandle {
    shutdown_tx: watch::Sender<bool>,
    task: Option<JoinHandle<EvaluationSnapshot>>,
}

impl PollHandle {
    /// Signals shutdown and waits for the loop to exit, so no stale tick can
    /// publish after this returns. Returns the state the loop stopped in.
    pub async fn cancel(mut self) -> Option<EvaluationSnapshot> {
        if self.shutdown_tx.send(true).is_err() {
            debug!("poll loop already finished");
        }
        self.wait().await
    }

    /// Waits for the loop to reach a terminal state (or be cancelled).
    pub async fn join(mut self) -> Option<EvaluationSnapshot> {
        self.wait().await
    }

    async fn wait(&mut self) -> Option<EvaluationSnapshot> {
        let task = self.task.take()?;
        match task.await {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                warn!("poll loop ended abnormally: {e}");
                None
            }
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, |t| t.is_finished())
    }
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded() -> StdRng {
        StdRng::seed_from_u64(7)
    }

    fn job(status: JobStatus) -> JobResponse {
        JobResponse {
            id: Some("job-1".to_string()),
            status,
            result: None,
            error: None,
        }
    }

    fn not_found() -> ClientError {
        ClientError::NotFound {
            url: "http://backend/result/job-1".to_string(),
        }
    }

    #[test]
    fn test_start_is_queued_at_zero() {
        let machine = PollMachine::start("job-1", Duration::from_secs(90), seeded());
        let snap = machine.snapshot();
        assert_eq!(snap.phase, Phase::Queued);
        assert_eq!(snap.progress, 0.0);
        assert_eq!(snap.job_id.as_deref(), Some("job-1"));
        assert!(snap.started_at.is_some());
    }

    #[test]
    fn test_in_flight_progress_bounds() {
        let mut machine = PollMachine::start("job-1", Duration::from_secs(90), seeded());
        for _ in 0..100 {
            let before = machine.snapshot().progress;
            assert_eq!(machine.apply(Ok(job(JobStatus::Processing))), Step::Continue);
            let after = machine.snapshot().progress;
            assert!(after >= before, "progress went backwards: {before} -> {after}");
            assert!(after <= (before + IN_FLIGHT_STEP).min(IN_FLIGHT_CAP).max(before));
        }
        assert!(machine.snapshot().progress <= 95.0);
    }

    #[test]
    fn test_not_found_progress_bounds_and_silence() {
        let mut machine = PollMachine::start("job-1", Duration::from_secs(90), seeded());
        for _ in 0..100 {
            let before = machine.snapshot().progress;
            assert_eq!(machine.apply(Err(not_found())), Step::Continue);
            let after = machine.snapshot().progress;
            assert!(after >= before);
            assert!(after <= (before + NOT_FOUND_STEP).min(NOT_FOUND_CAP).max(before));
            assert!(machine.snapshot().error.is_none());
            assert!(!machine.snapshot().phase.is_terminal());
        }
    }

    #[test]
    fn test_not_found_cap_never_pulls_progress_down() {
        let mut machine = PollMachine::start("job-1", Duration::from_secs(90), seeded());
        for _ in 0..60 {
            machine.apply(Ok(job(JobStatus::Processing)));
        }
        let high = machine.snapshot().progress;
        assert!(high > NOT_FOUND_CAP, "expected progress above 85, got {high}");

        machine.apply(Err(not_found()));
        assert_eq!(machine.snapshot().progress, high);
    }

    #[test]
    fn test_advance_progress_respects_cap() {
        let mut rng = seeded();
        assert_eq!(advance_progress(95.0, 8.0, 95.0, &mut rng), 95.0);
        assert_eq!(advance_progress(97.0, 8.0, 95.0, &mut rng), 97.0);
        let next = advance_progress(94.0, 8.0, 95.0, &mut rng);
        assert!((94.0..=95.0).contains(&next));
    }

    #[test]
    fn test_processing_is_not_undone_by_queued() {
        let mut machine = PollMachine::start("job-1", Duration::from_secs(90), seeded());
        machine.apply(Ok(job(JobStatus::Processing)));
        machine.apply(Ok(job(JobStatus::Queued)));
        assert_eq!(machine.snapshot().phase, Phase::Processing);
    }

    #[test]
    fn test_unknown_status_keeps_polling() {
        let mut machine = PollMachine::start("job-1", Duration::from_secs(90), seeded());
        assert_eq!(machine.apply(Ok(job(JobStatus::Unknown))), Step::Continue);
        assert_eq!(machine.snapshot().phase, Phase::Queued);
    }

    #[test]
    fn test_completed_forces_full_progress() {
        let mut machine = PollMachine::start("job-1", Duration::from_secs(90), seeded());
        machine.apply(Ok(job(JobStatus::Processing)));

        let result = EvaluationResult {
            cv_match_rate: 0.7,
            cv_feedback: "ok".to_string(),
            project_score: 8.0,
            project_feedback: "good".to_string(),
            overall_summary: "hire".to_string(),
        };
        let mut done = job(JobStatus::Completed);
        done.result = Some(result.clone());

        assert_eq!(machine.apply(Ok(done)), Step::Stop);
        let snap = machine.snapshot();
        assert_eq!(snap.phase, Phase::Completed);
        assert_eq!(snap.progress, 100.0);
        assert_eq!(snap.result.as_ref(), Some(&result));
        assert!(snap.error.is_none());
    }

    #[test]
    fn test_completed_without_result_is_request_error() {
        let mut machine = PollMachine::start("job-1", Duration::from_secs(90), seeded());
        assert_eq!(machine.apply(Ok(job(JobStatus::Completed))), Step::Stop);
        assert_eq!(machine.snapshot().phase, Phase::RequestError);
    }

    #[test]
    fn test_failed_uses_server_message_or_default() {
        let mut machine = PollMachine::start("job-1", Duration::from_secs(90), seeded());
        let mut failed = job(JobStatus::Failed);
        failed.error = Some("bad input".to_string());
        assert_eq!(machine.apply(Ok(failed)), Step::Stop);
        assert_eq!(machine.snapshot().phase, Phase::Failed);
        assert_eq!(machine.snapshot().error.as_deref(), Some("bad input"));

        let mut machine = PollMachine::start("job-2", Duration::from_secs(90), seeded());
        machine.apply(Ok(job(JobStatus::Failed)));
        assert_eq!(
            machine.snapshot().error.as_deref(),
            Some(DEFAULT_FAILURE_MESSAGE)
        );
    }

    #[test]
    fn test_hard_request_error_stops() {
        let mut machine = PollMachine::start("job-1", Duration::from_secs(90), seeded());
        let step = machine.apply(Err(ClientError::Request {
            status: 500,
            message: "Internal Server Error".to_string(),
        }));
        assert_eq!(step, Step::Stop);
        assert_eq!(machine.snapshot().phase, Phase::RequestError);
        assert_eq!(
            machine.snapshot().error.as_deref(),
            Some("Internal Server Error")
        );
    }

    #[test]
    fn test_terminal_machine_ignores_later_outcomes() {
        let mut machine = PollMachine::start("job-1", Duration::from_secs(90), seeded());
        let mut failed = job(JobStatus::Failed);
        failed.error = Some("bad input".to_string());
        machine.apply(Ok(failed));
        let polls = machine.snapshot().polls;

        assert_eq!(machine.apply(Ok(job(JobStatus::Processing))), Step::Stop);
        assert_eq!(machine.snapshot().phase, Phase::Failed);
        assert_eq!(machine.snapshot().polls, polls);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_strictly_after_bound() {
        let mut machine = PollMachine::start("job-1", Duration::from_secs(90), seeded());
        tokio::time::advance(Duration::from_secs(90)).await;
        assert_eq!(machine.check_timeout(Instant::now()), Step::Continue);

        tokio::time::advance(Duration::from_millis(1)).await;
        assert_eq!(machine.check_timeout(Instant::now()), Step::Stop);
        assert_eq!(machine.snapshot().phase, Phase::TimedOut);
        assert_eq!(machine.snapshot().error.as_deref(), Some(TIMEOUT_MESSAGE));
    }
}
