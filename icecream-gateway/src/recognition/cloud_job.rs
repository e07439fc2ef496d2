//! Asynchronous cloud recognition job
//!
//! Lifecycle: `Created → Submitted → Polling⟲ → Done | Failed | TimedOut`.
//!
//! Submission is a two-step handshake (request an upload target, then upload
//! the bytes with a bounded retry budget). Polling runs on a fixed interval
//! under a wall-clock ceiling. On `done` the result artifact is fetched and
//! must contain the expected content.
//!
//! Expected failures (upload exhaustion, remote job failure, timeout, missing
//! artifact content) are returned as [`JobOutcome`] values. Only a malformed
//! poll response escapes as [`CloudJobError`].
//!
//! The HTTP protocol lives behind [`JobBackend`] and time behind [`Clock`], so
//! the state machine runs deterministically in tests.

use crate::types::ProviderError;
use chrono::{DateTime, Utc};
use icecream_common::config::CloudJobConfig;
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

// ============================================================================
// Clock
// ============================================================================

/// Time source for polling and retry delays
#[async_trait::async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
    async fn sleep(&self, duration: Duration);
}

/// Real clock backed by tokio timers
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioClock;

#[async_trait::async_trait]
impl Clock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Manually driven clock: `sleep` advances time instantly
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    elapsed: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            elapsed: Mutex::new(Duration::ZERO),
        }
    }

    /// Total simulated time
    pub fn elapsed(&self) -> Duration {
        *self.elapsed.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn advance(&self, duration: Duration) {
        let mut elapsed = self.elapsed.lock().unwrap_or_else(|e| e.into_inner());
        *elapsed += duration;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + self.elapsed()
    }

    async fn sleep(&self, duration: Duration) {
        self.advance(duration);
    }
}

// ============================================================================
// Job model
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Created,
    Submitted,
    Polling,
    Done,
    Failed,
    TimedOut,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Done | JobState::Failed | JobState::TimedOut)
    }
}

/// One recognition job, mutated only by the submission handshake and poll responses
#[derive(Debug, Clone, Serialize)]
pub struct RecognitionJob {
    /// Remote job identifier (empty until an upload target is issued)
    pub id: String,
    pub state: JobState,
    pub submitted_at: Option<DateTime<Utc>>,
    pub result_ref: Option<String>,
    pub upload_attempts: u32,
    pub polls: u32,
}

impl RecognitionJob {
    fn new() -> Self {
        Self {
            id: String::new(),
            state: JobState::Created,
            submitted_at: None,
            result_ref: None,
            upload_attempts: 0,
            polls: 0,
        }
    }

    fn transition(&mut self, next: JobState) {
        if self.state.is_terminal() {
            warn!(job_id = %self.id, state = ?self.state, to = ?next, "Ignoring transition out of a terminal state");
            return;
        }
        if self.state != next {
            debug!(job_id = %self.id, from = ?self.state, to = ?next, "Job state transition");
            self.state = next;
        }
    }
}

/// Upload target issued by the first handshake step
#[derive(Debug, Clone, PartialEq)]
pub struct UploadTarget {
    pub job_id: String,
    pub upload_url: String,
}

/// One poll response, already validated by the backend
#[derive(Debug, Clone, PartialEq)]
pub enum PollStatus {
    /// Job still in progress (remote state name for logging)
    Pending(String),
    /// Job finished; the reference points at the result artifact
    Done { result_ref: String },
    /// Terminal remote failure
    Failed(String),
    /// Transient poll failure (non-2xx, error code); keep polling
    Unavailable(String),
}

/// Terminal result of running a job
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Done(String),
    Failed(String),
    TimedOut(Duration),
}

#[derive(Debug, Clone)]
pub struct CompletedJob {
    pub job: RecognitionJob,
    pub outcome: JobOutcome,
}

/// Structurally unexpected responses; these are defects, not tier outcomes
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CloudJobError {
    #[error("Malformed job response: {0}")]
    Malformed(String),
}

/// Wire protocol of an asynchronous recognition service
#[async_trait::async_trait]
pub trait JobBackend: Send + Sync {
    /// Step 1 of submission: obtain an upload target
    async fn request_upload(&self, filename: &str) -> Result<UploadTarget, ProviderError>;

    /// Step 2 of submission: upload the bytes (one attempt)
    async fn upload(&self, target: &UploadTarget, bytes: &[u8]) -> Result<(), ProviderError>;

    /// Query job state; the call must complete within `limit`
    async fn poll(&self, job_id: &str, limit: Duration) -> Result<PollStatus, CloudJobError>;

    /// Retrieve the artifact; `Ok(None)` when the expected content is absent
    async fn fetch_artifact(&self, result_ref: &str) -> Result<Option<String>, ProviderError>;
}

// ============================================================================
// Client
// ============================================================================

/// Drives one job through submission, polling and artifact retrieval
pub struct CloudJobClient<B> {
    backend: B,
    clock: Arc<dyn Clock>,
    config: CloudJobConfig,
}

impl<B: JobBackend> CloudJobClient<B> {
    pub fn new(backend: B, config: CloudJobConfig) -> Self {
        Self::with_clock(backend, config, Arc::new(TokioClock))
    }

    pub fn with_clock(backend: B, config: CloudJobConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            backend,
            clock,
            config,
        }
    }

    pub fn config(&self) -> &CloudJobConfig {
        &self.config
    }

    /// Submit `bytes`, poll to a terminal state and fetch the artifact
    pub async fn run(&self, filename: &str, bytes: &[u8]) -> Result<CompletedJob, CloudJobError> {
        let mut job = RecognitionJob::new();

        // Submission step 1: upload target
        let target = match self.backend.request_upload(filename).await {
            Ok(target) => target,
            Err(e) => {
                warn!(error = %e, "Cloud job upload target request failed");
                return Ok(finish(job, JobOutcome::Failed(format!("upload target request failed: {}", e))));
            }
        };
        job.id = target.job_id.clone();
        info!(job_id = %job.id, "Cloud job created");

        // Submission step 2: upload with a fixed attempt budget
        if let Err(reason) = self.upload_with_retry(&mut job, &target, bytes).await {
            return Ok(finish(job, JobOutcome::Failed(reason)));
        }
        job.submitted_at = Some(Utc::now());
        job.transition(JobState::Submitted);

        // Poll under a wall-clock ceiling
        let started = self.clock.now();
        let deadline = started + self.config.max_wait;
        // A poll in flight may overrun the deadline by at most one interval
        let ceiling = deadline + self.config.poll_interval;
        loop {
            if self.clock.now() >= deadline {
                return Ok(self.timed_out(job, started));
            }

            self.clock.sleep(self.config.poll_interval).await;
            let limit = ceiling.saturating_duration_since(self.clock.now());
            if limit.is_zero() {
                return Ok(self.timed_out(job, started));
            }
            job.transition(JobState::Polling);
            job.polls += 1;

            let status = match tokio::time::timeout(limit, self.backend.poll(&job.id, limit)).await {
                Ok(status) => status?,
                Err(_) => PollStatus::Unavailable(format!("poll exceeded {:?}", limit)),
            };

            match status {
                PollStatus::Pending(state) => {
                    debug!(job_id = %job.id, remote_state = %state, poll = job.polls, "Cloud job pending");
                }
                PollStatus::Unavailable(reason) => {
                    debug!(job_id = %job.id, reason = %reason, poll = job.polls, "Cloud job poll unavailable");
                }
                PollStatus::Failed(reason) => {
                    warn!(job_id = %job.id, reason = %reason, "Cloud job failed remotely");
                    return Ok(finish(job, JobOutcome::Failed(reason)));
                }
                PollStatus::Done { result_ref } => {
                    job.result_ref = Some(result_ref.clone());
                    let outcome = match self.backend.fetch_artifact(&result_ref).await {
                        Ok(Some(text)) if !text.trim().is_empty() => JobOutcome::Done(text),
                        Ok(_) => JobOutcome::Failed(
                            "result artifact does not contain the expected content".to_string(),
                        ),
                        Err(e) => JobOutcome::Failed(format!("artifact retrieval failed: {}", e)),
                    };
                    return Ok(finish(job, outcome));
                }
            }
        }
    }

    fn timed_out(&self, job: RecognitionJob, started: Instant) -> CompletedJob {
        let waited = self.clock.now().saturating_duration_since(started);
        warn!(job_id = %job.id, polls = job.polls, waited_ms = waited.as_millis() as u64, "Cloud job timed out");
        finish(job, JobOutcome::TimedOut(waited))
    }

    async fn upload_with_retry(
        &self,
        job: &mut RecognitionJob,
        target: &UploadTarget,
        bytes: &[u8],
    ) -> Result<(), String> {
        let attempts = self.config.upload_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            job.upload_attempts = attempt;
            match self.backend.upload(target, bytes).await {
                Ok(()) => {
                    debug!(job_id = %job.id, attempt, "Cloud job upload succeeded");
                    return Ok(());
                }
                Err(e) => {
                    warn!(job_id = %job.id, attempt, max_attempts = attempts, error = %e, "Cloud job upload failed");
                    last_error = e.to_string();
                }
            }
            if attempt < attempts {
                self.clock.sleep(self.config.upload_retry_delay).await;
            }
        }

        Err(format!(
            "upload failed after {} attempts: {}",
            attempts, last_error
        ))
    }
}

fn finish(mut job: RecognitionJob, outcome: JobOutcome) -> CompletedJob {
    let state = match &outcome {
        JobOutcome::Done(_) => JobState::Done,
        JobOutcome::Failed(_) => JobState::Failed,
        JobOutcome::TimedOut(_) => JobState::TimedOut,
    };
    job.transition(state);
    CompletedJob { job, outcome }
}
