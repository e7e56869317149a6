//! Per-entity judge state machine.
//!
//! The ledger in [`StateStore`] decides what runs: before each phase the record
//! is reloaded and completed phases are skipped, so a re-run after a crash
//! picks up at the first phase that never completed.

use std::fmt;
use std::sync::Arc;

use tokio::time::Instant;

use crate::domain::{EntityActivity, TrackedEntity};
use crate::error::{Result, WallError};
use crate::judge::service::{JudgeTarget, ReviewService, ReviewVerdict};
use crate::retry::{Backoff, PollPolicy};
use crate::shutdown::Shutdown;
use crate::store::{PhaseOutcome, PipelinePhase, StateStore};

/// How an entity's judge run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum EntityOutcome {
    /// Every phase through the summary report completed
    Completed,
    /// Review received; summary reports are disabled
    Judged,
    /// A phase before the review failed
    Halted { phase: PipelinePhase, error: String },
    /// The review never arrived or could not be read
    PendingReview { error: String },
    /// No repository to judge
    Skipped,
    /// Operator abort before the workflow finished
    Cancelled,
}

impl EntityOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityOutcome::Completed => "completed",
            EntityOutcome::Judged => "judged",
            EntityOutcome::Halted { .. } => "halted",
            EntityOutcome::PendingReview { .. } => "pending_review",
            EntityOutcome::Skipped => "skipped",
            EntityOutcome::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for EntityOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityOutcome::Halted { phase, error } => write!(f, "halted at {}: {}", phase, error),
            EntityOutcome::PendingReview { error } => write!(f, "pending review: {}", error),
            other => write!(f, "{}", other.as_str()),
        }
    }
}

pub struct JudgeWorkflow {
    service: Arc<dyn ReviewService>,
    store: Arc<StateStore>,
    backoff: Backoff,
    poll: PollPolicy,
    summary_enabled: bool,
    shutdown: Shutdown,
}

impl JudgeWorkflow {
    pub fn new(service: Arc<dyn ReviewService>, store: Arc<StateStore>) -> Self {
        Self {
            service,
            store,
            backoff: Backoff::default(),
            poll: PollPolicy::default(),
            summary_enabled: true,
            shutdown: Shutdown::never(),
        }
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_poll_policy(mut self, poll: PollPolicy) -> Self {
        self.poll = poll;
        self
    }

    pub fn with_summary(mut self, enabled: bool) -> Self {
        self.summary_enabled = enabled;
        self
    }

    pub fn with_shutdown(mut self, shutdown: Shutdown) -> Self {
        self.shutdown = shutdown;
        self
    }

    fn last_phase(&self) -> PipelinePhase {
        if self.summary_enabled {
            PipelinePhase::ReportGenerated
        } else {
            PipelinePhase::ReviewReceived
        }
    }

    /// Drive one entity as far as it will go.
    ///
    /// Remote failures end the entity with an outcome; only run-fatal errors
    /// (ledger or storage) come back as `Err`.
    pub async fn advance(&self, entity: &TrackedEntity, activity: &EntityActivity) -> Result<EntityOutcome> {
        let Some(repo) = activity.judged_repo() else {
            log::info!("{}: no repository to judge, skipping", entity.login);
            return Ok(EntityOutcome::Skipped);
        };
        let entity_id = entity.id();
        let last = self.last_phase();

        for phase in PipelinePhase::ALL.into_iter().filter(|p| *p <= last) {
            let record = self.store.load(&entity_id)?;
            if record.is_completed(phase) {
                log::debug!("{}: {} already completed", entity_id, phase);
                continue;
            }
            if self.shutdown.is_triggered() {
                return Ok(EntityOutcome::Cancelled);
            }

            let target = JudgeTarget::new(entity, repo).with_record(&record);
            match self.run_phase(phase, &target).await {
                Ok(reference) => {
                    self.store
                        .transition(&entity_id, phase, PhaseOutcome::completed(reference.as_str()))?;
                    tracing::info!(entity = %entity_id, phase = %phase, reference = %reference, "phase completed");
                }
                Err(WallError::Cancelled) => {
                    log::info!("{}: cancelled during {}", entity_id, phase);
                    return Ok(EntityOutcome::Cancelled);
                }
                Err(e) if e.is_run_fatal() => return Err(e),
                Err(e) => {
                    let error = e.to_string();
                    self.store
                        .transition(&entity_id, phase, PhaseOutcome::failed(error.as_str()))?;
                    tracing::warn!(entity = %entity_id, phase = %phase, error = %error, "phase failed");
                    return Ok(match phase {
                        PipelinePhase::ReviewReceived => EntityOutcome::PendingReview { error },
                        _ => EntityOutcome::Halted { phase, error },
                    });
                }
            }
        }

        Ok(if last == PipelinePhase::ReportGenerated {
            EntityOutcome::Completed
        } else {
            EntityOutcome::Judged
        })
    }

    /// One phase, retrying transient failures with backoff.
    async fn run_phase(&self, phase: PipelinePhase, target: &JudgeTarget) -> Result<String> {
        let mut attempt = 0;
        loop {
            self.shutdown.check()?;
            match self.call(phase, target).await {
                Ok(reference) => return Ok(reference),
                Err(e) if e.is_retryable() && !self.backoff.exhausted(attempt) => {
                    let delay = self.backoff.delay(attempt);
                    tracing::warn!(
                        entity = %target.entity_id,
                        phase = %phase,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "transient failure, backing off"
                    );
                    self.shutdown.sleep(delay).await?;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn call(&self, phase: PipelinePhase, target: &JudgeTarget) -> Result<String> {
        let reference = match phase {
            PipelinePhase::Forked => self.service.derive_state(target).await?,
            PipelinePhase::BranchCreated => self.service.create_baseline(target).await?,
            PipelinePhase::RequestOpened => self.service.open_comparison(target).await?,
            PipelinePhase::ReviewTriggered => self.service.trigger_review(target).await?,
            PipelinePhase::ReviewReceived => self.poll_review(target).await?,
            PipelinePhase::ReportGenerated => {
                let recorded = target.require(PipelinePhase::ReviewReceived)?;
                let verdict: ReviewVerdict = serde_json::from_str(recorded)?;
                self.service.generate_summary(target, &verdict).await?
            }
        };
        Ok(reference)
    }

    /// Check for the review until it arrives or the poll bounds run out.
    ///
    /// Transient errors count as an empty check; anything else ends the poll.
    async fn poll_review(&self, target: &JudgeTarget) -> Result<String> {
        let started = Instant::now();
        let mut attempts = 0;

        while attempts < self.poll.max_attempts {
            self.shutdown.check()?;
            attempts += 1;
            match self.service.fetch_review_result(target).await {
                Ok(Some(verdict)) => {
                    log::info!("{}: review received with grade {}", target.entity_id, verdict.grade);
                    return Ok(serde_json::to_string(&verdict)?);
                }
                Ok(None) => log::debug!("{}: no review yet (check {})", target.entity_id, attempts),
                Err(e) if e.is_retryable() => {
                    log::warn!("{}: review check {} failed: {}", target.entity_id, attempts, e)
                }
                Err(e) => return Err(e.into()),
            }

            if attempts >= self.poll.max_attempts {
                break;
            }
            let wait = self.poll.interval(attempts - 1);
            if started.elapsed() + wait > self.poll.max_wait {
                break;
            }
            self.shutdown.sleep(wait).await?;
        }

        Err(WallError::PollTimeout {
            attempts,
            waited_secs: started.elapsed().as_secs(),
        })
    }
}
