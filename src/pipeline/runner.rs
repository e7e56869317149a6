//! Bounded worker pool that runs each entity end to end.
//!
//! Every entity is one task: collect activity, then drive the judge workflow.
//! A semaphore caps how many run at once, independent of how many credentials
//! the pool holds. Ranking happens only after every task has finished.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::domain::{EntityActivity, TrackedEntity};
use crate::error::{Result, WallError};
use crate::fetch::FetchOrchestrator;
use crate::judge::{EntityOutcome, JudgeWorkflow};
use crate::scoring::{LeaderboardEntry, ScoringPolicy, build_leaderboard, write_leaderboard};
use crate::shutdown::Shutdown;
use crate::store::{PhaseRecord, StateStore};

/// What happened to one entity during a run.
#[derive(Debug, Clone, PartialEq)]
pub enum EntityResult {
    /// Activity collected; judging was not part of this run
    Collected,
    Judged(EntityOutcome),
    /// Judging only, and nothing was collected for this entity yet
    NoActivity,
    FetchFailed(String),
    Cancelled,
}

impl EntityResult {
    pub fn label(&self) -> &'static str {
        match self {
            EntityResult::Collected => "collected",
            EntityResult::Judged(outcome) => outcome.as_str(),
            EntityResult::NoActivity => "no_activity",
            EntityResult::FetchFailed(_) => "fetch_failed",
            EntityResult::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for EntityResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityResult::Judged(outcome) => write!(f, "{}", outcome),
            EntityResult::FetchFailed(error) => write!(f, "fetch failed: {}", error),
            other => write!(f, "{}", other.label()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EntityReport {
    pub login: String,
    pub result: EntityResult,
}

/// Per-entity results in roster order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    pub reports: Vec<EntityReport>,
}

impl RunSummary {
    /// Count of entities per result label.
    pub fn tally(&self) -> BTreeMap<&'static str, usize> {
        let mut counts = BTreeMap::new();
        for report in &self.reports {
            *counts.entry(report.result.label()).or_insert(0) += 1;
        }
        counts
    }

    pub fn interrupted(&self) -> usize {
        self.reports
            .iter()
            .filter(|r| matches!(r.result, EntityResult::Cancelled | EntityResult::Judged(EntityOutcome::Cancelled)))
            .count()
    }
}

#[derive(Clone)]
pub struct PipelineRunner {
    store: Arc<StateStore>,
    fetcher: Option<Arc<FetchOrchestrator>>,
    workflow: Option<Arc<JudgeWorkflow>>,
    parallelism: usize,
    shutdown: Shutdown,
}

impl PipelineRunner {
    pub fn new(store: Arc<StateStore>, parallelism: usize) -> Self {
        Self {
            store,
            fetcher: None,
            workflow: None,
            parallelism: parallelism.max(1),
            shutdown: Shutdown::never(),
        }
    }

    /// Collect activity before judging; without a fetcher only stored
    /// activity is used.
    pub fn with_fetcher(mut self, fetcher: Arc<FetchOrchestrator>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn with_workflow(mut self, workflow: Arc<JudgeWorkflow>) -> Self {
        self.workflow = Some(workflow);
        self
    }

    pub fn with_shutdown(mut self, shutdown: Shutdown) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Process every entity, at most `parallelism` at a time.
    ///
    /// Stops early and returns the error when one is run-fatal or every
    /// credential has been revoked.
    pub async fn run(&self, entities: &[TrackedEntity]) -> Result<RunSummary> {
        let semaphore = Arc::new(Semaphore::new(self.parallelism));
        let mut tasks = JoinSet::new();

        for (index, entity) in entities.iter().cloned().enumerate() {
            let runner = self.clone();
            let semaphore = semaphore.clone();
            tasks.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return (index, Ok(EntityResult::Cancelled));
                };
                (index, runner.process(&entity).await)
            });
        }

        let mut results: Vec<Option<EntityResult>> = vec![None; entities.len()];
        while let Some(joined) = tasks.join_next().await {
            let (index, result) = match joined {
                Ok(done) => done,
                Err(e) => {
                    log::error!("Entity worker panicked: {}", e);
                    continue;
                }
            };
            match result {
                Ok(result) => {
                    tracing::info!(entity = %entities[index].login, result = %result, "entity finished");
                    results[index] = Some(result);
                }
                Err(e) => {
                    tracing::error!(entity = %entities[index].login, error = %e, "stopping run");
                    tasks.abort_all();
                    return Err(e);
                }
            }
        }

        let reports = entities
            .iter()
            .zip(results)
            .map(|(entity, result)| EntityReport {
                login: entity.login.clone(),
                result: result.unwrap_or_else(|| EntityResult::FetchFailed("worker panicked".to_string())),
            })
            .collect();
        Ok(RunSummary { reports })
    }

    async fn process(&self, entity: &TrackedEntity) -> Result<EntityResult> {
        if self.shutdown.is_triggered() {
            return Ok(EntityResult::Cancelled);
        }

        let activity = match &self.fetcher {
            Some(fetcher) => match fetcher.collect_entity(&entity.login).await {
                Ok(activity) => activity,
                Err(WallError::Cancelled) => return Ok(EntityResult::Cancelled),
                Err(e) if stops_run(&e) => return Err(e),
                Err(e) => {
                    log::warn!("{}: fetch failed: {}", entity.login, e);
                    return Ok(EntityResult::FetchFailed(e.to_string()));
                }
            },
            None => match self.store.load_activity(&entity.id())? {
                Some(activity) => activity,
                None => return Ok(EntityResult::NoActivity),
            },
        };

        match &self.workflow {
            Some(workflow) => Ok(EntityResult::Judged(workflow.advance(entity, &activity).await?)),
            None => Ok(EntityResult::Collected),
        }
    }
}

fn stops_run(error: &WallError) -> bool {
    error.is_run_fatal() || matches!(error, WallError::NoUsableCredentials(_))
}

/// Rank every roster entity from the stored state and write the leaderboard.
pub fn export_leaderboard(
    store: &StateStore,
    entities: &[TrackedEntity],
    policy: &ScoringPolicy,
    path: &Path,
) -> Result<Vec<LeaderboardEntry>> {
    let activities: HashMap<String, EntityActivity> = store
        .list_activities()?
        .into_iter()
        .map(|a| (a.login.to_lowercase(), a))
        .collect();
    let records: HashMap<String, PhaseRecord> = store
        .list_phase_records()?
        .into_iter()
        .map(|r| (r.entity_id.clone(), r))
        .collect();

    let entries = build_leaderboard(entities, &activities, &records, policy);
    write_leaderboard(path, &entries)?;
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{PhaseOutcome, PipelinePhase};
    use chrono::Utc;
    use tempfile::TempDir;

    fn stored_activity(login: &str, emoji: u64) -> EntityActivity {
        EntityActivity {
            login: login.to_string(),
            name: None,
            bio: None,
            followers: 1,
            stars: 0,
            top_repos: Vec::new(),
            commits_seen: 0,
            commit_messages: Vec::new(),
            emoji_score: emoji,
            worst_commit: None,
            fetched_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_judge_only_run_uses_stored_activity() {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(StateStore::open(temp.path()).unwrap());
        store.save_activity(&stored_activity("alice", 2)).unwrap();

        let runner = PipelineRunner::new(store, 2);
        let entities = vec![TrackedEntity::new("Alice"), TrackedEntity::new("bob")];
        let summary = runner.run(&entities).await.unwrap();

        assert_eq!(summary.reports[0].result, EntityResult::Collected);
        assert_eq!(summary.reports[1].result, EntityResult::NoActivity);
        assert_eq!(summary.tally().get("no_activity"), Some(&1));
        assert_eq!(summary.interrupted(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_run_reports_every_entity() {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(StateStore::open(temp.path()).unwrap());
        let (trigger, shutdown) = crate::shutdown::channel();
        trigger.trigger();

        let runner = PipelineRunner::new(store, 1).with_shutdown(shutdown);
        let entities = vec![TrackedEntity::new("a"), TrackedEntity::new("b")];
        let summary = runner.run(&entities).await.unwrap();
        assert_eq!(summary.interrupted(), 2);
    }

    #[test]
    fn test_export_covers_whole_roster() {
        let temp = TempDir::new().unwrap();
        let store = StateStore::open(temp.path()).unwrap();
        store.save_activity(&stored_activity("alice", 5)).unwrap();
        store.save_activity(&stored_activity("bob", 0)).unwrap();
        store
            .transition("bob", PipelinePhase::Forked, PhaseOutcome::failed("gone"))
            .unwrap();

        let entities = vec![
            TrackedEntity::new("alice"),
            TrackedEntity::new("bob"),
            TrackedEntity::new("carol"),
        ];
        let path = temp.path().join("out").join("data.json");
        let entries = export_leaderboard(&store, &entities, &ScoringPolicy::default(), &path).unwrap();

        assert_eq!(entries.len(), 3);
        assert!(path.exists());
        let alice = entries.iter().find(|e| e.username == "alice").unwrap();
        assert_eq!(alice.sus_score_percentile, 50);
        let carol = entries.iter().find(|e| e.username == "carol").unwrap();
        assert_eq!(carol.sus_score_percentile, 100);
    }
}
