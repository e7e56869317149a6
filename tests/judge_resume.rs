//! Judge workflow resumption and its effect on the exported leaderboard.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use shamewall::config::state_dir_under;
use shamewall::domain::{EntityActivity, RepoSummary, TrackedEntity};
use shamewall::judge::{EntityOutcome, JudgeTarget, JudgeWorkflow, ReviewService, ReviewVerdict};
use shamewall::pipeline::{EntityResult, PipelineRunner, Roster, export_leaderboard};
use shamewall::remote::RemoteError;
use shamewall::retry::PollPolicy;
use shamewall::scoring::{PENDING_GRADE, PENDING_VERDICT, ReviewStatus, ScoringPolicy};
use shamewall::store::{PhaseOutcome, PipelinePhase, StateStore};
use tempfile::TempDir;
use tokio::sync::Notify;

/// Counts every remote action per entity; can be told to fail one action
/// once, or to never return from one.
#[derive(Default)]
struct CountingService {
    calls: Mutex<Vec<(String, &'static str)>>,
    fail_once: Mutex<HashMap<&'static str, RemoteError>>,
    malformed: Vec<String>,
    hang_once: Mutex<Option<&'static str>>,
    /// Signalled when a hanging action has started
    hung: Notify,
}

impl CountingService {
    fn failing_once(self, action: &'static str, error: RemoteError) -> Self {
        self.fail_once.lock().unwrap().insert(action, error);
        self
    }

    fn malformed_for(mut self, entity: &str) -> Self {
        self.malformed.push(entity.to_string());
        self
    }

    fn hanging_once(self, action: &'static str) -> Self {
        *self.hang_once.lock().unwrap() = Some(action);
        self
    }

    async fn record(&self, target: &JudgeTarget, action: &'static str) -> Result<(), RemoteError> {
        self.calls.lock().unwrap().push((target.entity_id.clone(), action));
        let hang = self.hang_once.lock().unwrap().take_if(|a| *a == action).is_some();
        if hang {
            self.hung.notify_one();
            std::future::pending::<()>().await;
        }
        match self.fail_once.lock().unwrap().remove(action) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn count(&self, action: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|(_, a)| *a == action).count()
    }

    fn actions_for(&self, entity: &str) -> Vec<&'static str> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(e, _)| e == entity)
            .map(|(_, a)| *a)
            .collect()
    }
}

#[async_trait]
impl ReviewService for CountingService {
    async fn derive_state(&self, target: &JudgeTarget) -> Result<String, RemoteError> {
        self.record(target, "derive_state").await?;
        Ok(format!("judge-bot/{}", target.repo))
    }

    async fn create_baseline(&self, target: &JudgeTarget) -> Result<String, RemoteError> {
        self.record(target, "create_baseline").await?;
        Ok("0000001".to_string())
    }

    async fn open_comparison(&self, target: &JudgeTarget) -> Result<String, RemoteError> {
        self.record(target, "open_comparison").await?;
        Ok("1".to_string())
    }

    async fn trigger_review(&self, target: &JudgeTarget) -> Result<String, RemoteError> {
        self.record(target, "trigger_review").await?;
        Ok(Utc::now().to_rfc3339())
    }

    async fn fetch_review_result(&self, target: &JudgeTarget) -> Result<Option<ReviewVerdict>, RemoteError> {
        self.record(target, "fetch_review_result").await?;
        if self.malformed.contains(&target.entity_id) {
            return Err(RemoteError::Malformed("no grade in review reply".to_string()));
        }
        Ok(Some(ReviewVerdict {
            grade: "B".to_string(),
            verdict: format!("{} writes commit messages like ransom notes.", target.login),
            badge: Some("Ransom Note".to_string()),
            raw_response: Some("**Grade**: B".to_string()),
        }))
    }

    async fn generate_summary(&self, target: &JudgeTarget, _verdict: &ReviewVerdict) -> Result<String, RemoteError> {
        self.record(target, "generate_summary").await?;
        Ok(format!("reports/{}.json", target.entity_id))
    }
}

fn activity(login: &str) -> EntityActivity {
    EntityActivity {
        login: login.to_string(),
        name: Some(login.to_uppercase()),
        bio: None,
        followers: 3,
        stars: 8,
        top_repos: vec![RepoSummary {
            name: format!("{}-site", login),
            stars: 8,
            language: Some("Rust".to_string()),
            description: None,
            default_branch: Some("main".to_string()),
            fork: false,
        }],
        commits_seen: 4,
        commit_messages: vec!["fix".to_string()],
        emoji_score: 1,
        worst_commit: None,
        fetched_at: Utc::now(),
    }
}

fn short_poll() -> PollPolicy {
    PollPolicy {
        initial_interval: Duration::from_secs(1),
        backoff_factor: 1.0,
        max_interval: Duration::from_secs(1),
        max_attempts: 2,
        max_wait: Duration::from_secs(10),
    }
}

fn workflow(service: Arc<CountingService>, store: Arc<StateStore>) -> JudgeWorkflow {
    JudgeWorkflow::new(service, store).with_poll_policy(short_poll())
}

#[tokio::test(start_paused = true)]
async fn test_rerun_after_crash_never_repeats_completed_actions() {
    let dir = TempDir::new().unwrap();
    let entity = TrackedEntity::new("alice");
    let service = Arc::new(CountingService::default().failing_once(
        "trigger_review",
        RemoteError::Permanent {
            status: 403,
            message: "comments locked".to_string(),
        },
    ));

    {
        let store = Arc::new(StateStore::open(dir.path()).unwrap());
        let outcome = workflow(service.clone(), store).advance(&entity, &activity("alice")).await.unwrap();
        assert!(matches!(
            outcome,
            EntityOutcome::Halted {
                phase: PipelinePhase::ReviewTriggered,
                ..
            }
        ));
    }

    // New process, same state directory
    let store = Arc::new(StateStore::open(dir.path()).unwrap());
    let outcome = workflow(service.clone(), store.clone())
        .advance(&entity, &activity("alice"))
        .await
        .unwrap();
    assert_eq!(outcome, EntityOutcome::Completed);

    assert_eq!(service.count("derive_state"), 1);
    assert_eq!(service.count("create_baseline"), 1);
    assert_eq!(service.count("open_comparison"), 1);
    assert_eq!(service.count("trigger_review"), 2);

    let record = store.load("alice").unwrap();
    assert_eq!(record.entry(PipelinePhase::ReviewTriggered).attempts, 2);

    // A third run has nothing left to do
    let before = service.calls.lock().unwrap().len();
    workflow(service.clone(), store).advance(&entity, &activity("alice")).await.unwrap();
    assert_eq!(service.calls.lock().unwrap().len(), before);
}

#[tokio::test(start_paused = true)]
async fn test_abort_mid_phase_resumes_without_repeating_completed_actions() {
    let dir = TempDir::new().unwrap();
    let service = Arc::new(CountingService::default().hanging_once("open_comparison"));

    {
        let store = Arc::new(StateStore::open(dir.path()).unwrap());
        let workflow = Arc::new(workflow(service.clone(), store));
        let handle = tokio::spawn({
            let workflow = workflow.clone();
            async move {
                workflow
                    .advance(&TrackedEntity::new("erin"), &activity("erin"))
                    .await
            }
        });

        // Kill the worker while the pull request call is still waiting
        service.hung.notified().await;
        handle.abort();
        assert!(handle.await.unwrap_err().is_cancelled());
    }

    let store = Arc::new(StateStore::open(dir.path()).unwrap());
    let record = store.load("erin").unwrap();
    assert_eq!(record.highest_completed(), Some(PipelinePhase::BranchCreated));
    assert!(!record.is_completed(PipelinePhase::RequestOpened));

    let outcome = workflow(service.clone(), store)
        .advance(&TrackedEntity::new("erin"), &activity("erin"))
        .await
        .unwrap();
    assert_eq!(outcome, EntityOutcome::Completed);

    assert_eq!(service.count("derive_state"), 1);
    assert_eq!(service.count("create_baseline"), 1);
    // The interrupted call never committed, so it runs again
    assert_eq!(service.count("open_comparison"), 2);
    assert_eq!(service.count("trigger_review"), 1);
    assert_eq!(service.count("fetch_review_result"), 1);
    assert_eq!(service.count("generate_summary"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_roster_edit_keeps_existing_ledger() {
    let base = TempDir::new().unwrap();
    let roster_path = base.path().join("usernames.txt");
    std::fs::write(&roster_path, "alice\nbob\n").unwrap();

    {
        let store = StateStore::open(&state_dir_under(base.path(), &roster_path)).unwrap();
        for (phase, reference) in [
            (PipelinePhase::Forked, "judge-bot/alice-site"),
            (PipelinePhase::BranchCreated, "0000001"),
            (PipelinePhase::RequestOpened, "4"),
            (PipelinePhase::ReviewTriggered, "2026-01-01T00:00:00+00:00"),
        ] {
            store.transition("alice", phase, PhaseOutcome::completed(reference)).unwrap();
        }
    }

    std::fs::write(&roster_path, "alice\nbob\n# late signup below\ncarol\n").unwrap();
    let roster = Roster::load(&roster_path).unwrap();
    assert_eq!(roster.entities.len(), 3);

    let store = Arc::new(StateStore::open(&state_dir_under(base.path(), &roster_path)).unwrap());
    let record = store.load("alice").unwrap();
    assert!(!record.is_untouched());
    assert_eq!(record.next_phase(), Some(PipelinePhase::ReviewReceived));

    let service = Arc::new(CountingService::default());
    workflow(service.clone(), store)
        .advance(&roster.entities[0], &activity("alice"))
        .await
        .unwrap();
    assert_eq!(service.actions_for("alice"), vec!["fetch_review_result", "generate_summary"]);
}

#[tokio::test(start_paused = true)]
async fn test_resume_from_triggered_review_polls_then_summarizes() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(StateStore::open(dir.path()).unwrap());
    let refs = [
        (PipelinePhase::Forked, "judge-bot/bob-site"),
        (PipelinePhase::BranchCreated, "0000001"),
        (PipelinePhase::RequestOpened, "4"),
        (PipelinePhase::ReviewTriggered, "2026-01-01T00:00:00+00:00"),
    ];
    for (phase, reference) in refs {
        store.transition("bob", phase, PhaseOutcome::completed(reference)).unwrap();
    }

    let service = Arc::new(CountingService::default());
    let outcome = workflow(service.clone(), store.clone())
        .advance(&TrackedEntity::new("bob"), &activity("bob"))
        .await
        .unwrap();

    assert_eq!(outcome, EntityOutcome::Completed);
    assert_eq!(service.actions_for("bob"), vec!["fetch_review_result", "generate_summary"]);
    let record = store.load("bob").unwrap();
    assert_eq!(record.reference(PipelinePhase::ReportGenerated), Some("reports/bob.json"));
    let received: serde_json::Value =
        serde_json::from_str(record.reference(PipelinePhase::ReviewReceived).unwrap()).unwrap();
    assert_eq!(received["raw_response"], "**Grade**: B");
}

#[tokio::test(start_paused = true)]
async fn test_malformed_review_exports_pending_and_run_continues() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(StateStore::open(dir.path()).unwrap());
    for login in ["alice", "bob", "carol"] {
        store.save_activity(&activity(login)).unwrap();
    }

    let service = Arc::new(CountingService::default().malformed_for("bob"));
    let runner = PipelineRunner::new(store.clone(), 2).with_workflow(Arc::new(workflow(service.clone(), store.clone())));
    let entities = vec![
        TrackedEntity::new("alice"),
        TrackedEntity::new("bob"),
        TrackedEntity::new("carol"),
    ];
    let summary = runner.run(&entities).await.unwrap();

    assert_eq!(summary.reports[0].result, EntityResult::Judged(EntityOutcome::Completed));
    assert!(matches!(
        summary.reports[1].result,
        EntityResult::Judged(EntityOutcome::PendingReview { .. })
    ));
    assert_eq!(summary.reports[2].result, EntityResult::Judged(EntityOutcome::Completed));

    let record = store.load("bob").unwrap();
    let (phase, entry) = record.failed_phase().unwrap();
    assert_eq!(phase, PipelinePhase::ReviewReceived);
    assert!(entry.last_error.as_deref().unwrap().contains("no grade"));

    let path = dir.path().join("data.json");
    let entries = export_leaderboard(&store, &entities, &ScoringPolicy::default(), &path).unwrap();
    let bob = entries.iter().find(|e| e.username == "bob").unwrap();
    assert_eq!(bob.quality_grade, PENDING_GRADE);
    assert_eq!(bob.verdict, PENDING_VERDICT);
    assert_eq!(bob.review_status, ReviewStatus::Pending);
    assert_eq!(bob.coderabbit_badge, None);

    let alice = entries.iter().find(|e| e.username == "alice").unwrap();
    assert_eq!(alice.review_status, ReviewStatus::Judged);
    assert_eq!(alice.raw_grade.as_deref(), Some("B"));
    assert_ne!(alice.quality_grade, PENDING_GRADE);
    assert_eq!(alice.coderabbit_badge.as_deref(), Some("Ransom Note"));

    let written: serde_json::Value = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
    assert_eq!(written.as_array().unwrap().len(), 3);
}

#[test]
fn test_out_of_order_transition_is_rejected() {
    let dir = TempDir::new().unwrap();
    let store = StateStore::open(dir.path()).unwrap();
    store
        .transition("dave", PipelinePhase::Forked, PhaseOutcome::completed("judge-bot/x"))
        .unwrap();

    let err = store
        .transition("dave", PipelinePhase::ReviewTriggered, PhaseOutcome::completed("now"))
        .unwrap_err();
    assert!(err.is_run_fatal());
    assert!(!store.load("dave").unwrap().is_completed(PipelinePhase::ReviewTriggered));
}
