//! Record types persisted by the state store.
//!
//! - `PhaseRecord`: per-entity ledger of judge workflow phases
//! - `FetchCursor`: per-entity, per-collection pagination position

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, WallError};

/// One ordered step of the judge workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelinePhase {
    Forked,
    BranchCreated,
    RequestOpened,
    ReviewTriggered,
    ReviewReceived,
    ReportGenerated,
}

impl PipelinePhase {
    /// All phases in execution order.
    pub const ALL: [PipelinePhase; 6] = [
        PipelinePhase::Forked,
        PipelinePhase::BranchCreated,
        PipelinePhase::RequestOpened,
        PipelinePhase::ReviewTriggered,
        PipelinePhase::ReviewReceived,
        PipelinePhase::ReportGenerated,
    ];

    pub fn index(&self) -> usize {
        *self as usize
    }

    pub fn first() -> Self {
        PipelinePhase::Forked
    }

    /// The phase after this one, if any.
    pub fn next(&self) -> Option<Self> {
        Self::ALL.get(self.index() + 1).copied()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PipelinePhase::Forked => "forked",
            PipelinePhase::BranchCreated => "branch_created",
            PipelinePhase::RequestOpened => "request_opened",
            PipelinePhase::ReviewTriggered => "review_triggered",
            PipelinePhase::ReviewReceived => "review_received",
            PipelinePhase::ReportGenerated => "report_generated",
        }
    }
}

impl fmt::Display for PipelinePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for PipelinePhase {
    type Err = WallError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| WallError::Config(format!("unknown phase: {}", s)))
    }
}

/// Status of one phase in a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PhaseStatus {
    #[default]
    Pending,
    Completed,
    Failed,
}

impl PhaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PhaseStatus::Pending => "pending",
            PhaseStatus::Completed => "completed",
            PhaseStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for PhaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What happened when a phase was attempted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhaseOutcome {
    /// The remote action succeeded; `remote_ref` is what it returned.
    Completed { remote_ref: String },
    /// The remote action failed or could not be verified.
    Failed { error: String },
}

impl PhaseOutcome {
    pub fn completed(remote_ref: impl Into<String>) -> Self {
        PhaseOutcome::Completed {
            remote_ref: remote_ref.into(),
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        PhaseOutcome::Failed { error: error.into() }
    }
}

/// Ledger entry for one phase.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PhaseEntry {
    pub status: PhaseStatus,
    /// Opaque id returned by the remote action (fork name, PR number, ...)
    pub remote_ref: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    /// How many times this phase has been attempted across runs
    pub attempts: u32,
}

/// Per-entity ledger of which judge phases have happened remotely.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseRecord {
    pub entity_id: String,
    pub phases: BTreeMap<PipelinePhase, PhaseEntry>,
    pub updated_at: DateTime<Utc>,
}

impl PhaseRecord {
    /// An empty record: every phase pending.
    pub fn new(entity_id: impl Into<String>) -> Self {
        Self {
            entity_id: entity_id.into(),
            phases: PipelinePhase::ALL.iter().map(|p| (*p, PhaseEntry::default())).collect(),
            updated_at: Utc::now(),
        }
    }

    pub fn entry(&self, phase: PipelinePhase) -> PhaseEntry {
        self.phases.get(&phase).cloned().unwrap_or_default()
    }

    pub fn status(&self, phase: PipelinePhase) -> PhaseStatus {
        self.phases.get(&phase).map(|e| e.status).unwrap_or_default()
    }

    pub fn is_completed(&self, phase: PipelinePhase) -> bool {
        self.status(phase) == PhaseStatus::Completed
    }

    pub fn reference(&self, phase: PipelinePhase) -> Option<&str> {
        self.phases.get(&phase).and_then(|e| e.remote_ref.as_deref())
    }

    /// The last phase of the contiguous completed prefix.
    pub fn highest_completed(&self) -> Option<PipelinePhase> {
        PipelinePhase::ALL
            .iter()
            .copied()
            .take_while(|p| self.is_completed(*p))
            .last()
    }

    /// The only phase `transition` will currently accept.
    pub fn next_phase(&self) -> Option<PipelinePhase> {
        match self.highest_completed() {
            Some(p) => p.next(),
            None => Some(PipelinePhase::first()),
        }
    }

    /// The phase that halted the workflow, if the last attempt failed.
    pub fn failed_phase(&self) -> Option<(PipelinePhase, &PhaseEntry)> {
        self.phases.iter().find(|(_, e)| e.status == PhaseStatus::Failed).map(|(p, e)| (*p, e))
    }

    pub fn is_untouched(&self) -> bool {
        self.phases.values().all(|e| e.status == PhaseStatus::Pending)
    }

    /// Apply an outcome, enforcing strict phase order.
    ///
    /// A completed phase is never rewritten, and only the immediate successor
    /// of the completed prefix may move. Failed phases may be re-attempted.
    pub fn apply(&mut self, phase: PipelinePhase, outcome: PhaseOutcome, now: DateTime<Utc>) -> Result<()> {
        let expected = self.next_phase();
        if expected != Some(phase) {
            return Err(WallError::SequenceViolation {
                entity: self.entity_id.clone(),
                attempted: phase,
                expected,
            });
        }

        let entry = self.phases.entry(phase).or_default();
        entry.attempts += 1;
        match outcome {
            PhaseOutcome::Completed { remote_ref } => {
                entry.status = PhaseStatus::Completed;
                entry.remote_ref = Some(remote_ref);
                entry.completed_at = Some(now);
                entry.last_error = None;
            }
            PhaseOutcome::Failed { error } => {
                entry.status = PhaseStatus::Failed;
                entry.last_error = Some(error);
            }
        }
        self.updated_at = now;
        Ok(())
    }
}

/// A single collected item, keyed for de-duplication.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    /// Stable identity (commit sha, repository name, login)
    pub key: String,
    pub payload: serde_json::Value,
}

impl Item {
    pub fn new(key: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            key: key.into(),
            payload,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CursorStatus {
    #[default]
    InProgress,
    Complete,
    Failed,
}

/// Durable pagination position for one entity's collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchCursor {
    pub entity_id: String,
    /// Collection label, e.g. `repositories` or `commits:my-repo`
    pub collection: String,
    /// Token for the next page to request; `None` means the first page
    pub page_token: Option<String>,
    pub pages_fetched: u32,
    pub items: Vec<Item>,
    pub status: CursorStatus,
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl FetchCursor {
    pub fn new(entity_id: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            entity_id: entity_id.into(),
            collection: collection.into(),
            page_token: None,
            pages_fetched: 0,
            items: Vec::new(),
            status: CursorStatus::InProgress,
            last_error: None,
            updated_at: Utc::now(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.status == CursorStatus::Complete
    }

    /// Append a page, dropping items whose key is already present.
    ///
    /// Returns the items that were new, in page order.
    pub fn merge_page(&mut self, items: Vec<Item>, cap: Option<usize>) -> Vec<Item> {
        let mut seen: HashSet<String> = self.items.iter().map(|i| i.key.clone()).collect();
        let mut fresh = Vec::new();
        for item in items {
            if cap.is_some_and(|c| self.items.len() >= c) {
                break;
            }
            if seen.insert(item.key.clone()) {
                self.items.push(item.clone());
                fresh.push(item);
            }
        }
        self.pages_fetched += 1;
        self.updated_at = Utc::now();
        fresh
    }

    pub fn reached_cap(&self, cap: Option<usize>) -> bool {
        cap.is_some_and(|c| self.items.len() >= c)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_phase_order() {
        assert_eq!(PipelinePhase::Forked.next(), Some(PipelinePhase::BranchCreated));
        assert_eq!(PipelinePhase::ReviewReceived.next(), Some(PipelinePhase::ReportGenerated));
        assert_eq!(PipelinePhase::ReportGenerated.next(), None);
        assert!(PipelinePhase::Forked < PipelinePhase::ReportGenerated);
    }

    #[test]
    fn test_phase_from_str() {
        assert_eq!("review_received".parse::<PipelinePhase>().unwrap(), PipelinePhase::ReviewReceived);
        assert!("reviewed".parse::<PipelinePhase>().is_err());
    }

    #[test]
    fn test_new_record_is_all_pending() {
        let record = PhaseRecord::new("octocat");
        assert!(record.is_untouched());
        assert_eq!(record.highest_completed(), None);
        assert_eq!(record.next_phase(), Some(PipelinePhase::Forked));
    }

    #[test]
    fn test_apply_in_order() {
        let mut record = PhaseRecord::new("octocat");
        let now = Utc::now();
        record
            .apply(PipelinePhase::Forked, PhaseOutcome::completed("me/repo"), now)
            .unwrap();
        record
            .apply(PipelinePhase::BranchCreated, PhaseOutcome::completed("abc123"), now)
            .unwrap();

        assert_eq!(record.highest_completed(), Some(PipelinePhase::BranchCreated));
        assert_eq!(record.next_phase(), Some(PipelinePhase::RequestOpened));
        assert_eq!(record.reference(PipelinePhase::Forked), Some("me/repo"));
        assert_eq!(record.entry(PipelinePhase::Forked).attempts, 1);
        assert!(record.entry(PipelinePhase::Forked).completed_at.is_some());
    }

    #[test]
    fn test_apply_out_of_order_is_violation() {
        let mut record = PhaseRecord::new("octocat");
        let err = record
            .apply(PipelinePhase::ReviewTriggered, PhaseOutcome::completed("x"), Utc::now())
            .unwrap_err();
        assert!(matches!(
            err,
            WallError::SequenceViolation {
                attempted: PipelinePhase::ReviewTriggered,
                expected: Some(PipelinePhase::Forked),
                ..
            }
        ));
        assert!(record.is_untouched());
    }

    #[test]
    fn test_completed_phase_cannot_be_rewritten() {
        let mut record = PhaseRecord::new("octocat");
        record
            .apply(PipelinePhase::Forked, PhaseOutcome::completed("me/repo"), Utc::now())
            .unwrap();
        let err = record
            .apply(PipelinePhase::Forked, PhaseOutcome::failed("again"), Utc::now())
            .unwrap_err();
        assert!(matches!(err, WallError::SequenceViolation { .. }));
        assert_eq!(record.status(PipelinePhase::Forked), PhaseStatus::Completed);
    }

    #[test]
    fn test_failed_phase_can_be_reattempted() {
        let mut record = PhaseRecord::new("octocat");
        record
            .apply(PipelinePhase::Forked, PhaseOutcome::failed("502"), Utc::now())
            .unwrap();
        assert_eq!(record.failed_phase().map(|(p, _)| p), Some(PipelinePhase::Forked));
        assert_eq!(record.next_phase(), Some(PipelinePhase::Forked));

        record
            .apply(PipelinePhase::Forked, PhaseOutcome::completed("me/repo"), Utc::now())
            .unwrap();
        let entry = record.entry(PipelinePhase::Forked);
        assert_eq!(entry.status, PhaseStatus::Completed);
        assert_eq!(entry.attempts, 2);
        assert_eq!(entry.last_error, None);
        assert!(record.failed_phase().is_none());
    }

    #[test]
    fn test_phase_record_json_keys() {
        let record = PhaseRecord::new("octocat");
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["phases"]["review_received"]["status"], "pending");
    }

    #[test]
    fn test_cursor_merge_dedups_by_key() {
        let mut cursor = FetchCursor::new("octocat", "repositories");
        let fresh = cursor.merge_page(
            vec![Item::new("a", json!(1)), Item::new("b", json!(2))],
            None,
        );
        assert_eq!(fresh.len(), 2);

        let fresh = cursor.merge_page(
            vec![Item::new("b", json!(2)), Item::new("c", json!(3))],
            None,
        );
        assert_eq!(fresh.len(), 1);
        assert_eq!(fresh[0].key, "c");
        assert_eq!(cursor.items.len(), 3);
        assert_eq!(cursor.pages_fetched, 2);
    }

    #[test]
    fn test_cursor_merge_respects_cap() {
        let mut cursor = FetchCursor::new("octocat", "commits:repo");
        let items = (0..10).map(|i| Item::new(i.to_string(), json!(i))).collect();
        let fresh = cursor.merge_page(items, Some(4));
        assert_eq!(fresh.len(), 4);
        assert!(cursor.reached_cap(Some(4)));
        assert!(!cursor.reached_cap(None));
    }
}
