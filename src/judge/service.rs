//! The review service contract driven by the judge workflow.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::{RepoSummary, TrackedEntity};
use crate::remote::RemoteError;
use crate::store::{PhaseRecord, PipelinePhase};

/// The reviewer's judgment, stored as the `ReviewReceived` reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewVerdict {
    pub grade: String,
    pub verdict: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub badge: Option<String>,
    /// The reply the verdict was read from, truncated
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_response: Option<String>,
}

impl ReviewVerdict {
    pub fn with_raw_response(mut self, raw: impl Into<String>) -> Self {
        self.raw_response = Some(raw.into());
        self
    }
}

/// Everything a phase action needs: who, which repository, and the
/// references recorded by the phases before it.
#[derive(Debug, Clone, PartialEq)]
pub struct JudgeTarget {
    pub entity_id: String,
    pub login: String,
    pub repo: String,
    pub default_branch: Option<String>,
    refs: BTreeMap<PipelinePhase, String>,
}

impl JudgeTarget {
    pub fn new(entity: &TrackedEntity, repo: &RepoSummary) -> Self {
        Self {
            entity_id: entity.id(),
            login: entity.login.clone(),
            repo: repo.name.clone(),
            default_branch: repo.default_branch.clone(),
            refs: BTreeMap::new(),
        }
    }

    /// Carry over the references of every completed phase.
    pub fn with_record(mut self, record: &PhaseRecord) -> Self {
        self.refs = PipelinePhase::ALL
            .iter()
            .filter_map(|phase| record.reference(*phase).map(|r| (*phase, r.to_string())))
            .collect();
        self
    }

    pub fn with_reference(mut self, phase: PipelinePhase, reference: impl Into<String>) -> Self {
        self.refs.insert(phase, reference.into());
        self
    }

    pub fn reference(&self, phase: PipelinePhase) -> Option<&str> {
        self.refs.get(&phase).map(|s| s.as_str())
    }

    /// Reference of an earlier phase; its absence means the ledger and the
    /// caller disagree, so the action cannot proceed.
    pub fn require(&self, phase: PipelinePhase) -> Result<&str, RemoteError> {
        self.reference(phase)
            .ok_or_else(|| RemoteError::Malformed(format!("missing {} reference for {}", phase, self.entity_id)))
    }
}

/// Remote actions behind each judge phase.
///
/// Every method returns the reference recorded for its phase. Implementations
/// should reuse existing remote state (forks, branches, open requests) where
/// possible, since a phase may run again after a crash between the remote
/// call and the ledger write.
#[async_trait]
pub trait ReviewService: Send + Sync {
    /// Fork the judged repository; returns the fork's full name.
    async fn derive_state(&self, target: &JudgeTarget) -> Result<String, RemoteError>;

    /// Point the baseline branch at the fork's oldest commit; returns its sha.
    async fn create_baseline(&self, target: &JudgeTarget) -> Result<String, RemoteError>;

    /// Open the comparison request; returns its number.
    async fn open_comparison(&self, target: &JudgeTarget) -> Result<String, RemoteError>;

    /// Ask for a review; returns the trigger time as RFC 3339.
    async fn trigger_review(&self, target: &JudgeTarget) -> Result<String, RemoteError>;

    /// `Ok(None)` while the review has not arrived; `Malformed` when it
    /// arrived but carries no usable grade.
    async fn fetch_review_result(&self, target: &JudgeTarget) -> Result<Option<ReviewVerdict>, RemoteError>;

    /// Request the summary report; returns where it was stored.
    async fn generate_summary(&self, target: &JudgeTarget, verdict: &ReviewVerdict) -> Result<String, RemoteError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::PhaseOutcome;
    use chrono::Utc;

    fn repo() -> RepoSummary {
        RepoSummary {
            name: "dotfiles".to_string(),
            stars: 3,
            language: None,
            description: None,
            default_branch: Some("main".to_string()),
            fork: false,
        }
    }

    #[test]
    fn test_target_carries_completed_references() {
        let entity = TrackedEntity::new("OctoCat");
        let mut record = PhaseRecord::new(entity.id());
        record
            .apply(PipelinePhase::Forked, PhaseOutcome::completed("bot/dotfiles"), Utc::now())
            .unwrap();

        let target = JudgeTarget::new(&entity, &repo()).with_record(&record);
        assert_eq!(target.entity_id, "octocat");
        assert_eq!(target.login, "OctoCat");
        assert_eq!(target.require(PipelinePhase::Forked).unwrap(), "bot/dotfiles");
        assert!(matches!(
            target.require(PipelinePhase::BranchCreated),
            Err(RemoteError::Malformed(_))
        ));
    }

    #[test]
    fn test_verdict_badge_optional_in_json() {
        let verdict: ReviewVerdict = serde_json::from_str(r#"{"grade":"C","verdict":"meh"}"#).unwrap();
        assert_eq!(verdict.badge, None);
        let json = serde_json::to_string(&verdict).unwrap();
        assert!(!json.contains("badge"));
    }
}
