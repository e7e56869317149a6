//! Activity collected for one entity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A repository owned by the entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepoSummary {
    pub name: String,
    pub stars: u64,
    pub language: Option<String>,
    pub description: Option<String>,
    pub default_branch: Option<String>,
    pub fork: bool,
}

/// The most toxic commit message seen for an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorstCommit {
    pub message: String,
    /// Axis that produced the score, e.g. `insult`
    pub axis: String,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityActivity {
    pub login: String,
    pub name: Option<String>,
    pub bio: Option<String>,
    pub followers: u64,
    /// Sum of stars over fetched repositories
    pub stars: u64,
    /// Owned repositories, most starred first
    pub top_repos: Vec<RepoSummary>,
    pub commits_seen: u64,
    /// Messages of commits authored by this entity
    pub commit_messages: Vec<String>,
    pub emoji_score: u64,
    pub worst_commit: Option<WorstCommit>,
    pub fetched_at: DateTime<Utc>,
}

impl EntityActivity {
    /// The repository that gets forked and reviewed.
    pub fn judged_repo(&self) -> Option<&RepoSummary> {
        self.top_repos.first()
    }
}
