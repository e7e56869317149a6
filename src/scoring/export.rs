//! Final per-entity leaderboard records and the export file.

use std::collections::HashMap;
use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::domain::{EntityActivity, Role, TrackedEntity};
use crate::error::Result;
use crate::judge::ReviewVerdict;
use crate::scoring::aggregate::{PENDING_GRADE, ScoringPolicy, clean_verdict, percentile_ranks};
use crate::store::{PhaseRecord, PhaseStatus, PipelinePhase};

/// Where an entity's review stands at export time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewStatus {
    Judged,
    Pending,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopRepo {
    pub name: String,
    pub stars: u64,
    pub language: Option<String>,
    pub description: Option<String>,
}

/// One row of the exported leaderboard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub username: String,
    pub name: String,
    pub bio: String,
    pub role: Role,
    pub avatar_url: String,
    pub stars: u64,
    pub commits: u64,
    pub followers: u64,
    pub top_repo: Option<TopRepo>,
    /// Curved grade, or `Pending`
    pub quality_grade: String,
    /// Grade as the reviewer gave it
    pub raw_grade: Option<String>,
    pub verdict: String,
    pub coderabbit_badge: Option<String>,
    pub review_status: ReviewStatus,
    pub sus_score_percentile: u32,
    pub worst_commit_msg: String,
    pub worst_commit_toxicity: f64,
    pub emoji_score: u64,
}

fn review_status(record: Option<&PhaseRecord>, activity: Option<&EntityActivity>) -> ReviewStatus {
    if activity.is_some_and(|a| a.judged_repo().is_none()) {
        return ReviewStatus::Skipped;
    }
    let Some(record) = record else {
        return ReviewStatus::Pending;
    };
    if record.is_completed(PipelinePhase::ReviewReceived) {
        return ReviewStatus::Judged;
    }
    match record.failed_phase() {
        Some((phase, _)) if phase < PipelinePhase::ReviewReceived => ReviewStatus::Failed,
        _ => ReviewStatus::Pending,
    }
}

fn parse_verdict(record: Option<&PhaseRecord>) -> Option<ReviewVerdict> {
    let reference = record?.reference(PipelinePhase::ReviewReceived)?;
    match serde_json::from_str(reference) {
        Ok(verdict) => Some(verdict),
        Err(e) => {
            log::warn!("Unreadable review verdict in ledger: {}", e);
            None
        }
    }
}

/// Assemble the leaderboard for every roster entity.
///
/// Entities missing activity or a review still get a row, with placeholders.
pub fn build_leaderboard(
    entities: &[TrackedEntity],
    activities: &HashMap<String, EntityActivity>,
    records: &HashMap<String, PhaseRecord>,
    policy: &ScoringPolicy,
) -> Vec<LeaderboardEntry> {
    let verdicts: HashMap<String, ReviewVerdict> = entities
        .iter()
        .filter_map(|e| {
            let record = records.get(&e.id());
            if record.map(|r| r.status(PipelinePhase::ReviewReceived)) != Some(PhaseStatus::Completed) {
                return None;
            }
            parse_verdict(record).map(|v| (e.id(), v))
        })
        .collect();

    let raw_grades: Vec<(String, Option<String>)> = entities
        .iter()
        .map(|e| (e.id(), verdicts.get(&e.id()).map(|v| v.grade.clone())))
        .collect();
    let curved = policy.curve_grades(&raw_grades);

    let signals: Vec<(String, Option<u64>)> = entities
        .iter()
        .map(|e| (e.id(), activities.get(&e.id()).map(|a| a.emoji_score)))
        .collect();
    let sus = percentile_ranks(&signals);

    entities
        .iter()
        .map(|entity| {
            let id = entity.id();
            let activity = activities.get(&id);
            let record = records.get(&id);
            let verdict = verdicts.get(&id);
            let graded = verdict.is_some_and(|v| policy.is_known_grade(&v.grade));

            let mut status = review_status(record, activity);
            if status == ReviewStatus::Judged && verdict.is_none() {
                status = ReviewStatus::Pending;
            }

            LeaderboardEntry {
                username: entity.login.clone(),
                name: activity
                    .and_then(|a| a.name.clone())
                    .filter(|n| !n.is_empty())
                    .unwrap_or_else(|| entity.login.clone()),
                bio: activity.and_then(|a| a.bio.clone()).unwrap_or_default(),
                role: entity.role,
                avatar_url: format!("https://github.com/{}.png", entity.login),
                stars: activity.map(|a| a.stars).unwrap_or(0),
                commits: activity.map(|a| a.commits_seen).unwrap_or(0),
                followers: activity.map(|a| a.followers).unwrap_or(0),
                top_repo: activity.and_then(|a| a.judged_repo()).map(|r| TopRepo {
                    name: r.name.clone(),
                    stars: r.stars,
                    language: r.language.clone(),
                    description: r.description.clone(),
                }),
                quality_grade: curved.get(&id).cloned().unwrap_or_else(|| PENDING_GRADE.to_string()),
                raw_grade: verdict.map(|v| v.grade.clone()),
                verdict: clean_verdict(verdict.map(|v| v.verdict.as_str()).unwrap_or("")),
                coderabbit_badge: if graded { verdict.and_then(|v| v.badge.clone()) } else { None },
                review_status: status,
                sus_score_percentile: sus.get(&id).copied().unwrap_or(0),
                worst_commit_msg: activity
                    .and_then(|a| a.worst_commit.as_ref())
                    .map(|w| w.message.clone())
                    .unwrap_or_default(),
                worst_commit_toxicity: activity
                    .and_then(|a| a.worst_commit.as_ref())
                    .map(|w| w.score)
                    .unwrap_or(0.0),
                emoji_score: activity.map(|a| a.emoji_score).unwrap_or(0),
            }
        })
        .collect()
}

/// Write the leaderboard as a pretty JSON array, replacing `path` atomically.
pub fn write_leaderboard(path: &Path, entries: &[LeaderboardEntry]) -> Result<()> {
    let data = serde_json::to_vec_pretty(entries)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(&data)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;

    log::info!("Exported {} entries to {}", entries.len(), path.display());
    Ok(())
}
