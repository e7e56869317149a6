//! Percentile ranks and the curved grade distribution.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Grade shown for an entity whose review never arrived.
pub const PENDING_GRADE: &str = "Pending";
pub const PENDING_VERDICT: &str = "Pending review...";
const RATE_LIMITED_VERDICT: &str = "CodeRabbit was rate-limited. Awaiting judgment...";

/// One step of the curve: percentiles at or below `cutoff` get `grade`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurveStep {
    pub cutoff: f64,
    pub grade: String,
}

impl CurveStep {
    fn new(cutoff: f64, grade: &str) -> Self {
        Self {
            cutoff,
            grade: grade.to_string(),
        }
    }
}

/// Ranking policy for the aggregator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringPolicy {
    /// Recognized raw grades, worst first
    pub grades: Vec<String>,
    /// Curve steps in ascending cutoff order
    pub curve: Vec<CurveStep>,
    /// Grade for percentiles above the last cutoff
    pub top_grade: String,
}

impl Default for ScoringPolicy {
    fn default() -> Self {
        let grades = [
            "F-", "F", "F+", "D-", "D", "D+", "C-", "C", "C+", "B-", "B", "B+", "A-", "A", "A+",
        ];
        Self {
            grades: grades.iter().map(|g| g.to_string()).collect(),
            curve: vec![
                CurveStep::new(3.0, "F"),
                CurveStep::new(8.0, "D-"),
                CurveStep::new(15.0, "D"),
                CurveStep::new(23.0, "D+"),
                CurveStep::new(35.0, "C-"),
                CurveStep::new(50.0, "C"),
                CurveStep::new(65.0, "C+"),
                CurveStep::new(77.0, "B-"),
                CurveStep::new(88.0, "B"),
                CurveStep::new(95.0, "B+"),
                CurveStep::new(99.0, "A-"),
                CurveStep::new(100.0, "A"),
            ],
            top_grade: "A+".to_string(),
        }
    }
}

impl ScoringPolicy {
    /// Position of a raw grade on the scale; unknown grades are `None`.
    pub fn grade_rank(&self, grade: &str) -> Option<usize> {
        let grade = grade.trim();
        self.grades.iter().position(|g| g == grade)
    }

    pub fn is_known_grade(&self, grade: &str) -> bool {
        self.grade_rank(grade).is_some()
    }

    /// Curved grade for a percentile in `0.0..=100.0`.
    pub fn grade_for_percentile(&self, percentile: f64) -> &str {
        self.curve
            .iter()
            .find(|step| percentile <= step.cutoff)
            .map(|step| step.grade.as_str())
            .unwrap_or(self.top_grade.as_str())
    }

    /// Curve every entity's raw grade.
    ///
    /// All entities take part in the ranking; entities without a recognized grade
    /// rank below every graded entity and keep [`PENDING_GRADE`].
    pub fn curve_grades(&self, raw: &[(String, Option<String>)]) -> HashMap<String, String> {
        let mut ranked: Vec<(&str, Option<usize>)> = raw
            .iter()
            .map(|(id, grade)| (id.as_str(), grade.as_deref().and_then(|g| self.grade_rank(g))))
            .collect();
        ranked.sort_by_key(|(_, rank)| *rank);

        let n = ranked.len();
        ranked
            .into_iter()
            .enumerate()
            .map(|(position, (id, rank))| {
                let grade = match rank {
                    Some(_) => self.grade_for_percentile(percentile(position, n)).to_string(),
                    None => PENDING_GRADE.to_string(),
                };
                (id.to_string(), grade)
            })
            .collect()
    }
}

/// Percentile of a 0-based rank among `n` entries: 0 is the lowest, 100 the highest.
pub fn percentile(rank: usize, n: usize) -> f64 {
    rank as f64 / n.saturating_sub(1).max(1) as f64 * 100.0
}

/// Integer percentile of each entity's signal, ascending.
///
/// A higher signal is worse. Entities without the signal take the worst
/// case and rank above every real value.
pub fn percentile_ranks(signals: &[(String, Option<u64>)]) -> HashMap<String, u32> {
    let mut sorted: Vec<&(String, Option<u64>)> = signals.iter().collect();
    sorted.sort_by_key(|(_, value)| (value.is_none(), *value));

    let n = sorted.len();
    sorted
        .into_iter()
        .enumerate()
        .map(|(rank, (id, _))| (id.clone(), percentile(rank, n) as u32))
        .collect()
}

static HTML_COMMENT_RE: OnceLock<Regex> = OnceLock::new();

/// Strip HTML comments and rate-limit noise from a review verdict.
pub fn clean_verdict(verdict: &str) -> String {
    if verdict.trim().is_empty() {
        return PENDING_VERDICT.to_string();
    }
    if verdict.contains("Rate Limit Exceeded") {
        return RATE_LIMITED_VERDICT.to_string();
    }

    let re = HTML_COMMENT_RE.get_or_init(|| Regex::new(r"(?s)<!--.*?-->").expect("comment pattern is valid"));
    let cleaned = re.replace_all(verdict, "");
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        PENDING_VERDICT.to_string()
    } else {
        cleaned.to_string()
    }
}
