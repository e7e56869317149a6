//! Local scores and the final leaderboard.
//!
//! - `emoji` / `toxicity`: per-message signals computed at fetch time
//! - `aggregate`: percentile ranks and the curved grade distribution
//! - `export`: assembly and atomic write of the leaderboard file

pub mod aggregate;
pub mod emoji;
pub mod export;
pub mod toxicity;

pub use aggregate::{CurveStep, PENDING_GRADE, PENDING_VERDICT, ScoringPolicy, clean_verdict, percentile, percentile_ranks};
pub use emoji::{count_emojis, emoji_score};
pub use export::{LeaderboardEntry, ReviewStatus, TopRepo, build_leaderboard, write_leaderboard};
pub use toxicity::{LexiconScorer, ToxicityScorer, find_worst_commit};
