//! Whole-roster runs: load the roster, work through it, export the result.

pub mod roster;
pub mod runner;

pub use roster::Roster;
pub use runner::{EntityReport, EntityResult, PipelineRunner, RunSummary, export_leaderboard};
