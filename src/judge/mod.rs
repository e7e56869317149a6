//! The judge workflow: fork, baseline, pull request, review, report.
//!
//! - **service**: the [`ReviewService`] contract and [`ReviewVerdict`]
//! - **workflow**: the resumable per-entity state machine
//! - **parse**: reading grades out of review replies
//! - **github**: the GitHub/CodeRabbit implementation of the service

pub mod github;
pub mod parse;
pub mod service;
pub mod workflow;

pub use github::GitHubReviewService;
pub use parse::ReviewParser;
pub use service::{JudgeTarget, ReviewService, ReviewVerdict};
pub use workflow::{EntityOutcome, JudgeWorkflow};
