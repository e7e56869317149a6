//! Shamewall - collect, judge and rank developer activity
//!
//! Shamewall pages through each roster entity's GitHub activity with a pool of
//! rate-limited tokens, drives a resumable review workflow (fork, baseline
//! branch, pull request, bot review, report) per entity, and ranks the results
//! into a curved leaderboard.

pub mod config;
pub mod credentials;
pub mod domain;
pub mod error;
pub mod fetch;
pub mod github;
pub mod judge;
pub mod pipeline;
pub mod remote;
pub mod retry;
pub mod scoring;
pub mod shutdown;
pub mod store;

pub use error::{Result, WallError};
