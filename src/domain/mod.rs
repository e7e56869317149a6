//! Domain types for shamewall
//!
//! - TrackedEntity: a roster login and its role
//! - EntityActivity: what was collected for an entity, plus local scores

pub mod activity;
pub mod entity;

pub use activity::{EntityActivity, RepoSummary, WorstCommit};
pub use entity::{Role, TrackedEntity};
