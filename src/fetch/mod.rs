//! Paginated collection from the source platform.
//!
//! - **source**: the [`PageSource`] collaborator contract and item payloads
//! - **orchestrator**: credential-rotating, resumable paging over a source
//! - **github**: the REST implementation of [`PageSource`]

pub mod github;
pub mod orchestrator;
pub mod source;

pub use github::GitHubSource;
pub use orchestrator::FetchOrchestrator;
pub use source::{CollectionKind, CollectionSpec, CommitItem, Page, PageRequest, PageSource, ProfileItem, RepoItem};
