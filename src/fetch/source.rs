//! The source-platform collaborator: one page in, items and a next token out.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::credentials::{Credential, QuotaMeta};
use crate::remote::RemoteError;
use crate::store::Item;

/// Which collection of an entity is being paged.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CollectionKind {
    Profile,
    Repositories,
    /// Commits of one repository owned by the entity
    Commits { repo: String },
}

/// A collection plus the cap on how many items to keep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionSpec {
    pub kind: CollectionKind,
    pub item_cap: Option<usize>,
}

impl CollectionSpec {
    pub fn profile() -> Self {
        Self {
            kind: CollectionKind::Profile,
            item_cap: Some(1),
        }
    }

    pub fn repositories(cap: usize) -> Self {
        Self {
            kind: CollectionKind::Repositories,
            item_cap: Some(cap),
        }
    }

    pub fn commits(repo: impl Into<String>, cap: usize) -> Self {
        Self {
            kind: CollectionKind::Commits { repo: repo.into() },
            item_cap: Some(cap),
        }
    }

    /// Cursor key within an entity.
    pub fn label(&self) -> String {
        match &self.kind {
            CollectionKind::Profile => "profile".to_string(),
            CollectionKind::Repositories => "repositories".to_string(),
            CollectionKind::Commits { repo } => format!("commits:{}", repo),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub login: String,
    pub collection: CollectionKind,
    /// `None` requests the first page
    pub page_token: Option<String>,
    pub page_size: u32,
}

#[derive(Debug, Clone)]
pub struct Page {
    pub items: Vec<Item>,
    /// `None` when the remote has no further pages
    pub next_token: Option<String>,
    pub quota: QuotaMeta,
}

#[async_trait]
pub trait PageSource: Send + Sync {
    async fn fetch_page(&self, credential: &Credential, request: &PageRequest) -> Result<Page, RemoteError>;
}

/// Payload of a [`CollectionKind::Profile`] item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileItem {
    pub login: String,
    pub name: Option<String>,
    pub bio: Option<String>,
    pub followers: u64,
}

/// Payload of a [`CollectionKind::Repositories`] item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepoItem {
    pub name: String,
    pub stars: u64,
    pub language: Option<String>,
    pub description: Option<String>,
    pub default_branch: Option<String>,
    pub fork: bool,
}

/// Payload of a [`CollectionKind::Commits`] item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitItem {
    pub sha: String,
    pub message: String,
    /// Platform login of the author, when linked to an account
    pub author_login: Option<String>,
}
