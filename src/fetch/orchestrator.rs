//! Paginated, resumable collection of an entity's activity.
//!
//! Each page goes: acquire a credential, request, report quota, merge into
//! the cursor, persist the cursor, then yield the new items. A restart
//! resumes from the last persisted cursor; re-fetched items are dropped by
//! key.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::Utc;
use futures::{Stream, TryStreamExt, stream};

use crate::config::FetchConfig;
use crate::credentials::CredentialPool;
use crate::domain::{EntityActivity, RepoSummary};
use crate::error::{Result, WallError};
use crate::fetch::source::{CollectionSpec, CommitItem, PageRequest, PageSource, ProfileItem, RepoItem};
use crate::remote::RemoteError;
use crate::scoring::{ToxicityScorer, emoji_score, find_worst_commit};
use crate::shutdown::Shutdown;
use crate::store::{CursorStatus, FetchCursor, Item, StateStore};

enum CollectState {
    Start,
    Running { cursor: FetchCursor, buffer: VecDeque<Item> },
}

pub struct FetchOrchestrator {
    pool: Arc<CredentialPool>,
    source: Arc<dyn PageSource>,
    store: Arc<StateStore>,
    scorer: Arc<dyn ToxicityScorer>,
    config: FetchConfig,
    shutdown: Shutdown,
}

impl FetchOrchestrator {
    pub fn new(
        pool: Arc<CredentialPool>,
        source: Arc<dyn PageSource>,
        store: Arc<StateStore>,
        scorer: Arc<dyn ToxicityScorer>,
        config: FetchConfig,
    ) -> Self {
        Self {
            pool,
            source,
            store,
            scorer,
            config,
            shutdown: Shutdown::never(),
        }
    }

    pub fn with_shutdown(mut self, shutdown: Shutdown) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Lazily page through one collection of `login`.
    ///
    /// Items already stored in the cursor are yielded first; a complete cursor
    /// yields only those and issues no request.
    pub fn collect<'a>(&'a self, login: &'a str, spec: CollectionSpec) -> impl Stream<Item = Result<Item>> + 'a {
        stream::try_unfold(CollectState::Start, move |state| self.step(login, spec.clone(), state))
    }

    async fn step(
        &self,
        login: &str,
        spec: CollectionSpec,
        state: CollectState,
    ) -> Result<Option<(Item, CollectState)>> {
        let mut state = match state {
            CollectState::Start => {
                let id = login.to_lowercase();
                let mut cursor = self
                    .store
                    .load_cursor(&id, &spec.label())?
                    .unwrap_or_else(|| FetchCursor::new(id, spec.label()));
                if cursor.status == CursorStatus::Failed {
                    cursor.status = CursorStatus::InProgress;
                }
                let buffer = cursor.items.iter().cloned().collect();
                CollectState::Running { cursor, buffer }
            }
            running => running,
        };

        loop {
            let CollectState::Running { mut cursor, mut buffer } = state else {
                return Ok(None);
            };
            if let Some(item) = buffer.pop_front() {
                return Ok(Some((item, CollectState::Running { cursor, buffer })));
            }
            if cursor.is_complete() {
                return Ok(None);
            }
            let fresh = self.fetch_next_page(login, &spec, &mut cursor).await?;
            buffer.extend(fresh);
            state = CollectState::Running { cursor, buffer };
        }
    }

    /// Drain a collection into a vector.
    pub async fn collect_all(&self, login: &str, spec: CollectionSpec) -> Result<Vec<Item>> {
        self.collect(login, spec).try_collect().await
    }

    async fn fetch_next_page(&self, login: &str, spec: &CollectionSpec, cursor: &mut FetchCursor) -> Result<Vec<Item>> {
        let request = PageRequest {
            login: login.to_string(),
            collection: spec.kind.clone(),
            page_token: cursor.page_token.clone(),
            page_size: self.config.page_size,
        };
        let backoff = self.config.backoff();
        let mut attempt = 0;

        loop {
            let credential = self.shutdown.guard(self.pool.acquire()).await?;
            let result = self
                .shutdown
                .guard(async { Ok(self.source.fetch_page(&credential, &request).await) })
                .await?;

            match result {
                Ok(page) => {
                    self.pool.report(&credential, &page.quota);
                    let fresh = cursor.merge_page(page.items, spec.item_cap);
                    cursor.page_token = page.next_token;
                    cursor.last_error = None;
                    if cursor.page_token.is_none() || cursor.reached_cap(spec.item_cap) {
                        cursor.status = CursorStatus::Complete;
                    }
                    self.store.save_cursor(cursor)?;

                    tracing::debug!(
                        entity = login,
                        collection = %spec.label(),
                        page = cursor.pages_fetched,
                        new_items = fresh.len(),
                        "Fetched page"
                    );
                    return Ok(fresh);
                }
                Err(RemoteError::RateLimited { mut quota, retry_after }) => {
                    quota.remaining = Some(0);
                    if quota.reset_at.is_none() {
                        quota.reset_at = retry_after.map(|d| tokio::time::Instant::now() + d);
                    }
                    self.pool.report(&credential, &quota);
                    tracing::warn!(credential = credential.id(), entity = login, "Credential exhausted, rotating");
                }
                Err(RemoteError::CredentialRejected(status)) => {
                    tracing::warn!(credential = credential.id(), status, "Credential rejected, revoking");
                    self.pool.revoke(&credential);
                }
                Err(e) if e.is_retryable() => {
                    if backoff.exhausted(attempt) {
                        return Err(self.fail_cursor(cursor, e)?);
                    }
                    let delay = backoff.delay(attempt);
                    attempt += 1;
                    tracing::warn!(
                        entity = login,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient fetch failure, retrying"
                    );
                    self.shutdown.sleep(delay).await?;
                }
                Err(e) => return Err(self.fail_cursor(cursor, e)?),
            }
        }
    }

    fn fail_cursor(&self, cursor: &mut FetchCursor, error: RemoteError) -> Result<WallError> {
        cursor.status = CursorStatus::Failed;
        cursor.last_error = Some(error.to_string());
        cursor.updated_at = Utc::now();
        self.store.save_cursor(cursor)?;
        Ok(error.into())
    }

    /// Collect, score and cache everything known about one entity.
    ///
    /// A cached activity is returned as is, with no request.
    pub async fn collect_entity(&self, login: &str) -> Result<EntityActivity> {
        if let Some(activity) = self.store.load_activity(&login.to_lowercase())? {
            log::debug!("Activity for {} already collected", login);
            return Ok(activity);
        }

        let profile_items = self.collect_all(login, CollectionSpec::profile()).await?;
        let profile: ProfileItem = match profile_items.into_iter().next() {
            Some(item) => serde_json::from_value(item.payload)?,
            None => return Err(WallError::PermanentRemote(format!("no profile returned for {}", login))),
        };

        let repo_items = self
            .collect_all(login, CollectionSpec::repositories(self.config.max_repo_scan))
            .await?;
        let mut repos = Vec::with_capacity(repo_items.len());
        for item in repo_items {
            let repo: RepoItem = serde_json::from_value(item.payload)?;
            if !repo.fork {
                repos.push(repo);
            }
        }
        repos.sort_by(|a, b| b.stars.cmp(&a.stars).then_with(|| a.name.cmp(&b.name)));
        repos.truncate(self.config.max_repos);

        let mut commit_messages = Vec::new();
        for repo in repos.iter().take(self.config.commit_repos) {
            let spec = CollectionSpec::commits(&repo.name, self.config.max_commits_per_repo);
            let items = match self.collect_all(login, spec).await {
                Ok(items) => items,
                Err(WallError::PermanentRemote(e)) => {
                    log::warn!("Skipping commits of {}/{}: {}", login, repo.name, e);
                    continue;
                }
                Err(e) => return Err(e),
            };
            for item in items {
                let commit: CommitItem = serde_json::from_value(item.payload)?;
                let authored = commit
                    .author_login
                    .as_deref()
                    .is_some_and(|a| a.eq_ignore_ascii_case(login));
                if authored {
                    commit_messages.push(commit.message);
                }
            }
        }

        let activity = EntityActivity {
            login: profile.login,
            name: profile.name,
            bio: profile.bio,
            followers: profile.followers,
            stars: repos.iter().map(|r| r.stars).sum(),
            top_repos: repos
                .into_iter()
                .map(|r| RepoSummary {
                    name: r.name,
                    stars: r.stars,
                    language: r.language,
                    description: r.description,
                    default_branch: r.default_branch,
                    fork: r.fork,
                })
                .collect(),
            commits_seen: commit_messages.len() as u64,
            emoji_score: emoji_score(&commit_messages),
            worst_commit: find_worst_commit(self.scorer.as_ref(), &commit_messages),
            commit_messages,
            fetched_at: Utc::now(),
        };

        self.store.save_activity(&activity)?;
        log::info!(
            "Collected {}: {} repos, {} commits, emoji score {}",
            login,
            activity.top_repos.len(),
            activity.commits_seen,
            activity.emoji_score
        );
        Ok(activity)
    }
}
