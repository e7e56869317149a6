//! Credential pool with round-robin rotation and quota tracking.
//!
//! Every outbound request to the source platform first acquires a credential
//! from the pool and reports the response's rate-limit headers back. When all
//! credentials are exhausted, callers suspend until the earliest reset.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;

use super::quota::QuotaMeta;
use crate::error::{Result, WallError};

/// Requests per window GitHub grants an authenticated token.
pub const DEFAULT_QUOTA_LIMIT: u32 = 5000;

/// Used when a response says "exhausted" without saying until when.
pub const DEFAULT_FALLBACK_RESET: Duration = Duration::from_secs(60);

/// A handle to one credential, handed out by [`CredentialPool::acquire`].
#[derive(Clone)]
pub struct Credential {
    index: usize,
    token: Arc<str>,
}

impl Credential {
    /// Position of this credential in the pool.
    pub fn id(&self) -> usize {
        self.index
    }

    pub fn token(&self) -> &str {
        &self.token
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("id", &self.index)
            .field("token", &mask_token(&self.token))
            .finish()
    }
}

/// Show only the last four characters of a token.
pub fn mask_token(token: &str) -> String {
    let tail: String = token.chars().rev().take(4).collect::<Vec<_>>().into_iter().rev().collect();
    format!("…{}", tail)
}

/// Point-in-time view of one credential, for status output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialStatus {
    pub id: usize,
    pub remaining: u32,
    pub reset_in: Option<Duration>,
    pub revoked: bool,
}

#[derive(Debug)]
struct Slot {
    token: Arc<str>,
    remaining: u32,
    limit: u32,
    reset_at: Option<Instant>,
    revoked: bool,
}

impl Slot {
    fn is_eligible(&self) -> bool {
        !self.revoked && self.remaining > 0
    }
}

enum Selection {
    Ready(Credential),
    WaitUntil(Option<Instant>),
    AllRevoked(usize),
}

#[derive(Debug)]
struct PoolState {
    slots: Vec<Slot>,
    /// Round-robin pointer: index to try first on the next acquire.
    next: usize,
}

impl PoolState {
    /// Restore quota on credentials whose window has rolled over.
    fn refresh(&mut self, now: Instant) {
        for slot in &mut self.slots {
            if let Some(reset_at) = slot.reset_at {
                if reset_at <= now {
                    slot.remaining = slot.limit;
                    slot.reset_at = None;
                }
            }
        }
    }

    /// Reserve quota on the next eligible credential.
    ///
    /// A reservation that empties a credential with no known reset starts a
    /// `fallback_reset` window, so a waiter always has a deadline.
    fn select(&mut self, now: Instant, fallback_reset: Duration) -> Selection {
        self.refresh(now);

        let n = self.slots.len();
        for offset in 0..n {
            let idx = (self.next + offset) % n;
            let slot = &mut self.slots[idx];
            if slot.is_eligible() {
                // Reserve one unit so concurrent acquirers can't overdraw.
                slot.remaining -= 1;
                if slot.remaining == 0 && slot.reset_at.is_none() {
                    slot.reset_at = Some(now + fallback_reset);
                }
                self.next = (idx + 1) % n;
                return Selection::Ready(Credential {
                    index: idx,
                    token: slot.token.clone(),
                });
            }
        }

        if self.slots.iter().all(|s| s.revoked) {
            return Selection::AllRevoked(n);
        }

        let earliest = self
            .slots
            .iter()
            .filter(|s| !s.revoked)
            .filter_map(|s| s.reset_at)
            .min();
        Selection::WaitUntil(earliest)
    }
}

/// Shared pool of API credentials.
///
/// Selection and quota mutation are serialized behind one lock. The pool is
/// meant to be shared across workers via `Arc`.
pub struct CredentialPool {
    state: Mutex<PoolState>,
    changed: Notify,
    fallback_reset: Duration,
}

impl fmt::Debug for CredentialPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialPool")
            .field("size", &self.len())
            .finish_non_exhaustive()
    }
}

impl CredentialPool {
    /// Create a pool where every credential starts with `limit` requests.
    pub fn new(tokens: impl IntoIterator<Item = impl Into<String>>, limit: u32) -> Result<Self> {
        let slots: Vec<Slot> = tokens
            .into_iter()
            .map(|t| t.into().trim().to_string())
            .filter(|t| !t.is_empty())
            .map(|t| Slot {
                token: Arc::from(t.as_str()),
                remaining: limit,
                limit,
                reset_at: None,
                revoked: false,
            })
            .collect();

        if slots.is_empty() {
            return Err(WallError::Config("credential pool needs at least one token".to_string()));
        }

        Ok(Self {
            state: Mutex::new(PoolState { slots, next: 0 }),
            changed: Notify::new(),
            fallback_reset: DEFAULT_FALLBACK_RESET,
        })
    }

    /// Parse a comma separated token list, as found in `GITHUB_TOKENS`.
    pub fn from_csv(raw: &str, limit: u32) -> Result<Self> {
        Self::new(raw.split(','), limit)
    }

    /// How long an exhausted credential rests when the response gave no reset.
    pub fn with_fallback_reset(mut self, fallback: Duration) -> Self {
        self.fallback_reset = fallback;
        self
    }

    pub fn len(&self) -> usize {
        self.lock().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, PoolState> {
        // Bookkeeping stays consistent even if a holder panicked.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Get a credential with quota left, waiting for a reset if none has any.
    pub async fn acquire(&self) -> Result<Credential> {
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let wait_until = match self.lock().select(Instant::now(), self.fallback_reset) {
                Selection::Ready(credential) => return Ok(credential),
                Selection::AllRevoked(n) => return Err(WallError::NoUsableCredentials(n)),
                Selection::WaitUntil(at) => at,
            };

            match wait_until {
                Some(at) => {
                    tracing::warn!(
                        wait_secs = at.saturating_duration_since(Instant::now()).as_secs(),
                        "All credentials exhausted, waiting for earliest reset"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep_until(at) => {}
                        _ = &mut notified => {}
                    }
                }
                None => {
                    tracing::warn!("All credentials exhausted, waiting for a quota report");
                    notified.await;
                }
            }
        }
    }

    /// Record the remote's view of a credential's quota.
    pub fn report(&self, credential: &Credential, meta: &QuotaMeta) {
        {
            let mut state = self.lock();
            let Some(slot) = state.slots.get_mut(credential.index) else {
                return;
            };

            if let Some(limit) = meta.limit {
                slot.limit = limit;
            }
            if let Some(remaining) = meta.remaining {
                slot.remaining = remaining;
            }
            if let Some(reset_at) = meta.reset_at {
                slot.reset_at = Some(reset_at);
            }

            if meta.is_exhausted() {
                slot.remaining = 0;
                if slot.reset_at.is_none() {
                    slot.reset_at = Some(Instant::now() + self.fallback_reset);
                }
                tracing::warn!(
                    credential = %mask_token(&slot.token),
                    reset_in_secs = slot
                        .reset_at
                        .map(|t| t.saturating_duration_since(Instant::now()).as_secs())
                        .unwrap_or(0),
                    "Credential exhausted"
                );
            }
        }
        self.changed.notify_waiters();
    }

    /// Take a credential out of rotation for the rest of the run.
    pub fn revoke(&self, credential: &Credential) {
        {
            let mut state = self.lock();
            if let Some(slot) = state.slots.get_mut(credential.index) {
                slot.revoked = true;
                tracing::error!(credential = %mask_token(&slot.token), "Credential rejected, removed from rotation");
            }
        }
        self.changed.notify_waiters();
    }

    pub fn snapshot(&self) -> Vec<CredentialStatus> {
        let now = Instant::now();
        self.lock()
            .slots
            .iter()
            .enumerate()
            .map(|(id, s)| CredentialStatus {
                id,
                remaining: s.remaining,
                reset_in: s.reset_at.map(|t| t.saturating_duration_since(now)),
                revoked: s.revoked,
            })
            .collect()
    }
}
