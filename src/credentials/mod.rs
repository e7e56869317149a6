//! Credential pool for the source-platform API.
//!
//! This module provides:
//! - **CredentialPool**: round-robin selection among tokens with quota left,
//!   suspending callers when every token is exhausted.
//! - **QuotaMeta**: the authoritative remaining/limit/reset values parsed from
//!   a response, fed back through [`CredentialPool::report`].

mod pool;
mod quota;

pub use pool::{Credential, CredentialPool, CredentialStatus, DEFAULT_FALLBACK_RESET, DEFAULT_QUOTA_LIMIT, mask_token};
pub use quota::{QuotaMeta, epoch_to_instant, retry_after};
