//! The unified sync engine.
//!
//! One pass per (provider, exchange): circuit check, debounce, global slot,
//! exchange lock, fetch with retries, normalize, upsert, reconcile.

pub mod normalize;
pub mod retry;
pub mod sync;

pub use normalize::Normalizer;
pub use retry::{AttemptOutcome, RetryPolicy};
pub use sync::{SyncEngine, SyncRequest};

use marketsync_cache::StoreError;
use marketsync_core::{ProviderError, RepoError};

/// Errors surfaced by a sync pass after failure state has been recorded.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error("Coordination store: {0}")]
    Store(#[from] StoreError),
    #[error("Repository: {0}")]
    Repo(#[from] RepoError),
}
