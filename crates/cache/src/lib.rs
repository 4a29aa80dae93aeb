//! Coordination state shared by every runner process.
//!
//! Locks, global slots, the circuit breaker, and debounce markers are all
//! TTL'd keys in a [`CoordinationStore`]. Quote events flow through a
//! [`StreamStore`]. Redis backs both in production; [`MemoryStore`] keeps the
//! same semantics inside one process.

pub mod circuit;
pub mod debounce;
pub mod lock;
pub mod memory;
pub mod redis_store;
pub mod slots;
pub mod store;

pub use circuit::{CircuitBreaker, CircuitBreakerConfig};
pub use debounce::Debounce;
pub use lock::{KeyLock, LockToken};
pub use memory::MemoryStore;
pub use redis_store::RedisStore;
pub use slots::{GlobalSlots, SlotGuard};
pub use store::*;

use marketsync_core::Provider;

/// Key suffix identifying one (provider, exchange) pair.
pub fn sync_scope(provider: Provider, exchange_id: i64) -> String {
    format!("{}:{}", provider.slug(), exchange_id)
}
