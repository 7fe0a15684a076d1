//! Two-tier caching for request handlers.
//!
//! ## Architecture
//!
//! - **Local tier (DashMap)**: in-process, microsecond latency, per instance,
//!   entries capped at a short TTL
//! - **Shared tier ([`SharedStore`])**: Redis or in-memory, shared across
//!   instances, authoritative
//! - **Tags ([`TagIndex`])**: sets of keys evicted together
//! - **Warming ([`CacheWarmer`])**: pre-populates hot entries
//! - **Invalidation listener ([`InvalidationListener`])**: drops local copies
//!   when another instance deletes or invalidates a key
//!
//! ## Cache hierarchy
//!
//! ```text
//! get_or_compute → local → shared → producer (DB / report query)
//!                   <1µs     ~1ms       ~50ms
//! ```
//!
//! ## Graceful degradation
//!
//! If the shared tier is missing or unreachable, the cache keeps working from
//! the local tier. Nothing about tier availability is ever returned as an
//! error; see [`TieredCache`] for the policy.
//!
//! The same shared tier also holds the admission layer's bookkeeping (rate
//! windows, blacklist, security logs) through the primitives at the end of
//! [`TieredCache`].

pub mod envelope;
pub mod error;
pub mod local;
pub mod metrics;
pub mod pubsub;
pub mod settings;
pub mod stats;
pub mod store;
pub mod tags;
pub mod tiered;
pub mod warmer;

pub use envelope::{Encoding, Envelope};
pub use error::{CacheError, Result, StoreError, StoreResult};
pub use pubsub::InvalidationListener;
pub use settings::CacheSettings;
pub use stats::CacheStats;
pub use store::{MemoryStore, RedisStore, SharedStore, WindowSnapshot};
pub use tags::TagIndex;
pub use tiered::TieredCache;
pub use warmer::{CacheWarmer, WarmEntry, WarmOutcome};

use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall-clock time in unix milliseconds.
///
/// Stored in the shared tier and compared across processes, so this is
/// wall-clock time, not `Instant`.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
