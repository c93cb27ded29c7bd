//! A stale-aware query cache for application data layers.
//!
//! `requery` keeps the results of expensive queries in process, tracks how
//! fresh each one is, and tells interested parts of the application when a
//! result changes. It is the layer between request handlers and a slow
//! backend: API clients, database read paths, sync pipelines.
//!
//! # Core behaviors
//!
//! *   **Staleness is not expiry.** Every entry carries two independent
//!     windows: after `stale_after` it reads as stale but keeps serving;
//!     after `ttl` it becomes eligible for garbage collection. Reads never
//!     return errors and never hide resident data.
//! *   **Synchronous change notification.** Subscribers on a key run
//!     inline with every write and invalidation, exactly once each, before
//!     the mutating call returns.
//! *   **Generation-guarded writes.** A [`WriteTicket`] taken before a
//!     fetch refuses to commit over anything newer, so a slow response
//!     cannot clobber data that arrived while it was in flight.
//! *   **Single-flight fetches.** Concurrent [`fetch_with`] calls for one
//!     key share one load; stale hits revalidate in the background and
//!     keep serving the old value if the refresh fails.
//! *   **Garbage collection is a conjunction.** The janitor thread removes
//!     an entry only when it is past its TTL *and* has gone unread past
//!     the idle floor. Hot data survives expiry; cold data survives until
//!     expiry.
//!
//! [`fetch_with`]: QueryCache::fetch_with
//!
//! # Example
//!
//! ```
//! use requery::{CacheBuilder, QueryKey};
//!
//! let cache = CacheBuilder::default().build().unwrap();
//! let contacts = QueryKey::new(["contacts", "workspace-7"]);
//!
//! let _watch = cache.subscribe(&contacts, || println!("contacts changed"));
//!
//! cache.set(&contacts, vec!["Ada", "Grace"]);
//! let entry = cache.get(&contacts).unwrap();
//! assert_eq!(*entry.data(), vec!["Ada", "Grace"]);
//! assert!(!entry.is_stale());
//!
//! cache.destroy();
//! ```

// Public modules that form the API
pub mod builder;
pub mod entry;
pub mod error;
pub mod fetch;
pub mod handles;
pub mod key;
pub mod metrics;
pub mod runtime;
pub mod subscribers;

// Internal, crate-only modules
mod shared;
mod store;
mod task;
mod time;

// Re-export the primary user-facing types for convenience
pub use builder::CacheBuilder;
pub use entry::{CacheEntry, EntryOptions};
pub use error::BuildError;
pub use fetch::{FetchError, SharedFailure};
pub use handles::{QueryCache, WriteTicket};
pub use key::QueryKey;
pub use metrics::CacheStats;
pub use runtime::TaskSpawner;
pub use subscribers::Subscription;

#[cfg(feature = "tokio")]
pub use runtime::TokioSpawner;
