use crate::error::BuildError;
use crate::handles::QueryCache;
use crate::metrics::Metrics;
use crate::shared::CacheShared;
use crate::store::Store;
use crate::subscribers::SubscriberRegistry;
use crate::task::janitor::{Janitor, JanitorContext};
use crate::TaskSpawner;

use std::fmt;
use std::hash::BuildHasher;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

/// Entries older than this are eligible for collection: 10 minutes.
pub const DEFAULT_TTL: Duration = Duration::from_secs(10 * 60);
/// Entries older than this read as stale: 5 minutes.
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(5 * 60);
/// How often the janitor sweeps: 5 minutes.
pub const DEFAULT_GC_INTERVAL: Duration = Duration::from_secs(5 * 60);
/// Entries read within this window are never collected: 30 minutes.
pub const DEFAULT_GC_IDLE_FLOOR: Duration = Duration::from_secs(30 * 60);

/// A builder for [`QueryCache`] instances.
///
/// ```
/// use requery::CacheBuilder;
/// use std::time::Duration;
///
/// let cache = CacheBuilder::<String>::new()
///   .default_ttl(Duration::from_secs(600))
///   .default_stale_after(Duration::from_secs(300))
///   .build()
///   .unwrap();
/// cache.destroy();
/// ```
pub struct CacheBuilder<V: Send + Sync, H = ahash::RandomState> {
  default_ttl: Duration,
  default_stale_after: Duration,
  gc_interval: Duration,
  gc_idle_floor: Duration,
  hasher: H,
  spawner: Option<Arc<dyn TaskSpawner>>,
  _value_marker: PhantomData<fn() -> V>,
}

// --- Timing Configuration ---
impl<V: Send + Sync, H> CacheBuilder<V, H> {
  /// Sets the default TTL applied to entries written without an override.
  /// Must be non-zero.
  pub fn default_ttl(mut self, ttl: Duration) -> Self {
    self.default_ttl = ttl;
    self
  }

  /// Sets the default staleness window applied to entries written without
  /// an override. Zero is allowed and makes every entry read as stale,
  /// which turns `fetch_with` into revalidate-on-every-read.
  pub fn default_stale_after(mut self, stale_after: Duration) -> Self {
    self.default_stale_after = stale_after;
    self
  }

  /// Sets how often the janitor sweeps. Must be non-zero.
  pub fn gc_interval(mut self, interval: Duration) -> Self {
    self.gc_interval = interval;
    self
  }

  /// Sets the idle floor: entries read within this window are never
  /// collected, regardless of TTL.
  pub fn gc_idle_floor(mut self, floor: Duration) -> Self {
    self.gc_idle_floor = floor;
    self
  }

  /// Sets the spawner used to run stale-while-revalidate refreshes in the
  /// background.
  ///
  /// With the `tokio` feature enabled, a cache built inside a Tokio
  /// runtime picks up that runtime automatically; setting a spawner
  /// explicitly overrides the detection.
  pub fn spawner(mut self, spawner: Arc<dyn TaskSpawner>) -> Self {
    self.spawner = Some(spawner);
    self
  }
}

// --- Default Constructors ---
impl<V: Send + Sync, H: BuildHasher + Default> CacheBuilder<V, H> {
  /// Creates a new `CacheBuilder` with default settings.
  pub fn new() -> Self {
    Self {
      default_ttl: DEFAULT_TTL,
      default_stale_after: DEFAULT_STALE_AFTER,
      gc_interval: DEFAULT_GC_INTERVAL,
      gc_idle_floor: DEFAULT_GC_IDLE_FLOOR,
      hasher: H::default(),
      spawner: None,
      _value_marker: PhantomData,
    }
  }
}

impl<V: Send + Sync> Default for CacheBuilder<V, ahash::RandomState> {
  fn default() -> Self {
    Self::new()
  }
}

#[cfg(feature = "rapidhash")]
impl<V: Send + Sync> CacheBuilder<V, rapidhash::RapidRandomState> {
  /// Creates a builder using the rapidhash hasher for the backing map.
  pub fn rapidhash() -> Self {
    Self::new()
  }
}

// --- Build Methods ---
impl<V, H> CacheBuilder<V, H>
where
  V: Send + Sync + 'static,
  H: BuildHasher + Send + Sync + 'static,
{
  /// Sets the hasher for the backing map.
  pub fn hasher(mut self, hasher: H) -> Self {
    self.hasher = hasher;
    self
  }

  /// Validates the configuration and builds the cache, spawning its
  /// janitor thread.
  pub fn build(self) -> Result<QueryCache<V, H>, BuildError> {
    self.validate()?;

    let store = Arc::new(Store::new(self.hasher));
    let metrics = Arc::new(Metrics::new());
    let registry = Arc::new(Mutex::new(SubscriberRegistry::default()));

    #[allow(unused_mut)]
    let mut spawner = self.spawner;
    #[cfg(feature = "tokio")]
    if spawner.is_none() {
      spawner = crate::runtime::TokioSpawner::try_current()
        .map(|s| Arc::new(s) as Arc<dyn TaskSpawner>);
    }

    let janitor = Janitor::spawn(
      JanitorContext {
        store: Arc::clone(&store),
        metrics: Arc::clone(&metrics),
        idle_floor: self.gc_idle_floor,
      },
      self.gc_interval,
    );

    Ok(QueryCache {
      shared: Arc::new(CacheShared::new(
        store,
        registry,
        metrics,
        janitor,
        self.default_ttl,
        self.default_stale_after,
        spawner,
      )),
    })
  }

  fn validate(&self) -> Result<(), BuildError> {
    if self.default_ttl.is_zero() {
      return Err(BuildError::ZeroTtl);
    }
    if self.gc_interval.is_zero() {
      return Err(BuildError::ZeroGcInterval);
    }
    Ok(())
  }
}

impl<V: Send + Sync, H> fmt::Debug for CacheBuilder<V, H> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("CacheBuilder")
      .field("default_ttl", &self.default_ttl)
      .field("default_stale_after", &self.default_stale_after)
      .field("gc_interval", &self.gc_interval)
      .field("gc_idle_floor", &self.gc_idle_floor)
      .field("has_spawner", &self.spawner.is_some())
      .finish_non_exhaustive()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn zero_ttl_is_rejected() {
    let result = CacheBuilder::<u32>::new().default_ttl(Duration::ZERO).build();
    assert!(matches!(result, Err(BuildError::ZeroTtl)));
  }

  #[test]
  fn zero_gc_interval_is_rejected() {
    let result = CacheBuilder::<u32>::new().gc_interval(Duration::ZERO).build();
    assert!(matches!(result, Err(BuildError::ZeroGcInterval)));
  }

  #[test]
  fn defaults_match_documented_values() {
    let builder = CacheBuilder::<u32>::new();
    assert_eq!(builder.default_ttl, Duration::from_secs(600));
    assert_eq!(builder.default_stale_after, Duration::from_secs(300));
    assert_eq!(builder.gc_interval, Duration::from_secs(300));
    assert_eq!(builder.gc_idle_floor, Duration::from_secs(1800));
  }
}
