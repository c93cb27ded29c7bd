use crate::entry::{CacheEntry, EntryOptions};
use crate::fetch::LoadFuture;
use crate::metrics::Metrics;
use crate::store::{Slot, Store};
use crate::subscribers::SubscriberRegistry;
use crate::task::janitor::Janitor;
use crate::time;
use crate::TaskSpawner;

use std::fmt;
use std::hash::BuildHasher;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

/// The internal, thread-safe core of the cache, shared by every handle.
///
/// Lock discipline: the store lock, the registry lock, and the pending-load
/// lock are never held at the same time. Mutations release the store lock
/// before fanning out notifications, so a subscriber callback may re-enter
/// the cache freely.
pub(crate) struct CacheShared<V: Send + Sync, H> {
  pub(crate) store: Arc<Store<V, H>>,
  pub(crate) registry: Arc<Mutex<SubscriberRegistry>>,
  pub(crate) metrics: Arc<Metrics>,
  /// In-flight loads keyed by serialized key, for deduplication.
  pub(crate) pending: Mutex<ahash::HashMap<String, Arc<LoadFuture<V>>>>,
  janitor: Mutex<Option<Janitor>>,
  destroyed: AtomicBool,
  pub(crate) default_ttl: Duration,
  pub(crate) default_stale_after: Duration,
  pub(crate) spawner: Option<Arc<dyn TaskSpawner>>,
}

impl<V: Send + Sync, H: BuildHasher> CacheShared<V, H> {
  #[allow(clippy::too_many_arguments)]
  pub(crate) fn new(
    store: Arc<Store<V, H>>,
    registry: Arc<Mutex<SubscriberRegistry>>,
    metrics: Arc<Metrics>,
    janitor: Janitor,
    default_ttl: Duration,
    default_stale_after: Duration,
    spawner: Option<Arc<dyn TaskSpawner>>,
  ) -> Self {
    Self {
      store,
      registry,
      metrics,
      pending: Mutex::new(ahash::HashMap::default()),
      janitor: Mutex::new(Some(janitor)),
      destroyed: AtomicBool::new(false),
      default_ttl,
      default_stale_after,
      spawner,
    }
  }

  #[inline]
  pub(crate) fn is_destroyed(&self) -> bool {
    self.destroyed.load(Ordering::Acquire)
  }

  pub(crate) fn entry_with_defaults(&self, data: V, options: EntryOptions) -> CacheEntry<V> {
    CacheEntry::new(
      data,
      options.ttl.unwrap_or(self.default_ttl),
      options.stale_after.unwrap_or(self.default_stale_after),
    )
  }

  /// Looks up a live entry, bumping its last-access time.
  ///
  /// Staleness and expiry do not hide entries here; whatever is resident
  /// is returned.
  pub(crate) fn lookup(&self, serialized: &str) -> Option<Arc<CacheEntry<V>>> {
    if self.is_destroyed() {
      return None;
    }
    let found = {
      let guard = self.store.map.read();
      match guard.get(serialized) {
        Some(Slot::Live { entry, .. }) => {
          entry.touch();
          Some(entry.clone())
        }
        _ => None,
      }
    };
    match &found {
      Some(_) => self.metrics.hits.fetch_add(1, Ordering::Relaxed),
      None => self.metrics.misses.fetch_add(1, Ordering::Relaxed),
    };
    found
  }

  /// Unconditional write: replaces whatever the slot holds, advances its
  /// committed generation, and notifies the key's subscribers.
  pub(crate) fn write(&self, serialized: String, entry: CacheEntry<V>) {
    if self.is_destroyed() {
      return;
    }
    {
      let mut guard = self.store.map.write();
      let committed = self.store.next_generation();
      guard.insert(serialized.clone(), Slot::Live { entry: Arc::new(entry), committed });
    }
    self.metrics.inserts.fetch_add(1, Ordering::Relaxed);
    self.notify(&serialized);
  }

  /// Generation-guarded write.
  ///
  /// Commits and notifies only when the slot's committed generation is
  /// older than `generation`; otherwise the entry is discarded and nobody
  /// is notified. Returns whether the write landed.
  pub(crate) fn write_guarded(
    &self,
    serialized: &str,
    generation: u64,
    entry: CacheEntry<V>,
  ) -> bool {
    if self.is_destroyed() {
      return false;
    }
    let committed = {
      let mut guard = self.store.map.write();
      match guard.get_mut(serialized) {
        Some(slot) if slot.committed() >= generation => false,
        Some(slot) => {
          *slot = Slot::Live { entry: Arc::new(entry), committed: generation };
          true
        }
        None => {
          guard.insert(
            serialized.to_string(),
            Slot::Live { entry: Arc::new(entry), committed: generation },
          );
          true
        }
      }
    };
    if committed {
      self.metrics.inserts.fetch_add(1, Ordering::Relaxed);
      self.notify(serialized);
    } else {
      self.metrics.stale_writes_rejected.fetch_add(1, Ordering::Relaxed);
      tracing::debug!(key = %serialized, generation, "stale write rejected");
    }
    committed
  }

  /// Removes a key's entry, leaving a fence at a fresh generation, and
  /// notifies the key's subscribers.
  ///
  /// Subscribers are notified even when there was nothing to remove, so
  /// invalidation can be used as a pure "re-read this key" signal.
  pub(crate) fn invalidate(&self, serialized: &str) {
    if self.is_destroyed() {
      return;
    }
    // Checked before the store lock is taken; the two locks never nest.
    let fetch_in_flight = self.pending.lock().contains_key(serialized);
    let removed = {
      let mut guard = self.store.map.write();
      match guard.get_mut(serialized) {
        Some(slot @ Slot::Live { .. }) => {
          *slot = Slot::Fenced {
            committed: self.store.next_generation(),
            fenced_at: time::now_nanos(),
          };
          true
        }
        Some(Slot::Fenced { committed, fenced_at }) => {
          // Re-arm so in-flight tickets are judged against the newest
          // invalidation, not the first.
          *committed = self.store.next_generation();
          *fenced_at = time::now_nanos();
          false
        }
        None => {
          // Fence a vacant slot only when a load is in flight; otherwise
          // stay a pure no-op so arbitrary invalidations cannot grow the
          // map.
          if fetch_in_flight {
            guard.insert(
              serialized.to_string(),
              Slot::Fenced {
                committed: self.store.next_generation(),
                fenced_at: time::now_nanos(),
              },
            );
          }
          false
        }
      }
    };
    if removed {
      self.metrics.invalidations.fetch_add(1, Ordering::Relaxed);
    }
    self.notify(serialized);
  }

  /// Removes every live entry whose serialized key contains `pattern`,
  /// then notifies each affected key once.
  pub(crate) fn invalidate_matching(&self, pattern: &str) {
    if self.is_destroyed() {
      return;
    }
    let affected: Vec<String> = {
      let mut guard = self.store.map.write();
      let keys: Vec<String> = guard
        .iter()
        .filter(|(key, slot)| matches!(slot, Slot::Live { .. }) && key.contains(pattern))
        .map(|(key, _)| key.clone())
        .collect();
      for key in &keys {
        if let Some(slot) = guard.get_mut(key.as_str()) {
          *slot = Slot::Fenced {
            committed: self.store.next_generation(),
            fenced_at: time::now_nanos(),
          };
        }
      }
      keys
    };
    if !affected.is_empty() {
      self
        .metrics
        .invalidations
        .fetch_add(affected.len() as u64, Ordering::Relaxed);
      tracing::debug!(pattern, affected = affected.len(), "pattern invalidation");
    }
    for key in &affected {
      self.notify(key);
    }
  }

  /// Synchronous notification fan-out for one key.
  ///
  /// Callbacks run on the calling thread, outside every cache lock, in
  /// registration order, exactly once each. A panicking callback is
  /// isolated so the rest still fire and the mutating call returns
  /// normally.
  pub(crate) fn notify(&self, serialized: &str) {
    let callbacks = self.registry.lock().callbacks(serialized);
    if callbacks.is_empty() {
      return;
    }
    self
      .metrics
      .notifications_sent
      .fetch_add(callbacks.len() as u64, Ordering::Relaxed);
    for callback in callbacks {
      if panic::catch_unwind(AssertUnwindSafe(|| callback())).is_err() {
        self.metrics.subscriber_panics.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(key = %serialized, "subscriber callback panicked");
      }
    }
  }

  /// Drops all entries, fences, and registrations without notifying
  /// anyone. A reset, not a data-change signal.
  pub(crate) fn clear(&self) {
    self.store.map.write().clear();
    self.registry.lock().clear();
  }

  /// Stops the janitor, clears everything, and leaves the cache inert.
  /// Idempotent; only the first call does work.
  pub(crate) fn destroy(&self) {
    if self.destroyed.swap(true, Ordering::AcqRel) {
      return;
    }
    if let Some(janitor) = self.janitor.lock().take() {
      janitor.stop();
    }
    self.clear();
    self.pending.lock().clear();
    tracing::debug!("query cache destroyed");
  }
}

impl<V: Send + Sync, H> Drop for CacheShared<V, H> {
  fn drop(&mut self) {
    // Last handle gone: stop the janitor if destroy() never ran.
    if let Some(janitor) = self.janitor.get_mut().take() {
      janitor.stop();
    }
  }
}

impl<V: Send + Sync, H> fmt::Debug for CacheShared<V, H> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("CacheShared")
      .field("default_ttl", &self.default_ttl)
      .field("default_stale_after", &self.default_stale_after)
      .field("destroyed", &self.destroyed.load(Ordering::Relaxed))
      .finish_non_exhaustive()
  }
}
