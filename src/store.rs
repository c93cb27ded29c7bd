use crate::entry::CacheEntry;

use std::collections::HashMap;
use std::fmt;
use std::hash::BuildHasher;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

/// One slot in the store's key space.
///
/// A slot holds either a live entry or a write fence left behind when an
/// entry was removed. The fence preserves the slot's committed generation so
/// a `WriteTicket` taken before the removal cannot commit after it.
#[derive(Debug)]
pub(crate) enum Slot<V> {
  Live {
    entry: Arc<CacheEntry<V>>,
    /// Generation of the write that produced `entry`.
    committed: u64,
  },
  Fenced {
    committed: u64,
    /// When the fence was raised, nanos since epoch. Sweeps prune fences
    /// once they outlive the idle floor.
    fenced_at: u64,
  },
}

impl<V> Slot<V> {
  #[inline]
  pub(crate) fn committed(&self) -> u64 {
    match self {
      Slot::Live { committed, .. } | Slot::Fenced { committed, .. } => *committed,
    }
  }
}

/// The cache's backing map: serialized key to slot, behind one
/// reader-writer lock.
///
/// A single map rather than shards: the key space is bounded by the number
/// of distinct queries the application issues, and pattern invalidation
/// wants a whole-keyspace scan anyway.
pub(crate) struct Store<V, H> {
  pub(crate) map: RwLock<HashMap<String, Slot<V>, H>>,
  /// Monotonic source of write generations. Every `set`, ticket, and fence
  /// draws a distinct value from it.
  write_clock: AtomicU64,
}

impl<V, H: BuildHasher> Store<V, H> {
  pub(crate) fn new(hasher: H) -> Self {
    Self {
      map: RwLock::new(HashMap::with_hasher(hasher)),
      write_clock: AtomicU64::new(0),
    }
  }

  /// Draws the next write generation. Strictly increasing across the
  /// cache's lifetime.
  #[inline]
  pub(crate) fn next_generation(&self) -> u64 {
    self.write_clock.fetch_add(1, Ordering::Relaxed) + 1
  }

  /// Number of live entries. Fences are bookkeeping, not data, and are
  /// excluded.
  pub(crate) fn live_len(&self) -> usize {
    self
      .map
      .read()
      .values()
      .filter(|slot| matches!(slot, Slot::Live { .. }))
      .count()
  }
}

impl<V, H: BuildHasher> fmt::Debug for Store<V, H> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Store")
      .field("live_entries", &self.live_len())
      .field("write_clock", &self.write_clock.load(Ordering::Relaxed))
      .finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use ahash::RandomState;
  use std::time::Duration;

  fn store() -> Store<u32, RandomState> {
    Store::new(RandomState::new())
  }

  #[test]
  fn generations_are_strictly_increasing() {
    let store = store();
    let a = store.next_generation();
    let b = store.next_generation();
    assert!(b > a);
  }

  #[test]
  fn live_len_ignores_fences() {
    let store = store();
    let entry = CacheEntry::new(7u32, Duration::from_secs(60), Duration::from_secs(30));
    store.map.write().insert(
      "live".into(),
      Slot::Live { entry: Arc::new(entry), committed: store.next_generation() },
    );
    store.map.write().insert(
      "gone".into(),
      Slot::Fenced { committed: store.next_generation(), fenced_at: 0 },
    );
    assert_eq!(store.live_len(), 1);
    assert_eq!(store.map.read().len(), 2);
  }
}
