use crate::entry::{CacheEntry, EntryOptions};
use crate::key::QueryKey;
use crate::metrics::CacheStats;
use crate::shared::CacheShared;
use crate::subscribers::Subscription;

use std::fmt;
use std::hash::BuildHasher;
use std::sync::Arc;

/// A stale-aware query cache.
///
/// `QueryCache` keeps query results in process, tracks how fresh each one
/// is, and notifies subscribers synchronously when a key's data changes.
/// Handles are cheap to clone and all share the same underlying cache;
/// construct one with [`CacheBuilder`](crate::CacheBuilder).
///
/// No operation on a built cache returns an error. Reads of absent keys
/// return `None`, superseded writes report `false`, and operations on a
/// destroyed cache are inert no-ops.
pub struct QueryCache<V: Send + Sync, H = ahash::RandomState> {
  pub(crate) shared: Arc<CacheShared<V, H>>,
}

/// Authorization for one generation-guarded write.
///
/// Take a ticket with [`QueryCache::begin_write`] *before* starting the
/// work that produces the value, then commit the result through it. The
/// commit is refused if anything newer landed on the key in between, so a
/// slow fetch cannot clobber fresher data.
#[derive(Debug)]
#[must_use = "a WriteTicket stores nothing until committed"]
pub struct WriteTicket {
  pub(crate) serialized: String,
  pub(crate) generation: u64,
}

impl WriteTicket {
  /// The write generation this ticket was issued at.
  pub fn generation(&self) -> u64 {
    self.generation
  }
}

impl<V, H> QueryCache<V, H>
where
  V: Send + Sync + 'static,
  H: BuildHasher + Send + Sync + 'static,
{
  /// Looks up `key`, bumping its last-access time.
  ///
  /// Staleness and expiry never hide an entry: callers judge freshness
  /// via [`CacheEntry::is_stale`] on the returned entry. An expired entry
  /// stays readable until a sweep collects it.
  pub fn get(&self, key: &QueryKey) -> Option<Arc<CacheEntry<V>>> {
    self.shared.lookup(&key.serialize())
  }

  /// Stores `data` under `key` with the cache-wide default timing,
  /// replacing any existing entry. The key's subscribers run before this
  /// returns.
  pub fn set(&self, key: &QueryKey, data: V) {
    self.set_with(key, data, EntryOptions::default());
  }

  /// Stores `data` under `key` with per-entry timing overrides.
  pub fn set_with(&self, key: &QueryKey, data: V, options: EntryOptions) {
    if self.shared.is_destroyed() {
      return;
    }
    let entry = self.shared.entry_with_defaults(data, options);
    self.shared.write(key.serialize(), entry);
  }

  /// Opens a generation-guarded write for `key`.
  pub fn begin_write(&self, key: &QueryKey) -> WriteTicket {
    WriteTicket {
      serialized: key.serialize(),
      generation: self.shared.store.next_generation(),
    }
  }

  /// Commits a guarded write with the cache-wide default timing.
  ///
  /// Returns `false`, storing nothing and notifying nobody, when the key
  /// committed anything at or after the ticket's generation: a later
  /// `set`, another commit, or an invalidation. The caller decides what
  /// to do with the refused value.
  pub fn commit(&self, ticket: WriteTicket, data: V) -> bool {
    self.commit_with(ticket, data, EntryOptions::default())
  }

  /// Commits a guarded write with per-entry timing overrides.
  pub fn commit_with(&self, ticket: WriteTicket, data: V, options: EntryOptions) -> bool {
    if self.shared.is_destroyed() {
      return false;
    }
    let entry = self.shared.entry_with_defaults(data, options);
    self.shared.write_guarded(&ticket.serialized, ticket.generation, entry)
  }

  /// Removes `key`'s entry and notifies its subscribers.
  ///
  /// Idempotent: with no entry present the store is untouched, but
  /// subscribers are still notified, so a subscriber must tolerate a
  /// notification without a visible entry change.
  pub fn invalidate(&self, key: &QueryKey) {
    self.shared.invalidate(&key.serialize());
  }

  /// Removes every entry whose serialized key contains `pattern` as a
  /// substring, notifying each affected key's subscribers.
  ///
  /// Keys are matched in their serialized form, e.g.
  /// `["google", "contacts"]`, so `"google"` matches every key with a
  /// `google` segment. A pattern that matches nothing is a no-op.
  pub fn invalidate_matching(&self, pattern: &str) {
    self.shared.invalidate_matching(pattern);
  }

  /// Registers `callback` to run on every `set`, committed write, and
  /// invalidation of `key`.
  ///
  /// Callbacks run synchronously on the mutating thread before the
  /// mutation call returns. Registrations are independent, even for an
  /// identical callback registered twice; each fires once per change and
  /// each [`Subscription`] removes exactly the registration it came from.
  pub fn subscribe(
    &self,
    key: &QueryKey,
    callback: impl Fn() + Send + Sync + 'static,
  ) -> Subscription {
    if self.shared.is_destroyed() {
      return Subscription::inert();
    }
    let serialized = key.serialize();
    let (index, epoch) = self
      .shared
      .registry
      .lock()
      .add(serialized.clone(), Arc::new(callback));
    Subscription::new(&self.shared.registry, serialized, index, epoch)
  }

  /// A point-in-time statistics snapshot.
  pub fn stats(&self) -> CacheStats {
    self
      .shared
      .metrics
      .snapshot(self.shared.store.live_len(), self.shared.registry.lock().total())
  }

  /// Removes all entries and subscription registrations without firing
  /// any notifications.
  pub fn clear(&self) {
    if self.shared.is_destroyed() {
      return;
    }
    self.shared.clear();
  }

  /// Stops the background sweeper, clears the cache, and leaves this
  /// instance permanently inert: subsequent writes store nothing, reads
  /// miss, and subscriptions are dead on arrival. Idempotent.
  ///
  /// Dropping the last handle has the same effect on the sweeper thread;
  /// `destroy` exists for tests and for shutting down a cache that other
  /// parts of the application still hold handles to.
  pub fn destroy(&self) {
    self.shared.destroy();
  }
}

impl<V: Send + Sync, H> Clone for QueryCache<V, H> {
  fn clone(&self) -> Self {
    Self { shared: self.shared.clone() }
  }
}

impl<V: Send + Sync, H> fmt::Debug for QueryCache<V, H> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("QueryCache").field("shared", &self.shared).finish()
  }
}
