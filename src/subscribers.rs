use std::fmt;
use std::sync::{Arc, Weak};

use generational_arena::{Arena, Index};
use parking_lot::Mutex;

/// A registered change callback.
///
/// Callbacks take no arguments: a notification says "this key changed",
/// and interested code re-reads the cache for the current state. That keeps
/// the registry independent of the cached value type.
pub(crate) type SubscriberFn = Arc<dyn Fn() + Send + Sync>;

/// Per-key callback registrations.
///
/// Each key owns an arena of callbacks. Arena indices double as
/// registration handles, so removing one registration is O(1) and cannot
/// disturb an identical callback registered twice. Generational indices
/// also make a stored handle safe to use after its slot was recycled; a
/// stale handle removes nothing.
///
/// The epoch advances on `clear`, which invalidates every handle issued
/// before it. Arenas rebuilt after a clear restart their generations, so
/// without the epoch an old handle could alias a new registration.
#[derive(Default)]
pub(crate) struct SubscriberRegistry {
  keys: ahash::HashMap<String, Arena<SubscriberFn>>,
  epoch: u64,
}

impl SubscriberRegistry {
  pub(crate) fn add(&mut self, key: String, callback: SubscriberFn) -> (Index, u64) {
    let index = self.keys.entry(key).or_insert_with(Arena::new).insert(callback);
    (index, self.epoch)
  }

  /// Removes one registration. Returns whether anything was removed.
  ///
  /// A key whose arena drains is dropped from the map outright so the
  /// registry does not accumulate dead keys.
  pub(crate) fn remove(&mut self, key: &str, index: Index, epoch: u64) -> bool {
    if epoch != self.epoch {
      return false;
    }
    let Some(arena) = self.keys.get_mut(key) else {
      return false;
    };
    let removed = arena.remove(index).is_some();
    if arena.is_empty() {
      self.keys.remove(key);
    }
    removed
  }

  /// Snapshots a key's callbacks, in registration order, for invocation
  /// outside the registry lock.
  pub(crate) fn callbacks(&self, key: &str) -> Vec<SubscriberFn> {
    self
      .keys
      .get(key)
      .map(|arena| arena.iter().map(|(_, callback)| callback.clone()).collect())
      .unwrap_or_default()
  }

  pub(crate) fn total(&self) -> usize {
    self.keys.values().map(Arena::len).sum()
  }

  pub(crate) fn key_count(&self) -> usize {
    self.keys.len()
  }

  pub(crate) fn clear(&mut self) {
    self.keys.clear();
    self.epoch += 1;
  }
}

/// Undoes one `subscribe` registration.
///
/// Dropping the handle unsubscribes. Call [`detach`](Self::detach) to keep
/// the registration for the cache's lifetime instead, or
/// [`unsubscribe`](Self::unsubscribe) to remove it eagerly. A registration
/// is removed at most once, and removal after `clear` or `destroy` is a
/// no-op.
#[must_use = "dropping a Subscription immediately unsubscribes; call detach() to keep it"]
pub struct Subscription {
  inner: Option<SubscriptionInner>,
}

struct SubscriptionInner {
  registry: Weak<Mutex<SubscriberRegistry>>,
  key: String,
  index: Index,
  epoch: u64,
}

impl Subscription {
  pub(crate) fn new(
    registry: &Arc<Mutex<SubscriberRegistry>>,
    key: String,
    index: Index,
    epoch: u64,
  ) -> Self {
    Self {
      inner: Some(SubscriptionInner {
        registry: Arc::downgrade(registry),
        key,
        index,
        epoch,
      }),
    }
  }

  /// A handle that is not connected to any registration. Subscribing to a
  /// destroyed cache yields one of these.
  pub(crate) fn inert() -> Self {
    Self { inner: None }
  }

  /// Removes this registration now.
  pub fn unsubscribe(mut self) {
    self.release();
  }

  /// Keeps this registration alive for the cache's lifetime, consuming the
  /// handle without unsubscribing.
  pub fn detach(mut self) {
    self.inner = None;
  }

  /// Whether this handle still points at a registration.
  pub fn is_active(&self) -> bool {
    self.inner.is_some()
  }

  fn release(&mut self) {
    if let Some(inner) = self.inner.take() {
      if let Some(registry) = inner.registry.upgrade() {
        registry.lock().remove(&inner.key, inner.index, inner.epoch);
      }
    }
  }
}

impl Drop for Subscription {
  fn drop(&mut self) {
    self.release();
  }
}

impl fmt::Debug for Subscription {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Subscription")
      .field("active", &self.is_active())
      .finish()
  }
}
