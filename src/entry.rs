use crate::time;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// A cached payload together with the timing metadata tracked for it.
///
/// Entries are handed out as `Arc<CacheEntry<V>>` snapshots; the payload
/// itself is behind a second `Arc` so callers can hold the data without
/// pinning the bookkeeping.
///
/// Two independent windows govern an entry's lifecycle:
///
/// * **staleness** (`stale_after`): once exceeded, reads still succeed but
///   [`is_stale`](Self::is_stale) reports `true` and a refresh is due.
/// * **expiry** (`ttl`): once exceeded, the entry becomes eligible for
///   garbage collection. Expiry does not hide the entry from reads; only a
///   sweep removes it, and only if it has also gone cold.
#[derive(Debug)]
pub struct CacheEntry<V> {
  data: Arc<V>,
  /// When the write that produced this entry happened, nanos since epoch.
  written_at: u64,
  /// When this entry was last read. Never earlier than `written_at`.
  last_accessed: AtomicU64,
  ttl: Duration,
  stale_after: Duration,
}

impl<V> CacheEntry<V> {
  pub(crate) fn new(data: V, ttl: Duration, stale_after: Duration) -> Self {
    let now = time::now_nanos();
    Self {
      data: Arc::new(data),
      written_at: now,
      last_accessed: AtomicU64::new(now),
      ttl,
      stale_after,
    }
  }

  /// Returns a clone of the `Arc` holding the payload.
  #[inline]
  pub fn data(&self) -> Arc<V> {
    self.data.clone()
  }

  /// Marks the entry as read now.
  #[inline]
  pub(crate) fn touch(&self) {
    self.last_accessed.store(time::now_nanos(), Ordering::Relaxed);
  }

  /// True once the entry has outlived its staleness window.
  #[inline]
  pub fn is_stale(&self) -> bool {
    self.age() > self.stale_after
  }

  /// True once the entry has outlived its TTL.
  ///
  /// Governs collection eligibility, not read visibility: an expired entry
  /// keeps serving reads until a sweep removes it.
  #[inline]
  pub fn is_expired(&self) -> bool {
    self.age() > self.ttl
  }

  /// Time elapsed since the write that produced this entry.
  pub fn age(&self) -> Duration {
    Duration::from_nanos(time::now_nanos().saturating_sub(self.written_at))
  }

  /// Time elapsed since the most recent read, or since the write if the
  /// entry has never been read.
  pub fn idle(&self) -> Duration {
    let last = self.last_accessed.load(Ordering::Relaxed);
    Duration::from_nanos(time::now_nanos().saturating_sub(last))
  }

  /// The lifetime after which this entry is eligible for collection.
  pub fn ttl(&self) -> Duration {
    self.ttl
  }

  /// The window after which this entry reads as stale.
  pub fn stale_after(&self) -> Duration {
    self.stale_after
  }
}

/// Per-write overrides for an entry's timing.
///
/// Fields left as `None` fall back to the cache-wide defaults configured at
/// build time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EntryOptions {
  pub ttl: Option<Duration>,
  pub stale_after: Option<Duration>,
}

impl EntryOptions {
  pub fn new() -> Self {
    Self::default()
  }

  /// Overrides the entry's TTL.
  pub fn ttl(mut self, ttl: Duration) -> Self {
    self.ttl = Some(ttl);
    self
  }

  /// Overrides the entry's staleness window.
  pub fn stale_after(mut self, stale_after: Duration) -> Self {
    self.stale_after = Some(stale_after);
    self
  }
}
