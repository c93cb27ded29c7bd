use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crossbeam_utils::CachePadded;
use serde::Serialize;

/// Thread-safe, internal metrics collector.
///
/// Counters are padded to cache-line size so hot paths on different cores
/// do not false-share while recording events.
#[derive(Debug)]
pub(crate) struct Metrics {
  pub(crate) hits: CachePadded<AtomicU64>,
  pub(crate) misses: CachePadded<AtomicU64>,
  pub(crate) inserts: CachePadded<AtomicU64>,
  pub(crate) invalidations: CachePadded<AtomicU64>,
  pub(crate) stale_writes_rejected: CachePadded<AtomicU64>,
  pub(crate) evicted_by_gc: CachePadded<AtomicU64>,
  pub(crate) notifications_sent: CachePadded<AtomicU64>,
  pub(crate) subscriber_panics: CachePadded<AtomicU64>,
  pub(crate) refresh_failures: CachePadded<AtomicU64>,
  created_at: Instant,
}

impl Metrics {
  pub(crate) fn new() -> Self {
    Self {
      hits: CachePadded::new(AtomicU64::new(0)),
      misses: CachePadded::new(AtomicU64::new(0)),
      inserts: CachePadded::new(AtomicU64::new(0)),
      invalidations: CachePadded::new(AtomicU64::new(0)),
      stale_writes_rejected: CachePadded::new(AtomicU64::new(0)),
      evicted_by_gc: CachePadded::new(AtomicU64::new(0)),
      notifications_sent: CachePadded::new(AtomicU64::new(0)),
      subscriber_panics: CachePadded::new(AtomicU64::new(0)),
      refresh_failures: CachePadded::new(AtomicU64::new(0)),
      created_at: Instant::now(),
    }
  }

  /// Creates a point-in-time snapshot of all metrics.
  ///
  /// Entry and subscription counts live in the store and registry, so the
  /// caller supplies them.
  pub(crate) fn snapshot(&self, entries: usize, subscriptions: usize) -> CacheStats {
    CacheStats {
      entries,
      subscriptions,
      hits: self.hits.load(Ordering::Relaxed),
      misses: self.misses.load(Ordering::Relaxed),
      inserts: self.inserts.load(Ordering::Relaxed),
      invalidations: self.invalidations.load(Ordering::Relaxed),
      stale_writes_rejected: self.stale_writes_rejected.load(Ordering::Relaxed),
      evicted_by_gc: self.evicted_by_gc.load(Ordering::Relaxed),
      notifications_sent: self.notifications_sent.load(Ordering::Relaxed),
      subscriber_panics: self.subscriber_panics.load(Ordering::Relaxed),
      refresh_failures: self.refresh_failures.load(Ordering::Relaxed),
      uptime_secs: self.created_at.elapsed().as_secs_f64(),
    }
  }
}

impl Default for Metrics {
  fn default() -> Self {
    Self::new()
  }
}

/// A public, point-in-time snapshot of cache statistics.
#[derive(Clone, PartialEq, Serialize)]
pub struct CacheStats {
  /// Number of resident entries. Excludes write fences left behind by
  /// invalidation and collection.
  pub entries: usize,
  /// Number of active subscription registrations across all keys.
  pub subscriptions: usize,
  /// Reads that found a resident entry, stale or not.
  pub hits: u64,
  /// Reads that found nothing.
  pub misses: u64,
  /// Entries stored by `set` and committed tickets.
  pub inserts: u64,
  /// Entries removed by `invalidate` and `invalidate_matching`.
  pub invalidations: u64,
  /// Ticket commits refused because newer data had already landed.
  pub stale_writes_rejected: u64,
  /// Entries removed by the janitor's sweeps.
  pub evicted_by_gc: u64,
  /// Subscriber callbacks invoked.
  pub notifications_sent: u64,
  /// Subscriber callbacks that panicked and were isolated.
  pub subscriber_panics: u64,
  /// Background revalidations that failed and left stale data in place.
  pub refresh_failures: u64,
  /// Seconds since the cache was built.
  pub uptime_secs: f64,
}

impl CacheStats {
  /// Fraction of reads that hit, in `[0.0, 1.0]`. Zero when no reads have
  /// happened yet.
  pub fn hit_ratio(&self) -> f64 {
    let total = self.hits + self.misses;
    if total == 0 {
      0.0
    } else {
      self.hits as f64 / total as f64
    }
  }
}

impl fmt::Debug for CacheStats {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("CacheStats")
      .field("entries", &self.entries)
      .field("subscriptions", &self.subscriptions)
      .field("hits", &self.hits)
      .field("misses", &self.misses)
      .field("hit_ratio", &format_args!("{:.1}%", self.hit_ratio() * 100.0))
      .field("inserts", &self.inserts)
      .field("invalidations", &self.invalidations)
      .field("stale_writes_rejected", &self.stale_writes_rejected)
      .field("evicted_by_gc", &self.evicted_by_gc)
      .field("notifications_sent", &self.notifications_sent)
      .field("subscriber_panics", &self.subscriber_panics)
      .field("refresh_failures", &self.refresh_failures)
      .field("uptime_secs", &format_args!("{:.1}", self.uptime_secs))
      .finish()
  }
}
