use crate::metrics::Metrics;
use crate::store::{Slot, Store};
use crate::time;

use std::hash::BuildHasher;
use std::sync::atomic::Ordering;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// A context object holding the parts of the cache the janitor needs.
pub(crate) struct JanitorContext<V, H> {
  pub(crate) store: Arc<Store<V, H>>,
  pub(crate) metrics: Arc<Metrics>,
  /// Entries read within this window are never collected, even past TTL.
  pub(crate) idle_floor: Duration,
}

/// The background thread that sweeps cold, expired entries and prunes old
/// write fences.
///
/// The janitor is owned by the cache that spawned it and stops when the
/// cache is destroyed or dropped. It never re-arms.
pub(crate) struct Janitor {
  handle: Option<JoinHandle<()>>,
  stop_tx: mpsc::Sender<()>,
}

impl Janitor {
  /// Spawns the janitor thread, sweeping every `tick_interval`.
  pub(crate) fn spawn<V, H>(context: JanitorContext<V, H>, tick_interval: Duration) -> Self
  where
    V: Send + Sync + 'static,
    H: BuildHasher + Send + Sync + 'static,
  {
    let (stop_tx, stop_rx) = mpsc::channel::<()>();

    let handle = thread::Builder::new()
      .name("requery-janitor".into())
      .spawn(move || loop {
        match stop_rx.recv_timeout(tick_interval) {
          // Tick elapsed with no stop signal: run a sweep.
          Err(RecvTimeoutError::Timeout) => sweep(&context),
          // Stop signal, or the sender dropped with the cache.
          Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
      })
      .expect("failed to spawn janitor thread");

    Self { handle: Some(handle), stop_tx }
  }

  /// Signals the thread to stop and waits for it to exit.
  ///
  /// The thread wakes from its tick wait immediately, so this does not
  /// block for a full interval.
  pub(crate) fn stop(mut self) {
    let _ = self.stop_tx.send(());
    if let Some(handle) = self.handle.take() {
      let _ = handle.join();
    }
  }
}

/// One sweep over the whole key space.
///
/// An entry is collected only when it is past its TTL *and* has not been
/// read within the idle floor. The conjunction means a hot entry survives
/// expiry and a cold entry survives until expiry; neither condition alone
/// removes anything. Collection leaves a fence carrying the slot's
/// committed generation, so an in-flight guarded write against the entry
/// is still judged against the data it set out to replace.
///
/// Sweeps also drop fences older than the idle floor; any ticket that old
/// has long been superseded. Sweeps never notify subscribers: collection
/// is housekeeping, not a data change.
pub(crate) fn sweep<V, H: BuildHasher>(context: &JanitorContext<V, H>) {
  let floor = context.idle_floor;
  let now = time::now_nanos();
  let floor_nanos = floor.as_nanos() as u64;

  let mut evicted: u64 = 0;
  let fences_pruned;
  {
    let mut guard = context.store.map.write();

    for slot in guard.values_mut() {
      let committed = match slot {
        Slot::Live { entry, committed }
          if entry.is_expired() && entry.idle() > floor =>
        {
          *committed
        }
        _ => continue,
      };
      evicted += 1;
      *slot = Slot::Fenced { committed, fenced_at: now };
    }

    let before = guard.len();
    guard.retain(|_, slot| match slot {
      Slot::Fenced { fenced_at, .. } => now.saturating_sub(*fenced_at) <= floor_nanos,
      Slot::Live { .. } => true,
    });
    fences_pruned = (before - guard.len()) as u64;
  }

  if evicted > 0 {
    context.metrics.evicted_by_gc.fetch_add(evicted, Ordering::Relaxed);
  }
  if evicted > 0 || fences_pruned > 0 {
    tracing::trace!(evicted, fences_pruned, "janitor sweep");
  }
}
