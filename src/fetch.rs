//! Request deduplication and stale-while-revalidate on top of the cache.
//!
//! `fetch_with` is the read path most applications want: it serves resident
//! data immediately, runs the caller's loader only when something is
//! missing or due for a refresh, and collapses concurrent loads of the
//! same key into one.

use crate::entry::EntryOptions;
use crate::handles::QueryCache;
use crate::key::QueryKey;
use crate::shared::CacheShared;

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::hash::BuildHasher;
use std::pin::Pin;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

use parking_lot::Mutex;
use thiserror::Error;

/// Why a `fetch_with` call came back empty-handed.
///
/// The cache itself does not fail; both variants carry a loader failure
/// through to the caller.
#[derive(Debug, Error)]
pub enum FetchError<E> {
  /// This caller's own loader ran and failed.
  #[error("fetch failed: {0}")]
  Fetch(E),

  /// The caller waited on a load led by another caller, and that load
  /// failed. Only the failure message crosses between callers; the typed
  /// error stays with the caller whose loader produced it.
  #[error("shared fetch failed: {0}")]
  Shared(SharedFailure),
}

/// The message of a loader failure observed through a shared in-flight
/// load.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct SharedFailure(Arc<str>);

impl SharedFailure {
  pub(crate) fn new(message: impl fmt::Display) -> Self {
    Self(message.to_string().into())
  }

  pub fn message(&self) -> &str {
    &self.0
  }
}

/// What every caller of one in-flight load receives.
pub(crate) type LoadResult<V> = Result<Arc<V>, SharedFailure>;

/// The internal state of a value being loaded.
enum State<V> {
  Computing,
  Complete(LoadResult<V>),
}

struct Inner<V> {
  state: State<V>,
  waiters: VecDeque<Waker>,
}

/// A load in flight for one key. Every deduplicated caller awaits the same
/// future; whoever leads the load completes it for all of them.
pub(crate) struct LoadFuture<V> {
  inner: Mutex<Inner<V>>,
}

impl<V> LoadFuture<V> {
  pub(crate) fn new() -> Self {
    Self {
      inner: Mutex::new(Inner {
        state: State::Computing,
        waiters: VecDeque::new(),
      }),
    }
  }

  /// Completes the load, waking all waiters.
  pub(crate) fn complete(&self, result: LoadResult<V>) {
    let mut inner = self.inner.lock();
    inner.state = State::Complete(result);
    for waiter in inner.waiters.drain(..) {
      waiter.wake();
    }
  }
}

impl<V> Future for &LoadFuture<V> {
  type Output = LoadResult<V>;

  fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
    let mut inner = self.inner.lock();
    match &inner.state {
      State::Complete(result) => Poll::Ready(result.clone()),
      State::Computing => {
        inner.waiters.push_back(cx.waker().clone());
        Poll::Pending
      }
    }
  }
}

/// Cleans up a leader's pending-load registration if the leader goes away
/// before completing it, so later fetches never wait on a load nobody is
/// driving.
struct PendingGuard<V: Send + Sync, H> {
  shared: Arc<CacheShared<V, H>>,
  serialized: String,
  load: Arc<LoadFuture<V>>,
  done: bool,
}

impl<V: Send + Sync, H> PendingGuard<V, H> {
  fn new(shared: Arc<CacheShared<V, H>>, serialized: String, load: Arc<LoadFuture<V>>) -> Self {
    Self { shared, serialized, load, done: false }
  }

  /// Publishes the load's outcome and retires the pending registration.
  fn complete(mut self, result: LoadResult<V>) {
    self.finish(result);
  }

  fn finish(&mut self, result: LoadResult<V>) {
    self.done = true;
    self.shared.pending.lock().remove(&self.serialized);
    self.load.complete(result);
  }
}

impl<V: Send + Sync, H> Drop for PendingGuard<V, H> {
  fn drop(&mut self) {
    if !self.done {
      self.finish(Err(SharedFailure::new("load abandoned before completion")));
    }
  }
}

impl<V, H> QueryCache<V, H>
where
  V: Send + Sync + 'static,
  H: BuildHasher + Send + Sync + 'static,
{
  /// Looks up `key`, running `loader` when the cached data is missing or
  /// due for a refresh.
  ///
  /// * **Fresh hit**: returns the cached data; the loader never runs.
  /// * **Stale or expired hit**: returns the cached data immediately and
  ///   revalidates with `loader` in the background when a task spawner is
  ///   available. Without one, the refresh runs inline and the fresh
  ///   value is returned. A failed refresh keeps serving the old value
  ///   and surfaces nowhere except the `refresh_failures` counter.
  /// * **Miss**: runs the loader, caches the result, and returns it.
  ///   Concurrent fetches of the same key share one load; the leader gets
  ///   its loader's error back typed as [`FetchError::Fetch`], waiters on
  ///   a failed load get [`FetchError::Shared`].
  ///
  /// Every write lands through a generation guard taken when the load
  /// begins, so a slow loader cannot clobber data that was `set` or
  /// invalidated while it ran. Failed fetches are never retried
  /// internally; retry policy belongs to the caller.
  ///
  /// Dropping the returned future before it resolves abandons this
  /// caller. If that caller was leading a shared load, waiters receive
  /// [`FetchError::Shared`] and the next fetch starts over.
  pub async fn fetch_with<F, Fut, E>(
    &self,
    key: &QueryKey,
    loader: F,
  ) -> Result<Arc<V>, FetchError<E>>
  where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<V, E>> + Send + 'static,
    E: fmt::Display + Send + 'static,
  {
    let serialized = key.serialize();

    if self.shared.is_destroyed() {
      // Inert instance: the data still flows, nothing is stored.
      return match loader().await {
        Ok(data) => Ok(Arc::new(data)),
        Err(e) => Err(FetchError::Fetch(e)),
      };
    }

    if let Some(entry) = self.shared.lookup(&serialized) {
      if entry.is_stale() || entry.is_expired() {
        return self.revalidate(serialized, entry.data(), loader).await;
      }
      return Ok(entry.data());
    }

    // Miss: join an in-flight load, or lead a new one.
    let (load, leader) = {
      let mut pending = self.shared.pending.lock();
      match pending.get(&serialized) {
        Some(load) => (load.clone(), false),
        None => {
          let load = Arc::new(LoadFuture::new());
          pending.insert(serialized.clone(), load.clone());
          (load, true)
        }
      }
    };

    if !leader {
      return (&*load).await.map_err(FetchError::Shared);
    }

    let generation = self.shared.store.next_generation();
    let guard = PendingGuard::new(self.shared.clone(), serialized.clone(), load);

    match loader().await {
      Ok(data) => {
        let entry = self.shared.entry_with_defaults(data, EntryOptions::default());
        let value = entry.data();
        // A refused commit still hands the fetched value to every caller;
        // the cache just declines to remember it.
        self.shared.write_guarded(&serialized, generation, entry);
        guard.complete(Ok(value.clone()));
        Ok(value)
      }
      Err(e) => {
        guard.complete(Err(SharedFailure::new(&e)));
        Err(FetchError::Fetch(e))
      }
    }
  }

  /// Serves `cached` while refreshing it, or refreshes inline when no
  /// spawner is configured.
  async fn revalidate<F, Fut, E>(
    &self,
    serialized: String,
    cached: Arc<V>,
    loader: F,
  ) -> Result<Arc<V>, FetchError<E>>
  where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<V, E>> + Send + 'static,
    E: fmt::Display + Send + 'static,
  {
    // One refresh per key at a time; every other stale hit just serves
    // the resident value.
    let load = {
      let mut pending = self.shared.pending.lock();
      if pending.contains_key(&serialized) {
        None
      } else {
        let load = Arc::new(LoadFuture::new());
        pending.insert(serialized.clone(), load.clone());
        Some(load)
      }
    };
    let Some(load) = load else {
      return Ok(cached);
    };

    let generation = self.shared.store.next_generation();
    let refresh = {
      let shared = self.shared.clone();
      let serialized = serialized.clone();
      async move {
        let guard = PendingGuard::new(shared.clone(), serialized.clone(), load);
        match loader().await {
          Ok(data) => {
            let entry = shared.entry_with_defaults(data, EntryOptions::default());
            let value = entry.data();
            shared.write_guarded(&serialized, generation, entry);
            guard.complete(Ok(value.clone()));
            Some(value)
          }
          Err(e) => {
            shared.metrics.refresh_failures.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(key = %serialized, error = %e, "refresh failed, serving stale");
            guard.complete(Err(SharedFailure::new(&e)));
            None
          }
        }
      }
    };

    match &self.shared.spawner {
      Some(spawner) => {
        spawner.spawn(Box::pin(async move {
          refresh.await;
        }));
        Ok(cached)
      }
      None => {
        // No spawner: refresh in the calling task. Failure falls back to
        // the value we already have.
        match refresh.await {
          Some(fresh) => Ok(fresh),
          None => Ok(cached),
        }
      }
    }
  }
}
