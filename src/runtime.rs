use std::future::Future;
use std::pin::Pin;

/// A trait for spawning a future onto an asynchronous runtime.
///
/// The fetch layer uses this to run stale-while-revalidate refreshes off
/// the caller's critical path. Without a spawner the cache still works;
/// refreshes just run inline in the calling task.
pub trait TaskSpawner: Send + Sync + 'static {
  /// Spawns a type-erased future onto the runtime.
  fn spawn(&self, future: Pin<Box<dyn Future<Output = ()> + Send>>);
}

/// A `TaskSpawner` backed by a Tokio runtime handle.
#[cfg(feature = "tokio")]
#[derive(Debug, Clone)]
pub struct TokioSpawner(tokio::runtime::Handle);

#[cfg(feature = "tokio")]
impl TokioSpawner {
  /// Creates a spawner for the current Tokio runtime context.
  ///
  /// # Panics
  /// Panics when called outside a Tokio runtime. Use
  /// [`try_current`](Self::try_current) for a fallible variant.
  pub fn new() -> Self {
    Self(tokio::runtime::Handle::current())
  }

  /// Creates a spawner for the current Tokio runtime context, or `None`
  /// when there is none.
  pub fn try_current() -> Option<Self> {
    tokio::runtime::Handle::try_current().ok().map(Self)
  }

  /// Creates a spawner for a specific runtime handle.
  pub fn from_handle(handle: tokio::runtime::Handle) -> Self {
    Self(handle)
  }
}

#[cfg(feature = "tokio")]
impl TaskSpawner for TokioSpawner {
  fn spawn(&self, future: Pin<Box<dyn Future<Output = ()> + Send>>) {
    self.0.spawn(future);
  }
}
