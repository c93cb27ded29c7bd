use thiserror::Error;

/// Errors returned by `CacheBuilder::build` for configurations that cannot
/// produce a working cache.
///
/// Construction is the only fallible surface; once built, cache operations
/// do not return errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BuildError {
  /// The default TTL was zero, which would make every entry eligible for
  /// collection the moment it is written.
  #[error("default ttl must be non-zero")]
  ZeroTtl,

  /// The sweep interval was zero, which would spin the janitor thread.
  #[error("garbage collection interval must be non-zero")]
  ZeroGcInterval,
}
