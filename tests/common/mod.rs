use requery::{CacheBuilder, QueryCache};
use std::time::Duration;

// Builds a cache with compressed entry timings and a sweeper too slow to
// interfere with the test.
pub fn build_test_cache(ttl: Duration, stale_after: Duration) -> QueryCache<String> {
  CacheBuilder::default()
    .default_ttl(ttl)
    .default_stale_after(stale_after)
    .gc_interval(Duration::from_secs(3600))
    .gc_idle_floor(Duration::from_secs(3600))
    .build()
    .unwrap()
}
