mod common;

use common::build_test_cache;
use requery::QueryKey;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[test]
fn test_commit_lands_when_nothing_newer_exists() {
  let cache = build_test_cache(Duration::from_secs(60), Duration::from_secs(30));
  let key = QueryKey::new(["slow"]);

  let ticket = cache.begin_write(&key);
  assert!(cache.commit(ticket, "fetched".to_string()));
  assert_eq!(*cache.get(&key).unwrap().data(), "fetched");
}

#[test]
fn test_set_after_begin_write_defeats_the_ticket() {
  let cache = build_test_cache(Duration::from_secs(60), Duration::from_secs(30));
  let key = QueryKey::new(["raced"]);

  let ticket = cache.begin_write(&key);
  cache.set(&key, "manual-update".to_string());

  assert!(!cache.commit(ticket, "slow-response".to_string()));
  assert_eq!(*cache.get(&key).unwrap().data(), "manual-update");
  assert_eq!(cache.stats().stale_writes_rejected, 1);
}

#[test]
fn test_invalidate_defeats_an_in_flight_ticket() {
  let cache = build_test_cache(Duration::from_secs(60), Duration::from_secs(30));
  let key = QueryKey::new(["torn-down"]);

  cache.set(&key, "original".to_string());
  let ticket = cache.begin_write(&key);
  cache.invalidate(&key);

  // The slow response must not resurrect invalidated data.
  assert!(!cache.commit(ticket, "slow-response".to_string()));
  assert!(cache.get(&key).is_none());
  assert_eq!(cache.stats().entries, 0);
}

#[test]
fn test_later_ticket_wins_over_earlier() {
  let cache = build_test_cache(Duration::from_secs(60), Duration::from_secs(30));
  let key = QueryKey::new(["versioned"]);

  let earlier = cache.begin_write(&key);
  let later = cache.begin_write(&key);

  assert!(cache.commit(later, "second-fetch".to_string()));
  assert!(!cache.commit(earlier, "first-fetch".to_string()));
  assert_eq!(*cache.get(&key).unwrap().data(), "second-fetch");
}

#[test]
fn test_tickets_for_different_keys_do_not_interfere() {
  let cache = build_test_cache(Duration::from_secs(60), Duration::from_secs(30));
  let a = QueryKey::new(["a"]);
  let b = QueryKey::new(["b"]);

  let ticket_a = cache.begin_write(&a);
  cache.set(&b, "b-data".to_string());

  assert!(cache.commit(ticket_a, "a-data".to_string()));
  assert_eq!(*cache.get(&a).unwrap().data(), "a-data");
}

#[test]
fn test_rejected_commits_are_silent() {
  let cache = build_test_cache(Duration::from_secs(60), Duration::from_secs(30));
  let key = QueryKey::new(["quiet"]);
  let notified = Arc::new(AtomicUsize::new(0));
  let _sub = cache.subscribe(&key, {
    let notified = notified.clone();
    move || {
      notified.fetch_add(1, Ordering::SeqCst);
    }
  });

  let ticket = cache.begin_write(&key);
  cache.set(&key, "winner".to_string());
  cache.commit(ticket, "loser".to_string());

  // Only the set notified; the refused commit said nothing.
  assert_eq!(notified.load(Ordering::SeqCst), 1);
}

#[test]
fn test_committed_writes_notify_like_sets() {
  let cache = build_test_cache(Duration::from_secs(60), Duration::from_secs(30));
  let key = QueryKey::new(["announced"]);
  let notified = Arc::new(AtomicUsize::new(0));
  let _sub = cache.subscribe(&key, {
    let notified = notified.clone();
    move || {
      notified.fetch_add(1, Ordering::SeqCst);
    }
  });

  let ticket = cache.begin_write(&key);
  cache.commit(ticket, "fetched".to_string());

  assert_eq!(notified.load(Ordering::SeqCst), 1);
}

#[test]
fn test_commit_with_overrides_entry_timing() {
  let cache = build_test_cache(Duration::from_secs(600), Duration::from_secs(300));
  let key = QueryKey::new(["tuned"]);

  let ticket = cache.begin_write(&key);
  assert!(cache.commit_with(
    ticket,
    "v".to_string(),
    requery::EntryOptions::new().stale_after(Duration::from_secs(1)),
  ));

  let entry = cache.get(&key).unwrap();
  assert_eq!(entry.stale_after(), Duration::from_secs(1));
  assert_eq!(entry.ttl(), Duration::from_secs(600));
}
