use requery::{CacheBuilder, FetchError, QueryCache, QueryKey};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Barrier;
use tokio::time::{sleep, Duration};

fn fetch_cache(stale_after: Duration) -> QueryCache<String> {
  CacheBuilder::default()
    .default_ttl(Duration::from_secs(600))
    .default_stale_after(stale_after)
    .gc_interval(Duration::from_secs(3600))
    .gc_idle_floor(Duration::from_secs(3600))
    .build()
    .unwrap()
}

#[tokio::test]
async fn test_fetch_populates_on_miss() {
  let cache = fetch_cache(Duration::from_secs(300));
  let key = QueryKey::new(["contacts"]);
  let calls = Arc::new(AtomicUsize::new(0));

  let value = cache
    .fetch_with(&key, {
      let calls = calls.clone();
      move || async move {
        calls.fetch_add(1, Ordering::SeqCst);
        Ok::<String, String>("loaded".to_string())
      }
    })
    .await
    .unwrap();

  assert_eq!(*value, "loaded");
  assert_eq!(calls.load(Ordering::SeqCst), 1);
  assert_eq!(*cache.get(&key).unwrap().data(), "loaded");
  assert_eq!(cache.stats().inserts, 1);
}

#[tokio::test]
async fn test_fresh_hit_skips_the_loader() {
  let cache = fetch_cache(Duration::from_secs(300));
  let key = QueryKey::new(["contacts"]);
  let calls = Arc::new(AtomicUsize::new(0));

  for _ in 0..3 {
    let value = cache
      .fetch_with(&key, {
        let calls = calls.clone();
        move || async move {
          calls.fetch_add(1, Ordering::SeqCst);
          Ok::<String, String>("loaded".to_string())
        }
      })
      .await
      .unwrap();
    assert_eq!(*value, "loaded");
  }

  assert_eq!(calls.load(Ordering::SeqCst), 1, "fresh hits must not reload");
}

#[tokio::test]
async fn test_stale_hit_serves_stale_then_refreshes_in_background() {
  let cache = fetch_cache(Duration::from_millis(20));
  let key = QueryKey::new(["contacts"]);

  cache.set(&key, "v1".to_string());
  sleep(Duration::from_millis(50)).await;
  assert!(cache.get(&key).unwrap().is_stale());

  // The stale value comes back immediately; the refresh lands behind us.
  let value = cache
    .fetch_with(&key, move || async move { Ok::<String, String>("v2".to_string()) })
    .await
    .unwrap();
  assert_eq!(*value, "v1");

  let mut refreshed = false;
  for _ in 0..200 {
    if *cache.get(&key).unwrap().data() == "v2" {
      refreshed = true;
      break;
    }
    sleep(Duration::from_millis(5)).await;
  }
  assert!(refreshed, "background refresh never landed");
  assert!(!cache.get(&key).unwrap().is_stale());
}

#[tokio::test]
async fn test_failed_refresh_keeps_serving_stale() {
  let cache = fetch_cache(Duration::from_millis(20));
  let key = QueryKey::new(["contacts"]);

  cache.set(&key, "v1".to_string());
  sleep(Duration::from_millis(50)).await;

  let value = cache
    .fetch_with(&key, move || async move {
      Err::<String, String>("backend down".to_string())
    })
    .await
    .unwrap();
  assert_eq!(*value, "v1", "a failing refresh must not surface to the reader");

  let mut counted = false;
  for _ in 0..200 {
    if cache.stats().refresh_failures == 1 {
      counted = true;
      break;
    }
    sleep(Duration::from_millis(5)).await;
  }
  assert!(counted);
  assert_eq!(*cache.get(&key).unwrap().data(), "v1");
}

#[tokio::test]
async fn test_concurrent_stale_hits_share_one_refresh() {
  let cache = Arc::new(fetch_cache(Duration::from_millis(20)));
  let key = QueryKey::new(["contacts"]);
  let calls = Arc::new(AtomicUsize::new(0));

  cache.set(&key, "v1".to_string());
  sleep(Duration::from_millis(50)).await;

  let mut tasks = vec![];
  for _ in 0..5 {
    let cache = cache.clone();
    let key = key.clone();
    let calls = calls.clone();
    tasks.push(tokio::spawn(async move {
      let value = cache
        .fetch_with(&key, move || async move {
          calls.fetch_add(1, Ordering::SeqCst);
          sleep(Duration::from_millis(40)).await;
          Ok::<String, String>("v2".to_string())
        })
        .await
        .unwrap();
      assert_eq!(*value, "v1");
    }));
  }
  for task in tasks {
    task.await.unwrap();
  }

  let mut refreshed = false;
  for _ in 0..200 {
    if *cache.get(&key).unwrap().data() == "v2" {
      refreshed = true;
      break;
    }
    sleep(Duration::from_millis(5)).await;
  }
  assert!(refreshed);
  assert_eq!(calls.load(Ordering::SeqCst), 1, "only one refresh may run per key");
}

#[tokio::test]
async fn test_thundering_herd_collapses_to_one_load() {
  let cache = Arc::new(fetch_cache(Duration::from_secs(300)));
  let key = QueryKey::new(["hub"]);
  let calls = Arc::new(AtomicUsize::new(0));
  let num_tasks = 20;

  let barrier = Arc::new(Barrier::new(num_tasks));
  let mut tasks = vec![];
  for _ in 0..num_tasks {
    let cache = cache.clone();
    let key = key.clone();
    let calls = calls.clone();
    let barrier = barrier.clone();
    tasks.push(tokio::spawn(async move {
      barrier.wait().await;
      let value = cache
        .fetch_with(&key, move || async move {
          // Simulate a slow backend call.
          sleep(Duration::from_millis(100)).await;
          calls.fetch_add(1, Ordering::SeqCst);
          Ok::<String, String>("hub-data".to_string())
        })
        .await
        .unwrap();
      assert_eq!(*value, "hub-data");
    }));
  }
  for task in tasks {
    task.await.unwrap();
  }

  assert_eq!(
    calls.load(Ordering::SeqCst),
    1,
    "request deduplication failed: loader ran more than once"
  );
  assert_eq!(cache.stats().inserts, 1);
}

#[tokio::test]
async fn test_waiters_observe_a_shared_failure() {
  let cache = Arc::new(fetch_cache(Duration::from_secs(300)));
  let key = QueryKey::new(["flaky"]);
  let waiter_calls = Arc::new(AtomicUsize::new(0));

  let leader = {
    let cache = cache.clone();
    let key = key.clone();
    tokio::spawn(async move {
      cache
        .fetch_with(&key, move || async move {
          sleep(Duration::from_millis(60)).await;
          Err::<String, String>("boom".to_string())
        })
        .await
    })
  };

  sleep(Duration::from_millis(15)).await;
  let waiter_result = cache
    .fetch_with(&key, {
      let waiter_calls = waiter_calls.clone();
      move || async move {
        waiter_calls.fetch_add(1, Ordering::SeqCst);
        Ok::<String, String>("never".to_string())
      }
    })
    .await;

  match leader.await.unwrap() {
    Err(FetchError::Fetch(message)) => assert_eq!(message, "boom"),
    other => panic!("leader should see its own typed error, got {other:?}"),
  }
  match waiter_result {
    Err(FetchError::Shared(failure)) => assert!(failure.message().contains("boom")),
    other => panic!("waiter should see the shared failure, got {other:?}"),
  }
  assert_eq!(waiter_calls.load(Ordering::SeqCst), 0);
  assert!(cache.get(&key).is_none(), "failed loads must not populate the cache");
}

#[tokio::test]
async fn test_set_during_a_slow_fetch_wins() {
  let cache = Arc::new(fetch_cache(Duration::from_secs(300)));
  let key = QueryKey::new(["raced"]);

  let fetch = {
    let cache = cache.clone();
    let key = key.clone();
    tokio::spawn(async move {
      cache
        .fetch_with(&key, move || async move {
          sleep(Duration::from_millis(80)).await;
          Ok::<String, String>("slow-response".to_string())
        })
        .await
    })
  };

  sleep(Duration::from_millis(20)).await;
  cache.set(&key, "manual-update".to_string());

  // The fetch caller still receives the data it fetched.
  let fetched = fetch.await.unwrap().unwrap();
  assert_eq!(*fetched, "slow-response");

  // The cache keeps the newer write.
  assert_eq!(*cache.get(&key).unwrap().data(), "manual-update");
  assert_eq!(cache.stats().stale_writes_rejected, 1);
}

#[tokio::test]
async fn test_invalidate_during_a_slow_fetch_is_not_resurrected() {
  let cache = Arc::new(fetch_cache(Duration::from_secs(300)));
  let key = QueryKey::new(["torn-down"]);

  let fetch = {
    let cache = cache.clone();
    let key = key.clone();
    tokio::spawn(async move {
      cache
        .fetch_with(&key, move || async move {
          sleep(Duration::from_millis(80)).await;
          Ok::<String, String>("slow-response".to_string())
        })
        .await
    })
  };

  sleep(Duration::from_millis(20)).await;
  cache.invalidate(&key);

  let fetched = fetch.await.unwrap().unwrap();
  assert_eq!(*fetched, "slow-response");

  assert!(
    cache.get(&key).is_none(),
    "an invalidated key must stay empty until something newer writes it"
  );
}

#[test]
fn test_refresh_runs_inline_without_a_spawner() {
  // Built outside any runtime, so no spawner is detected.
  let cache = fetch_cache(Duration::from_millis(20));
  let key = QueryKey::new(["contacts"]);

  cache.set(&key, "v1".to_string());
  std::thread::sleep(Duration::from_millis(50));

  let runtime = tokio::runtime::Runtime::new().unwrap();
  let value = runtime
    .block_on(cache.fetch_with(&key, move || async move {
      Ok::<String, String>("v2".to_string())
    }))
    .unwrap();

  // Inline refresh completes before returning, so the caller gets the
  // fresh value directly.
  assert_eq!(*value, "v2");
  assert_eq!(*cache.get(&key).unwrap().data(), "v2");
}

#[test]
fn test_failed_inline_refresh_falls_back_to_stale() {
  let cache = fetch_cache(Duration::from_millis(20));
  let key = QueryKey::new(["contacts"]);

  cache.set(&key, "v1".to_string());
  std::thread::sleep(Duration::from_millis(50));

  let runtime = tokio::runtime::Runtime::new().unwrap();
  let value = runtime
    .block_on(cache.fetch_with(&key, move || async move {
      Err::<String, String>("backend down".to_string())
    }))
    .unwrap();

  assert_eq!(*value, "v1");
  assert_eq!(cache.stats().refresh_failures, 1);
}

#[tokio::test]
async fn test_fetch_on_a_destroyed_cache_passes_through() {
  let cache = fetch_cache(Duration::from_secs(300));
  let key = QueryKey::new(["contacts"]);
  let calls = Arc::new(AtomicUsize::new(0));

  cache.destroy();

  for expected in 1..=2u32 {
    let value = cache
      .fetch_with(&key, {
        let calls = calls.clone();
        move || async move {
          calls.fetch_add(1, Ordering::SeqCst);
          Ok::<String, String>("direct".to_string())
        }
      })
      .await
      .unwrap();
    assert_eq!(*value, "direct");
    assert_eq!(calls.load(Ordering::SeqCst), expected as usize);
  }

  assert!(cache.get(&key).is_none(), "a destroyed cache stores nothing");
}

#[tokio::test]
async fn test_expired_resident_entries_also_revalidate() {
  // TTL shorter than the staleness window; the entry expires while still
  // reading as not-stale, and a fetch refreshes it anyway.
  let cache = CacheBuilder::default()
    .default_ttl(Duration::from_millis(20))
    .default_stale_after(Duration::from_secs(600))
    .gc_interval(Duration::from_secs(3600))
    .gc_idle_floor(Duration::from_secs(3600))
    .build()
    .unwrap();
  let key = QueryKey::new(["short-lived"]);

  cache.set(&key, "v1".to_string());
  sleep(Duration::from_millis(50)).await;
  assert!(cache.get(&key).unwrap().is_expired());

  let value = cache
    .fetch_with(&key, move || async move { Ok::<String, String>("v2".to_string()) })
    .await
    .unwrap();
  assert_eq!(*value, "v1");

  let mut refreshed = false;
  for _ in 0..200 {
    if *cache.get(&key).unwrap().data() == "v2" {
      refreshed = true;
      break;
    }
    sleep(Duration::from_millis(5)).await;
  }
  assert!(refreshed);
}
