use requery::{CacheBuilder, QueryKey};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::time::{sleep, Duration};

#[derive(Debug, Clone, PartialEq)]
struct Payload {
  version: usize,
  content: String,
}

async fn load(counter: Arc<AtomicUsize>) -> Result<Payload, String> {
  let version = counter.fetch_add(1, Ordering::SeqCst) + 1;
  println!("[Loader] loading version {}...", version);
  sleep(Duration::from_millis(300)).await;
  Ok(Payload {
    version,
    content: format!("inbox snapshot v{}", version),
  })
}

#[tokio::main]
async fn main() {
  let load_counter = Arc::new(AtomicUsize::new(0));

  // Built inside the runtime, so stale refreshes run as background tasks.
  let cache = CacheBuilder::default()
    .default_ttl(Duration::from_secs(30))
    .default_stale_after(Duration::from_secs(1))
    .build()
    .unwrap();

  let key = QueryKey::new(["gmail", "inbox"]);

  println!("--- Step 1: Initial load ---");
  let value = cache
    .fetch_with(&key, {
      let counter = load_counter.clone();
      move || load(counter)
    })
    .await
    .unwrap();
  println!("received: {:?}", *value);
  assert_eq!(value.version, 1);

  println!("\n--- Step 2: Fresh hit, no load ---");
  let value = cache
    .fetch_with(&key, {
      let counter = load_counter.clone();
      move || load(counter)
    })
    .await
    .unwrap();
  println!("received: {:?}", *value);
  assert_eq!(load_counter.load(Ordering::SeqCst), 1);

  println!("\n--- Step 3: Let the entry go stale ---");
  sleep(Duration::from_millis(1200)).await;

  println!("\n--- Step 4: Stale read returns immediately ---");
  let value = cache
    .fetch_with(&key, {
      let counter = load_counter.clone();
      move || load(counter)
    })
    .await
    .unwrap();
  println!("received immediately (stale): {:?}", *value);
  assert_eq!(value.version, 1, "stale value served while refresh runs");

  println!("\n--- Step 5: Refresh lands behind us ---");
  sleep(Duration::from_millis(600)).await;
  let entry = cache.get(&key).unwrap();
  println!("resident now: {:?}", entry.data());
  assert_eq!(entry.data().version, 2);
  assert_eq!(load_counter.load(Ordering::SeqCst), 2);

  println!("\nStats: {:#?}", cache.stats());
  cache.destroy();
}
