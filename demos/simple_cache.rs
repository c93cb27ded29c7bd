use requery::{CacheBuilder, EntryOptions, QueryKey};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn main() {
  let cache = CacheBuilder::default()
    .default_ttl(Duration::from_secs(2))
    .default_stale_after(Duration::from_millis(500))
    .build()
    .unwrap();

  let contacts = QueryKey::new(["google", "contacts"]);
  let calendar = QueryKey::new(["google", "calendar"]);
  let threads = QueryKey::new(["gmail", "threads"]);

  let notifications = Arc::new(AtomicUsize::new(0));
  let _watch = cache.subscribe(&contacts, {
    let notifications = notifications.clone();
    move || {
      let n = notifications.fetch_add(1, Ordering::SeqCst) + 1;
      println!("[Subscriber] contacts changed (notification #{})", n);
    }
  });

  println!("--- Step 1: Populate ---");
  cache.set(&contacts, "512 contacts".to_string());
  cache.set(&calendar, "31 events".to_string());
  cache.set(&threads, "88 threads".to_string());

  let entry = cache.get(&contacts).unwrap();
  println!("contacts = {:?} (stale: {})", entry.data(), entry.is_stale());

  println!("\n--- Step 2: Staleness sets in ---");
  thread::sleep(Duration::from_millis(700));
  let entry = cache.get(&contacts).unwrap();
  println!(
    "contacts = {:?} (stale: {}, expired: {})",
    entry.data(),
    entry.is_stale(),
    entry.is_expired()
  );
  assert!(entry.is_stale());

  println!("\n--- Step 3: Guarded write loses to a newer set ---");
  let ticket = cache.begin_write(&contacts);
  cache.set(&contacts, "513 contacts".to_string());
  let landed = cache.commit(ticket, "512 contacts (slow refetch)".to_string());
  println!("slow refetch committed: {}", landed);
  assert!(!landed);
  println!("contacts = {:?}", cache.get(&contacts).unwrap().data());

  println!("\n--- Step 4: Provider-wide invalidation ---");
  cache.invalidate_matching("google");
  println!("contacts resident: {}", cache.get(&contacts).is_some());
  println!("threads resident:  {}", cache.get(&threads).is_some());

  println!("\n--- Step 5: Per-entry overrides ---");
  cache.set_with(
    &contacts,
    "fresh import".to_string(),
    EntryOptions::new().stale_after(Duration::from_secs(30)),
  );
  println!(
    "contacts stale window = {:?}",
    cache.get(&contacts).unwrap().stale_after()
  );

  println!("\nNotifications delivered: {}", notifications.load(Ordering::SeqCst));
  println!("Stats: {:#?}", cache.stats());

  cache.destroy();
}
