use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Mutex};
use std::thread;
use std::time::Duration;

use poly_lazy::{LazyError, LazyMode, LazyValue, Misuse};

const THREADS: usize = 10;

/// Starts `THREADS` threads behind a barrier, each calling `value()` once.
fn race<T, R>(lazy: &Arc<LazyValue<T>>, f: fn(Result<&T, LazyError>) -> R) -> Vec<R>
where
   T: Send + Sync + 'static,
   R: Send + 'static,
{
   let barrier = Arc::new(Barrier::new(THREADS));
   let threads: Vec<_> = (0..THREADS)
      .map(|_| {
         let lazy = Arc::clone(lazy);
         let barrier = Arc::clone(&barrier);
         thread::spawn(move || {
            barrier.wait();
            f(lazy.value())
         })
      })
      .collect();
   threads.into_iter().map(|h| h.join().unwrap()).collect()
}

#[test]
fn test_execution_and_publication_runs_factory_once() {
   let counter = Arc::new(AtomicUsize::new(0));
   let calls = Arc::clone(&counter);
   let lazy = Arc::new(LazyValue::new(
      move || {
         calls.fetch_add(1, Ordering::SeqCst);
         // Keep the lock held long enough for every racer to park on it.
         thread::sleep(Duration::from_millis(20));
         String::from("shared")
      },
      LazyMode::ExecutionAndPublication,
   ));

   let seen = race(&lazy, |r| r.map(|v| v as *const String as usize).unwrap());
   assert!(seen.windows(2).all(|w| w[0] == w[1]));
   assert_eq!(counter.load(Ordering::SeqCst), 1);
   assert_eq!(lazy.get().map(String::as_str), Some("shared"));
}

#[test]
fn test_execution_and_publication_shares_failure() {
   let counter = Arc::new(AtomicUsize::new(0));
   let calls = Arc::clone(&counter);
   let lazy: Arc<LazyValue<i32>> = Arc::new(LazyValue::try_new(
      move || {
         calls.fetch_add(1, Ordering::SeqCst);
         thread::sleep(Duration::from_millis(10));
         Err("unreachable backend")
      },
      LazyMode::ExecutionAndPublication,
   ));

   let failures = race(&lazy, |r| r.unwrap_err().captured().cloned().unwrap());
   let first = &failures[0];
   assert!(failures.iter().all(|f| f.same_as(first)));
   assert_eq!(first.message(), "unreachable backend");
   assert_eq!(counter.load(Ordering::SeqCst), 1);
}

#[test]
fn test_publication_only_publishes_single_value() {
   let counter = Arc::new(AtomicUsize::new(0));
   let produced = Arc::new(Mutex::new(Vec::new()));
   let calls = Arc::clone(&counter);
   let log = Arc::clone(&produced);
   let lazy = Arc::new(LazyValue::new(
      move || {
         let n = calls.fetch_add(1, Ordering::SeqCst);
         log.lock().unwrap().push(n);
         thread::sleep(Duration::from_millis(5));
         n
      },
      LazyMode::PublicationOnly,
   ));

   let seen = race(&lazy, |r| *r.unwrap());
   let published = *lazy.get().expect("value published");
   assert!(seen.iter().all(|&v| v == published));

   let runs = counter.load(Ordering::SeqCst);
   assert!((1..=THREADS).contains(&runs));
   assert!(produced.lock().unwrap().contains(&published));
}

#[test]
fn test_publication_only_failures_not_shared() {
   let counter = Arc::new(AtomicUsize::new(0));
   let calls = Arc::clone(&counter);
   let lazy: Arc<LazyValue<i32>> = Arc::new(LazyValue::try_new(
      move || {
         calls.fetch_add(1, Ordering::SeqCst);
         Err("down")
      },
      LazyMode::PublicationOnly,
   ));

   let results = race(&lazy, |r| r.is_err());
   assert!(results.into_iter().all(|failed| failed));
   // Every caller ran the factory itself, nothing was cached.
   assert_eq!(counter.load(Ordering::SeqCst), THREADS);
   assert!(lazy.failure().is_none());
}

#[test]
fn test_value_visible_across_threads() {
   let lazy = Arc::new(LazyValue::new(
      || (0..1000).collect::<Vec<u32>>(),
      LazyMode::ExecutionAndPublication,
   ));
   let sums = race(&lazy, |r| r.unwrap().iter().sum::<u32>());
   assert!(sums.iter().all(|&s| s == 499_500));
}

#[test]
fn test_none_mode_refuses_concurrent_initialization() {
   let started = Arc::new(Barrier::new(2));
   let release = Arc::new(Barrier::new(2));
   let (s, r) = (Arc::clone(&started), Arc::clone(&release));
   let lazy = Arc::new(LazyValue::new(
      move || {
         s.wait();
         r.wait();
         1
      },
      LazyMode::None,
   ));

   let owner = {
      let lazy = Arc::clone(&lazy);
      thread::spawn(move || lazy.value().map(|v| *v))
   };
   started.wait();
   let refused = lazy.value().map(|v| *v);
   release.wait();

   assert!(matches!(
      refused,
      Err(LazyError::InvalidState(Misuse::ConcurrentUnsynchronized))
   ));
   assert_eq!(owner.join().unwrap().ok(), Some(1));
   assert_eq!(lazy.value().ok(), Some(&1));
}

#[test]
fn test_blocked_waiter_wakes_after_panic() {
   let lazy: Arc<LazyValue<i32>> = Arc::new(LazyValue::new(
      || -> i32 {
         thread::sleep(Duration::from_millis(20));
         panic!("factory crashed")
      },
      LazyMode::ExecutionAndPublication,
   ));
   let messages = race(&lazy, |r| {
      r.unwrap_err().captured().map(|f| f.message().to_owned())
   });
   assert!(messages
      .iter()
      .all(|m| m.as_deref() == Some("factory crashed")));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_value_async_shares_single_run() {
   let counter = Arc::new(AtomicUsize::new(0));
   let calls = Arc::clone(&counter);
   let lazy = Arc::new(LazyValue::new(
      move || {
         calls.fetch_add(1, Ordering::SeqCst);
         thread::sleep(Duration::from_millis(20));
         42
      },
      LazyMode::ExecutionAndPublication,
   ));

   let tasks: Vec<_> = (0..8)
      .map(|_| {
         let lazy = Arc::clone(&lazy);
         tokio::spawn(async move { lazy.value_async().await.map(|v| *v).ok() })
      })
      .collect();
   for task in tasks {
      assert_eq!(task.await.unwrap(), Some(42));
   }
   assert_eq!(counter.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_value_async_other_modes() {
   let lazy = LazyValue::new(|| "fast", LazyMode::PublicationOnly);
   assert_eq!(lazy.value_async().await.ok(), Some(&"fast"));

   let faulted: LazyValue<u8> = LazyValue::try_new(|| Err("no"), LazyMode::None);
   let err = faulted.value_async().await.unwrap_err();
   assert_eq!(err.captured().map(|f| f.message()), Some("no"));
}
