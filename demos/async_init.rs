use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use poly_lazy::{LazyMode, LazyValue};

static COUNTER: AtomicUsize = AtomicUsize::new(0);

#[tokio::main]
async fn main() {
   let data = Arc::new(LazyValue::new(
      || {
         // Runs once, on whichever worker gets the lock first
         COUNTER.fetch_add(1, Ordering::Relaxed);
         println!("Initializing shared data...");
         std::thread::sleep(std::time::Duration::from_millis(50));
         "Async expensive data".to_string()
      },
      LazyMode::ExecutionAndPublication,
   ));

   let tasks: Vec<_> = (0..5)
      .map(|_| {
         let data = Arc::clone(&data);
         tokio::spawn(async move {
            println!("Task access: {}", data.value_async().await.unwrap());
         })
      })
      .collect();

   for t in tasks {
      t.await.unwrap();
   }

   assert_eq!(data.get(), Some(&"Async expensive data".to_string()));
   assert_eq!(COUNTER.load(Ordering::Relaxed), 1); // Initializer ran only once
   println!("Final async data: {data}");
}
