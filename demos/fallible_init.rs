use std::sync::atomic::{AtomicBool, Ordering};

use poly_lazy::{LazyMode, LazyValue};

static FAIL: AtomicBool = AtomicBool::new(true);

fn load() -> Result<String, &'static str> {
   let fail = FAIL.load(Ordering::Relaxed);
   println!("Attempting initialization (fail={})...", fail);
   if fail {
      Err("Initialization failed!")
   } else {
      Ok("Successfully initialized".to_string())
   }
}

fn main() {
   // A thread-safe cell remembers the first failure for good.
   let strict = LazyValue::try_new(load, LazyMode::ExecutionAndPublication);
   let first = strict.value().unwrap_err();
   println!("Caught error: {}", first);
   FAIL.store(false, Ordering::Relaxed);
   let again = strict.value().unwrap_err();
   assert!(first.captured().unwrap().same_as(again.captured().unwrap()));
   println!("Replayed error: {}", again);

   // A publication-only cell retries until a factory succeeds.
   FAIL.store(true, Ordering::Relaxed);
   let retrying = LazyValue::try_new(load, LazyMode::PublicationOnly);
   match retrying.value() {
      Ok(_) => panic!("Should have failed"),
      Err(e) => println!("Caught error: {}", e),
   }
   assert!(!retrying.is_value_created());

   FAIL.store(false, Ordering::Relaxed);
   match retrying.value() {
      Ok(data) => println!("Got data: {}", data),
      Err(_) => panic!("Should have succeeded"),
   }
   assert_eq!(
      retrying.get(),
      Some(&"Successfully initialized".to_string())
   );
}
