//! Publication lock used by the `ExecutionAndPublication` mode.
//!
//! The lock is a single `AtomicU8` driven through `parking_lot_core`'s
//! address-keyed parking, so an uncontended cell never allocates a mutex and a
//! contended one sleeps on a futex instead of spinning.
//!
//! Layout of the state byte:
//! - Bit 0: DONE - An outcome has been published, the lock will never be taken again
//! - Bit 1: LOCKED - A thread is running the factory
//! - Bit 2: WAITING - At least one thread is parked on the lock
//! - Bits 3-7: EPOCH - Generation counter, bumped on every release
//!
//! Once DONE is set callers skip the lock entirely; the bit is the
//! "already published" fast path that the cell checks before contending.

use core::mem;
use core::sync::atomic::{self, AtomicU8, Ordering};

use parking_lot_core::{DEFAULT_PARK_TOKEN, DEFAULT_UNPARK_TOKEN};

/// Per-instance exclusive lock guarding factory execution.
#[repr(transparent)]
pub(crate) struct PublishLock(AtomicU8);

impl PublishLock {
   /// Bit flag: Outcome published.
   const DONE: u8 = 1;
   /// Bit flag: Factory running under the lock.
   const LOCKED: u8 = 2;
   /// Bit flag: At least one thread is parked.
   const WAITING: u8 = 4;
   /// Start of epoch bits.
   const EPOCH_1: u8 = 8;
   /// Mask for epoch bits.
   const EPOCH_MASK: u8 = !(Self::DONE | Self::LOCKED | Self::WAITING);

   #[inline(always)]
   const fn next_epoch(current_state: u8) -> u8 {
      (current_state & Self::EPOCH_MASK).wrapping_add(Self::EPOCH_1) & Self::EPOCH_MASK
   }

   /// Creates an unlocked, unpublished lock.
   #[inline]
   pub(crate) const fn new() -> Self {
      Self(AtomicU8::new(0))
   }

   /// Creates a lock that is already in the published state.
   #[inline]
   pub(crate) const fn published() -> Self {
      Self(AtomicU8::new(Self::DONE))
   }

   #[inline]
   fn notify_all(&self) {
      // SAFETY: The parking key is the address of the state byte, used identically in `wait`.
      unsafe {
         parking_lot_core::unpark_all(self.0.as_ptr() as usize, DEFAULT_UNPARK_TOKEN);
      }
   }

   /// Parks the calling thread until the state moves away from `expected_state`.
   #[inline]
   fn wait(&self, expected_state: u8) {
      log::trace!(
         target: "poly_lazy",
         "thread {:?} blocking on lazy value owned by another thread",
         std::thread::current().id()
      );
      // SAFETY: See `notify_all`.
      unsafe {
         // The validate closure runs under the bucket lock, so a release between our
         // load and the park cannot be missed.
         let _ = parking_lot_core::park(
            self.0.as_ptr() as usize,
            || self.0.load(atomic::Ordering::Acquire) == expected_state,
            || {},
            |_, _| {},
            DEFAULT_PARK_TOKEN,
            None,
         );
      }
   }

   /// Marks the outcome as published, bumps the epoch and wakes parked threads.
   /// Returns `true` if the lock was not already published.
   #[inline]
   pub(crate) fn set_done(&self) -> bool {
      let current_state = self.0.load(Ordering::Relaxed);
      let new_state = Self::DONE | Self::next_epoch(current_state);

      // Release pairs with the Acquire in `lock_step`/`wait` and orders the slot store before it.
      let prev_state = self.0.swap(new_state, Ordering::Release);
      if prev_state & Self::WAITING != 0 {
         self.notify_all();
      }
      prev_state & Self::DONE == 0
   }

   /// Releases the lock without publishing, letting a parked thread take over.
   #[inline]
   pub(crate) fn set_unlocked(&self) {
      let current_state = self.0.load(Ordering::Relaxed);
      let prev_state = self.0.swap(Self::next_epoch(current_state), Ordering::Release);
      if prev_state & Self::WAITING != 0 {
         self.notify_all();
      }
   }

   /// Single acquisition attempt.
   ///
   /// - `Ok(None)`: already published.
   /// - `Ok(Some(guard))`: lock acquired.
   /// - `Err(state)`: held by another thread; `state` has WAITING set.
   #[inline]
   fn lock_step(&self) -> Result<Option<PublishGuard<'_>>, u8> {
      loop {
         let current_state = self.0.load(Ordering::Acquire);
         if current_state & Self::DONE != 0 {
            return Ok(None);
         }

         if current_state & Self::LOCKED == 0 {
            match self.0.compare_exchange_weak(
               current_state,
               current_state | Self::LOCKED,
               Ordering::Acquire,
               Ordering::Relaxed,
            ) {
               Ok(_) => return Ok(Some(PublishGuard::new(self))),
               Err(_) => {
                  std::hint::spin_loop();
                  continue;
               }
            }
         }

         if current_state & Self::WAITING == 0 {
            let new_state = current_state | Self::WAITING;
            match self.0.compare_exchange_weak(
               current_state,
               new_state,
               Ordering::Relaxed,
               Ordering::Relaxed,
            ) {
               Ok(_) => return Err(new_state),
               Err(_) => {
                  std::hint::spin_loop();
                  continue;
               }
            }
         }
         return Err(current_state);
      }
   }

   /// Acquires the lock, blocking while another thread holds it.
   ///
   /// Returns `None` once the outcome has been published.
   #[inline]
   pub(crate) fn lock(&self) -> Option<PublishGuard<'_>> {
      match self.lock_step() {
         Ok(guard_opt) => guard_opt,
         Err(mut observed) => loop {
            self.wait(observed);
            match self.lock_step() {
               Ok(guard_opt) => return guard_opt,
               Err(new_state) => observed = new_state,
            }
         },
      }
   }

   /// Acquires the lock from an async context.
   ///
   /// Yields to the scheduler first, then falls back to `block_in_place`.
   #[cfg(any(feature = "async-tokio", feature = "async-tokio-mt"))]
   #[inline]
   pub(crate) async fn lock_async(&self) -> Option<PublishGuard<'_>> {
      #[allow(clippy::never_loop)]
      loop {
         for _ in 0..16 {
            match self.lock_step() {
               Ok(guard_opt) => return guard_opt,
               Err(state) => {
                  for _ in 0..32 {
                     tokio::task::yield_now().await;
                     if self.0.load(Ordering::Relaxed) != state {
                        break;
                     }
                  }
               }
            }
         }

         #[cfg(feature = "async-tokio-mt")]
         {
            return match self.lock_step() {
               Ok(x) => x,
               Err(state) => tokio::task::block_in_place(|| {
                  self.wait(state);
                  self.lock()
               }),
            };
         }
      }
   }
}

/// RAII guard over the factory-running state.
///
/// `commit` publishes; dropping without committing releases the lock so a
/// parked thread can retry.
pub(crate) struct PublishGuard<'a> {
   state: &'a PublishLock,
}

impl<'a> PublishGuard<'a> {
   #[inline(always)]
   const fn new(state: &'a PublishLock) -> Self {
      Self { state }
   }

   /// Marks the outcome published and wakes waiters.
   #[inline(always)]
   pub(crate) fn commit(self) -> bool {
      let success = self.state.set_done();
      mem::forget(self);
      success
   }
}

impl Drop for PublishGuard<'_> {
   #[inline(always)]
   fn drop(&mut self) {
      self.state.set_unlocked();
   }
}
