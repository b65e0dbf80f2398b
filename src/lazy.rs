//! Lazily computed value with a selectable thread-safety mode.
//!
//! This module provides [`LazyValue<T>`], a cell that owns a factory and runs it
//! on first access. How concurrent first accesses are coordinated depends on the
//! [`LazyMode`] chosen at construction:
//!
//! - `None`: no lock, the factory runs on the calling thread.
//! - `ExecutionAndPublication`: a parking lock ensures the factory runs once.
//! - `PublicationOnly`: no lock, racing factories compete in a compare-and-swap.
//!
//! The outcome of the factory (a value, or a captured failure) is boxed and
//! published through a single `AtomicPtr`. The pointer goes from null to
//! non-null exactly once and the box is never mutated afterwards, so reading a
//! published outcome is a single acquire load.

use core::marker::PhantomData;
use core::sync::atomic::{AtomicPtr, AtomicU8, Ordering};
use core::{fmt, ptr};
use std::any::type_name;
use std::panic::{self, AssertUnwindSafe};

use crate::error::{BoxError, CapturedFailure, LazyError, Misuse};
use crate::mode::LazyMode;
use crate::reentry;
use crate::state::{PublishGuard, PublishLock};

/// Type-erased factory. Failures are captured at the call site so the error's
/// type name and backtrace describe the factory, not the cell.
pub(crate) type Factory<T> = Box<dyn Fn() -> Result<T, CapturedFailure> + Send + Sync>;

/// Published result of a factory run.
enum Outcome<T> {
   Value(T),
   Failed(CapturedFailure),
}

impl<T> Outcome<T> {
   #[inline]
   fn as_result(&self) -> Result<&T, LazyError> {
      match self {
         Self::Value(value) => Ok(value),
         Self::Failed(failure) => Err(LazyError::Captured(failure.clone())),
      }
   }
}

/// Factory not yet started.
const PENDING: u8 = 0;
/// Factory running (`None` and `ExecutionAndPublication` only).
const RUNNING: u8 = 1;
/// Outcome published.
const SETTLED: u8 = 2;

/// A value computed on first access by an owned factory.
///
/// ```rust
/// use poly_lazy::{LazyMode, LazyValue};
///
/// let answer = LazyValue::new(|| 6 * 7, LazyMode::ExecutionAndPublication);
/// assert!(!answer.is_value_created());
/// assert_eq!(answer.value().ok(), Some(&42));
/// assert!(answer.is_value_created());
/// ```
///
/// Under `None` and `ExecutionAndPublication` a failing factory faults the cell:
/// every later access returns the same [`CapturedFailure`]. Under
/// `PublicationOnly` failures are returned but not kept, so the next access
/// tries again.
pub struct LazyValue<T> {
   slot: AtomicPtr<Outcome<T>>,
   phase: AtomicU8,
   lock: PublishLock,
   factory: Option<Factory<T>>,
   mode: LazyMode,
   _marker: PhantomData<T>,
}

impl<T> LazyValue<T> {
   /// Creates a cell that computes its value with `factory`.
   #[inline]
   #[must_use]
   pub fn new<F>(factory: F, mode: LazyMode) -> Self
   where
      F: Fn() -> T + Send + Sync + 'static,
      T: 'static,
   {
      Self::from_factory(Box::new(move || Ok::<_, CapturedFailure>(factory())), mode)
   }

   /// Creates a cell whose factory may fail.
   ///
   /// An `Err` from `factory` is captured as a [`CapturedFailure`] that keeps the
   /// original error reachable through `downcast_ref` and `Error::source`.
   #[must_use]
   pub fn try_new<F, E>(factory: F, mode: LazyMode) -> Self
   where
      F: Fn() -> Result<T, E> + Send + Sync + 'static,
      E: Into<BoxError> + 'static,
      T: 'static,
   {
      Self::from_factory(Box::new(fallible(factory)), mode)
   }

   /// Creates a cell from an optional factory.
   ///
   /// Fails with [`LazyError::NullArgument`] if `factory` is `None`.
   pub fn with_factory<F>(factory: Option<F>, mode: LazyMode) -> Result<Self, LazyError>
   where
      F: Fn() -> T + Send + Sync + 'static,
      T: 'static,
   {
      let factory = factory.ok_or(LazyError::NullArgument("factory"))?;
      Ok(Self::new(factory, mode))
   }

   /// Creates a cell that is either fully thread-safe or not synchronized at all.
   ///
   /// `true` selects [`LazyMode::ExecutionAndPublication`], `false` selects [`LazyMode::None`].
   #[inline]
   #[must_use]
   pub fn thread_safe<F>(factory: F, is_thread_safe: bool) -> Self
   where
      F: Fn() -> T + Send + Sync + 'static,
      T: 'static,
   {
      Self::new(factory, LazyMode::from(is_thread_safe))
   }

   /// Creates a cell that default-constructs its value on first access.
   #[inline]
   #[must_use]
   pub fn new_default(mode: LazyMode) -> Self
   where
      T: Default + 'static,
   {
      Self::new(T::default, mode)
   }

   /// Creates a cell that already holds `value`. No factory is ever run.
   #[must_use]
   pub fn with_value(value: T) -> Self {
      Self {
         slot: AtomicPtr::new(Box::into_raw(Box::new(Outcome::Value(value)))),
         phase: AtomicU8::new(SETTLED),
         lock: PublishLock::published(),
         factory: None,
         mode: LazyMode::default(),
         _marker: PhantomData,
      }
   }

   pub(crate) fn from_factory(factory: Factory<T>, mode: LazyMode) -> Self {
      Self {
         slot: AtomicPtr::new(ptr::null_mut()),
         phase: AtomicU8::new(PENDING),
         lock: PublishLock::new(),
         factory: Some(factory),
         mode,
         _marker: PhantomData,
      }
   }

   /// The thread-safety mode chosen at construction.
   #[inline]
   pub fn mode(&self) -> LazyMode {
      self.mode
   }

   /// Checks if a value has been created.
   ///
   /// Returns `false` for a faulted cell. Never blocks and never runs the factory.
   #[inline]
   pub fn is_value_created(&self) -> bool {
      matches!(self.outcome(), Some(Outcome::Value(_)))
   }

   /// Returns the value if it has been created, without running the factory.
   #[inline]
   pub fn get(&self) -> Option<&T> {
      match self.outcome()? {
         Outcome::Value(value) => Some(value),
         Outcome::Failed(_) => None,
      }
   }

   /// Returns the captured failure if the cell is faulted.
   #[inline]
   pub fn failure(&self) -> Option<&CapturedFailure> {
      match self.outcome()? {
         Outcome::Value(_) => None,
         Outcome::Failed(failure) => Some(failure),
      }
   }

   /// Returns the value, running the factory on first access.
   ///
   /// - Created: returns the cached value.
   /// - Faulted: returns the originally captured failure.
   /// - Otherwise: initializes according to the cell's [`LazyMode`].
   ///
   /// A factory that reads its own cell gets [`LazyError::InvalidState`] under
   /// `None` and `ExecutionAndPublication`, and [`LazyError::Pending`] under
   /// `PublicationOnly`.
   #[inline]
   pub fn value(&self) -> Result<&T, LazyError> {
      match self.outcome() {
         Some(outcome) => outcome.as_result(),
         None => self.initialize(),
      }
   }

   /// Returns the value, initializing it from an async context if needed.
   ///
   /// Behaves like [`value`](Self::value); the factory itself stays synchronous.
   /// Under `ExecutionAndPublication` a task waiting for another thread's
   /// factory yields to the scheduler before it blocks.
   #[cfg(any(feature = "async-tokio", feature = "async-tokio-mt"))]
   pub async fn value_async(&self) -> Result<&T, LazyError> {
      if let Some(outcome) = self.outcome() {
         return outcome.as_result();
      }
      match self.mode {
         LazyMode::ExecutionAndPublication => {
            self.check_reentry()?;
            let guard = self.lock.lock_async().await;
            self.initialize_locked(guard)
         }
         LazyMode::None | LazyMode::PublicationOnly => self.initialize(),
      }
   }

   /// Forces the value and takes it out of the cell.
   pub fn into_value(mut self) -> Result<T, LazyError> {
      self.value()?;
      let raw = mem_take_slot(&mut self.slot);
      // SAFETY: `value` succeeded, so the slot holds a box we own exclusively.
      match *unsafe { Box::from_raw(raw) } {
         Outcome::Value(value) => Ok(value),
         Outcome::Failed(failure) => Err(LazyError::Captured(failure)),
      }
   }

   // --- Internal Initialization Helpers ---

   #[inline]
   fn id(&self) -> usize {
      self as *const Self as usize
   }

   #[inline]
   fn outcome(&self) -> Option<&Outcome<T>> {
      let raw = self.slot.load(Ordering::Acquire);
      // SAFETY: A non-null slot was produced by `Box::into_raw`, is never replaced,
      // and is only freed by `Drop` or `into_value`, both of which own `self`.
      unsafe { raw.as_ref() }
   }

   /// Returns the published outcome without checking that there is one.
   ///
   /// # Safety
   ///
   /// The caller must have observed publication, e.g. through the lock's DONE bit.
   #[inline]
   unsafe fn outcome_unchecked(&self) -> &Outcome<T> {
      let raw = self.slot.load(Ordering::Acquire);
      debug_assert!(!raw.is_null(), "outcome_unchecked called on unpublished LazyValue");
      // SAFETY: The caller guarantees publication; see `outcome`.
      unsafe { &*raw }
   }

   #[inline]
   fn check_reentry(&self) -> Result<(), LazyError> {
      if reentry::is_active(self.id()) {
         return Err(LazyError::InvalidState(Misuse::SelfReferential));
      }
      Ok(())
   }

   /// Cold path for `value`. Dispatches on the mode.
   #[cold]
   fn initialize(&self) -> Result<&T, LazyError> {
      match self.mode {
         LazyMode::None => self.initialize_unsynchronized(),
         LazyMode::PublicationOnly => self.initialize_racing(),
         LazyMode::ExecutionAndPublication => {
            self.check_reentry()?;
            let guard = self.lock.lock();
            self.initialize_locked(guard)
         }
      }
   }

   /// `None` mode. The phase CAS stands in for the lock the mode does without.
   fn initialize_unsynchronized(&self) -> Result<&T, LazyError> {
      self.check_reentry()?;
      if self
         .phase
         .compare_exchange(PENDING, RUNNING, Ordering::Acquire, Ordering::Acquire)
         .is_err()
      {
         if let Some(outcome) = self.outcome() {
            return outcome.as_result();
         }
         log::warn!(
            target: "poly_lazy",
            "LazyValue<{}> created without thread safety was forced concurrently",
            type_name::<T>()
         );
         return Err(LazyError::InvalidState(Misuse::ConcurrentUnsynchronized));
      }

      match self.run_factory() {
         Ok(value) => self.publish(Outcome::Value(value)).as_result(),
         Err(LazyError::Captured(failure)) => self.publish(Outcome::Failed(failure)).as_result(),
         Err(e) => {
            self.phase.store(PENDING, Ordering::Release);
            Err(e)
         }
      }
   }

   /// `ExecutionAndPublication` mode, after the lock attempt.
   fn initialize_locked(&self, guard: Option<PublishGuard<'_>>) -> Result<&T, LazyError> {
      let Some(guard) = guard else {
         // SAFETY: The lock only reports DONE after the outcome was stored.
         return unsafe { self.outcome_unchecked() }.as_result();
      };

      self.phase.store(RUNNING, Ordering::Relaxed);
      let published = match self.run_factory() {
         Ok(value) => self.publish(Outcome::Value(value)),
         Err(LazyError::Captured(failure)) => self.publish(Outcome::Failed(failure)),
         Err(e) => {
            self.phase.store(PENDING, Ordering::Relaxed);
            return Err(e); // Guard dropped, lock released for the next caller.
         }
      };
      guard.commit();
      published.as_result()
   }

   /// `PublicationOnly` mode. No lock; the first successful CAS wins.
   fn initialize_racing(&self) -> Result<&T, LazyError> {
      if reentry::is_active(self.id()) {
         return Err(LazyError::Pending);
      }
      // Failures return here without touching the slot, so a later call retries.
      let value = self.run_factory()?;

      let raw = Box::into_raw(Box::new(Outcome::Value(value)));
      match self
         .slot
         .compare_exchange(ptr::null_mut(), raw, Ordering::AcqRel, Ordering::Acquire)
      {
         Ok(_) => {
            self.phase.store(SETTLED, Ordering::Release);
            // SAFETY: `raw` is now owned by the slot and lives as long as `self`.
            unsafe { &*raw }.as_result()
         }
         Err(winner) => {
            log::trace!(
               target: "poly_lazy",
               "LazyValue<{}> lost publication race, discarding redundant value",
               type_name::<T>()
            );
            // SAFETY: The CAS failed, so `raw` was never shared.
            drop(unsafe { Box::from_raw(raw) });
            // SAFETY: `winner` is a published, non-null slot; see `outcome`.
            unsafe { &*winner }.as_result()
         }
      }
   }

   /// Stores the outcome. Caller must be the only writer (lock or phase CAS held).
   fn publish(&self, outcome: Outcome<T>) -> &Outcome<T> {
      let raw = Box::into_raw(Box::new(outcome));
      self.slot.store(raw, Ordering::Release);
      self.phase.store(SETTLED, Ordering::Release);
      // SAFETY: Just published; the box lives as long as `self`.
      unsafe { &*raw }
   }

   /// Runs the factory on this thread, capturing errors and panics.
   fn run_factory(&self) -> Result<T, LazyError> {
      let Some(factory) = self.factory.as_ref() else {
         return Err(LazyError::NullArgument("factory"));
      };
      let _scope = reentry::enter(self.id());
      log::trace!(
         target: "poly_lazy",
         "running {} factory for LazyValue<{}>",
         self.mode,
         type_name::<T>()
      );

      let result = panic::catch_unwind(AssertUnwindSafe(|| factory()))
         .unwrap_or_else(|payload| Err(CapturedFailure::from_panic(payload)));
      result.map_err(|failure| {
         log::debug!(
            target: "poly_lazy",
            "LazyValue<{}> factory failed ({} mode): {}",
            type_name::<T>(),
            self.mode,
            failure
         );
         LazyError::Captured(failure)
      })
   }
}

/// Adapts a fallible factory to the erased [`Factory`] signature.
pub(crate) fn fallible<T, E, F>(
   factory: F,
) -> impl Fn() -> Result<T, CapturedFailure> + Send + Sync
where
   F: Fn() -> Result<T, E> + Send + Sync,
   E: Into<BoxError> + 'static,
{
   move || factory().map_err(CapturedFailure::from_error)
}

#[inline]
fn mem_take_slot<T>(slot: &mut AtomicPtr<T>) -> *mut T {
   core::mem::replace(slot.get_mut(), ptr::null_mut())
}

// --- Trait Implementations ---

// SAFETY:
// Sharing `&LazyValue<T>` hands out `&T` to many threads (`T: Sync`) and lets any
// of them create the value that the owner later drops (`T: Send`). The factory
// is `Send + Sync` by construction.
unsafe impl<T: Send + Sync> Sync for LazyValue<T> {}
// SAFETY: Moving the cell moves the boxed outcome and the `Send` factory with it.
unsafe impl<T: Send> Send for LazyValue<T> {}

impl<T: Default + 'static> Default for LazyValue<T> {
   /// Creates a thread-safe cell that default-constructs its value on first access.
   #[inline]
   fn default() -> Self {
      Self::new_default(LazyMode::ExecutionAndPublication)
   }
}

impl<T> From<T> for LazyValue<T> {
   /// Creates a cell that already holds `value`.
   #[inline]
   fn from(value: T) -> Self {
      Self::with_value(value)
   }
}

impl<T: fmt::Display> fmt::Display for LazyValue<T> {
   /// Shows the value if created. Never runs the factory.
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      match self.get() {
         Some(v) => fmt::Display::fmt(v, f),
         None => f.write_str("Value is not created."),
      }
   }
}

impl<T: fmt::Debug> fmt::Debug for LazyValue<T> {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      let mut d = f.debug_struct("LazyValue");
      d.field("mode", &self.mode);
      match self.outcome() {
         Some(Outcome::Value(v)) => d.field("value", v),
         Some(Outcome::Failed(failure)) => d.field("failure", failure),
         None if self.phase.load(Ordering::Relaxed) == RUNNING => {
            d.field("value", &format_args!("<running>"))
         }
         None => d.field("value", &format_args!("<not created>")),
      };
      d.finish()
   }
}

impl<T> Drop for LazyValue<T> {
   #[inline]
   fn drop(&mut self) {
      let raw = mem_take_slot(&mut self.slot);
      if !raw.is_null() {
         // SAFETY: We have exclusive access and the slot owns this box.
         drop(unsafe { Box::from_raw(raw) });
      }
   }
}
