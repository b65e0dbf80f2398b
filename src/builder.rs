//! Step-by-step construction of a [`LazyValue`].
//!
//! The builder collects a mode (typed, raw, or by name) and a factory, and
//! reports every configuration problem once, from [`LazyBuilder::build`].

use core::fmt;
use std::any::type_name;

use crate::error::{BoxError, CapturedFailure, LazyError};
use crate::lazy::{fallible, Factory, LazyValue};
use crate::mode::LazyMode;

/// Builder for [`LazyValue`].
///
/// ```rust
/// use poly_lazy::{LazyBuilder, LazyError};
///
/// let lazy = LazyBuilder::new()
///    .mode_name("publication-only")
///    .factory(|| String::from("ready"))
///    .build()?;
/// assert_eq!(lazy.value()?, "ready");
/// # Ok::<(), LazyError>(())
/// ```
pub struct LazyBuilder<T> {
   mode: Result<LazyMode, LazyError>,
   factory: Option<Factory<T>>,
}

impl<T> LazyBuilder<T> {
   /// Starts a builder with the default mode, `ExecutionAndPublication`, and no factory.
   #[must_use]
   pub fn new() -> Self {
      Self {
         mode: Ok(LazyMode::default()),
         factory: None,
      }
   }

   /// Sets the thread-safety mode.
   #[must_use]
   pub fn mode(mut self, mode: LazyMode) -> Self {
      self.mode = Ok(mode);
      self
   }

   /// Sets the mode from its numeric value; anything outside `0..=2` fails the build.
   #[must_use]
   pub fn raw_mode(mut self, raw: i32) -> Self {
      self.mode = LazyMode::try_from(raw);
      self
   }

   /// Sets the mode from its name, e.g. from a configuration file.
   #[must_use]
   pub fn mode_name(mut self, name: &str) -> Self {
      self.mode = name.parse();
      self
   }

   /// `true` selects `ExecutionAndPublication`, `false` selects `None`.
   #[must_use]
   pub fn thread_safe(self, is_thread_safe: bool) -> Self {
      self.mode(LazyMode::from(is_thread_safe))
   }

   /// Uses `factory` to produce the value.
   #[must_use]
   pub fn factory<F>(mut self, factory: F) -> Self
   where
      F: Fn() -> T + Send + Sync + 'static,
      T: 'static,
   {
      self.factory = Some(Box::new(move || Ok::<_, CapturedFailure>(factory())));
      self
   }

   /// Uses a fallible `factory` to produce the value.
   #[must_use]
   pub fn try_factory<F, E>(mut self, factory: F) -> Self
   where
      F: Fn() -> Result<T, E> + Send + Sync + 'static,
      E: Into<BoxError> + 'static,
      T: 'static,
   {
      self.factory = Some(Box::new(fallible(factory)));
      self
   }

   /// Produces the value with `T::default()`.
   #[must_use]
   pub fn default_construct(self) -> Self
   where
      T: Default + 'static,
   {
      self.factory(T::default)
   }

   /// Builds the cell.
   ///
   /// Fails with [`LazyError::InvalidArgument`] for an unknown mode and with
   /// [`LazyError::MissingCapability`] when neither a factory nor default
   /// construction was configured.
   pub fn build(self) -> Result<LazyValue<T>, LazyError> {
      let mode = self.mode?;
      let factory = self
         .factory
         .ok_or(LazyError::MissingCapability(type_name::<T>()))?;
      Ok(LazyValue::from_factory(factory, mode))
   }
}

impl<T> Default for LazyBuilder<T> {
   fn default() -> Self {
      Self::new()
   }
}

impl<T> fmt::Debug for LazyBuilder<T> {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      f.debug_struct("LazyBuilder")
         .field("mode", &self.mode)
         .field("has_factory", &self.factory.is_some())
         .finish()
   }
}
