//! Error types returned by [`LazyValue`](crate::LazyValue).

use std::any::Any;
use std::backtrace::Backtrace;
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

/// Boxed error type accepted from fallible factories.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Every failure a lazy cell can surface from construction or `value()`.
///
/// The type is cheap to clone: a captured factory failure is shared, so every
/// clone refers to the same [`CapturedFailure`] record.
#[derive(Debug, Clone, Error)]
pub enum LazyError {
   /// A required argument, usually the factory, was not supplied.
   #[error("argument `{0}` must not be null")]
   NullArgument(&'static str),

   /// A value outside the accepted domain, such as an unknown mode.
   #[error("invalid argument: {0}")]
   InvalidArgument(String),

   /// Default construction was requested for a type that has no default constructor.
   #[error("type `{0}` has no default constructor and no factory was supplied")]
   MissingCapability(&'static str),

   /// The cell was used in a way its mode forbids.
   #[error("invalid lazy state: {0}")]
   InvalidState(Misuse),

   /// A `PublicationOnly` factory read its own cell before any value was published.
   #[error("value is not yet available: the factory is still running on this thread")]
   Pending,

   /// The factory failed. Under the faulting modes this is the same record on every access.
   #[error(transparent)]
   Captured(CapturedFailure),
}

impl LazyError {
   /// Returns the captured factory failure, if that is what this error is.
   pub fn captured(&self) -> Option<&CapturedFailure> {
      match self {
         Self::Captured(failure) => Some(failure),
         _ => None,
      }
   }
}

impl From<CapturedFailure> for LazyError {
   fn from(failure: CapturedFailure) -> Self {
      Self::Captured(failure)
   }
}

/// The ways a caller can misuse a cell at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Misuse {
   /// The factory read the cell it is initializing.
   SelfReferential,
   /// A `None`-mode cell was forced from two threads at once.
   ConcurrentUnsynchronized,
}

impl fmt::Display for Misuse {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      match self {
         Self::SelfReferential => f.write_str("factory attempted self-referential access"),
         Self::ConcurrentUnsynchronized => {
            f.write_str("concurrent initialization of a cell created without thread safety")
         }
      }
   }
}

/// How the factory failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
   /// The factory returned an error.
   Error,
   /// The factory panicked.
   Panic,
}

struct FailureRecord {
   kind: FailureKind,
   message: String,
   type_name: &'static str,
   thread: Option<String>,
   source: Option<BoxError>,
   backtrace: Backtrace,
}

/// A factory failure preserved for replay.
///
/// Cloning shares the record, so a faulted cell hands the very same failure to
/// every caller; use [`same_as`](Self::same_as) to check identity. The
/// backtrace is taken where the factory failed, not where it is re-raised.
#[derive(Clone)]
pub struct CapturedFailure(Arc<FailureRecord>);

impl CapturedFailure {
   /// Captures an error returned by a factory.
   pub(crate) fn from_error<E>(error: E) -> Self
   where
      E: Into<BoxError>,
   {
      let type_name = std::any::type_name::<E>();
      let source: BoxError = error.into();
      Self::record(FailureKind::Error, source.to_string(), type_name, Some(source))
   }

   /// Captures the payload of a factory panic.
   pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
      let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
         (*s).to_owned()
      } else if let Some(s) = payload.downcast_ref::<String>() {
         s.clone()
      } else {
         "Box<dyn Any>".to_owned()
      };
      Self::record(FailureKind::Panic, message, "panic", None)
   }

   fn record(
      kind: FailureKind,
      message: String,
      type_name: &'static str,
      source: Option<BoxError>,
   ) -> Self {
      Self(Arc::new(FailureRecord {
         kind,
         message,
         type_name,
         thread: std::thread::current().name().map(str::to_owned),
         source,
         backtrace: Backtrace::capture(),
      }))
   }

   /// Whether the factory returned an error or panicked.
   pub fn kind(&self) -> FailureKind {
      self.0.kind
   }

   /// The failure message as rendered when it was captured.
   pub fn message(&self) -> &str {
      &self.0.message
   }

   /// Name of the error type the factory returned, or `"panic"`.
   pub fn type_name(&self) -> &'static str {
      self.0.type_name
   }

   /// Name of the thread the factory failed on, if it had one.
   pub fn thread_name(&self) -> Option<&str> {
      self.0.thread.as_deref()
   }

   /// Backtrace taken at the point of failure.
   pub fn backtrace(&self) -> &Backtrace {
      &self.0.backtrace
   }

   /// Returns the original error, downcast to `E`.
   pub fn downcast_ref<E: StdError + 'static>(&self) -> Option<&E> {
      self.0.source.as_ref()?.downcast_ref::<E>()
   }

   /// Returns `true` if both handles refer to the same captured failure.
   pub fn same_as(&self, other: &Self) -> bool {
      Arc::ptr_eq(&self.0, &other.0)
   }
}

impl fmt::Debug for CapturedFailure {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      f.debug_struct("CapturedFailure")
         .field("kind", &self.0.kind)
         .field("type_name", &self.0.type_name)
         .field("message", &self.0.message)
         .field("thread", &self.0.thread)
         .finish_non_exhaustive()
   }
}

impl fmt::Display for CapturedFailure {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      match self.0.kind {
         FailureKind::Error => write!(f, "lazy factory failed: {}", self.0.message),
         FailureKind::Panic => write!(f, "lazy factory panicked: {}", self.0.message),
      }
   }
}

impl StdError for CapturedFailure {
   fn source(&self) -> Option<&(dyn StdError + 'static)> {
      self.0
         .source
         .as_deref()
         .map(|e| e as &(dyn StdError + 'static))
   }
}
