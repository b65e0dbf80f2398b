//! A lazily initialized cell with selectable thread-safety modes.
//!
//! [`LazyValue<T>`] owns a factory and runs it on first access, caching the
//! result. Three [`LazyMode`]s decide what happens when several threads ask for
//! the value at once:
//!
//! | Mode | Factory runs | Factory failure | Self-referential read |
//! |---|---|---|---|
//! | `None` | once, caller-serialized | cached | [`LazyError::InvalidState`] |
//! | `ExecutionAndPublication` | once, under a lock | cached | [`LazyError::InvalidState`] |
//! | `PublicationOnly` | possibly by every racer | retried | [`LazyError::Pending`] |
//!
//! A cached failure is a [`CapturedFailure`]: every later access returns a handle
//! to the same record, including the backtrace taken where the factory failed.
//!
//! The `ExecutionAndPublication` lock is a single atomic byte using `parking_lot`'s
//! futex-based parking, so reading an initialized value never takes a lock.
//!
//! # Features
//!
//! - **Lock-free fast path**: Reading a published value is one acquire load.
//! - **Failure replay**: Errors and panics from the factory are captured once.
//! - **Reentrancy detection**: A factory reading its own cell never deadlocks.
//! - **Async support**: `value_async` keeps tokio workers responsive while waiting.
//!
//! # Examples
//!
//! ```rust
//! use poly_lazy::{LazyMode, LazyValue};
//!
//! let config = LazyValue::new(|| "production".to_string(), LazyMode::ExecutionAndPublication);
//! assert!(!config.is_value_created());
//! assert_eq!(config.value().map(String::as_str).ok(), Some("production"));
//! assert!(config.is_value_created());
//! ```
//!
//! ## Fallible factories
//!
//! ```rust
//! use poly_lazy::{LazyMode, LazyValue};
//!
//! let port = LazyValue::try_new(|| "80a".parse::<u16>(), LazyMode::ExecutionAndPublication);
//! let first = port.value().unwrap_err();
//! let second = port.value().unwrap_err();
//! assert!(first.captured().unwrap().same_as(second.captured().unwrap()));
//! ```
//!
//! Diagnostics go through the `log` facade under the `poly_lazy` target.

/// Builder for configuring a cell.
mod builder;

/// Error types.
mod error;

/// Lazy cell implementation.
mod lazy;

/// Thread-safety modes.
mod mode;

/// Per-thread tracking of running factories.
mod reentry;

/// Internal publication lock.
mod state;

pub use builder::LazyBuilder;
pub use error::{BoxError, CapturedFailure, FailureKind, LazyError, Misuse};
pub use lazy::LazyValue;
pub use mode::LazyMode;
