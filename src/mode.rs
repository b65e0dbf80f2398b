//! Thread-safety modes for [`LazyValue`](crate::LazyValue).

use core::fmt;
use core::str::FromStr;

use crate::error::LazyError;

/// Concurrency policy of a lazy cell, fixed at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum LazyMode {
   /// No synchronization. The caller guarantees single-threaded initialization;
   /// a second thread arriving while the factory runs is refused.
   None = 0,
   /// Lock-free. Racing threads may all run the factory; the first result to be
   /// published wins and factory errors are never cached.
   PublicationOnly = 1,
   /// Mutual exclusion. The factory runs at most once and every caller observes
   /// its single outcome, value or failure.
   #[default]
   ExecutionAndPublication = 2,
}

impl LazyMode {
   /// Whether the mode lets several threads initialize the cell.
   #[inline]
   pub const fn is_thread_safe(self) -> bool {
      !matches!(self, Self::None)
   }

   /// Whether a factory failure faults the cell permanently.
   #[inline]
   pub const fn caches_failures(self) -> bool {
      !matches!(self, Self::PublicationOnly)
   }

   /// Canonical kebab-case name, as accepted by [`FromStr`].
   pub const fn as_str(self) -> &'static str {
      match self {
         Self::None => "none",
         Self::PublicationOnly => "publication-only",
         Self::ExecutionAndPublication => "execution-and-publication",
      }
   }
}

impl From<bool> for LazyMode {
   /// `true` selects `ExecutionAndPublication`, `false` selects `None`.
   #[inline]
   fn from(is_thread_safe: bool) -> Self {
      if is_thread_safe {
         Self::ExecutionAndPublication
      } else {
         Self::None
      }
   }
}

impl TryFrom<i32> for LazyMode {
   type Error = LazyError;

   fn try_from(raw: i32) -> Result<Self, Self::Error> {
      match raw {
         0 => Ok(Self::None),
         1 => Ok(Self::PublicationOnly),
         2 => Ok(Self::ExecutionAndPublication),
         other => Err(LazyError::InvalidArgument(format!(
            "unknown lazy thread-safety mode {other}"
         ))),
      }
   }
}

impl FromStr for LazyMode {
   type Err = LazyError;

   fn from_str(s: &str) -> Result<Self, Self::Err> {
      let normalized = s.trim().to_ascii_lowercase().replace('_', "-");
      match normalized.as_str() {
         "none" => Ok(Self::None),
         "publication-only" | "publicationonly" => Ok(Self::PublicationOnly),
         "execution-and-publication" | "executionandpublication" => {
            Ok(Self::ExecutionAndPublication)
         }
         _ => Err(LazyError::InvalidArgument(format!(
            "unknown lazy thread-safety mode {s:?}"
         ))),
      }
   }
}

impl fmt::Display for LazyMode {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      f.write_str(self.as_str())
   }
}
