//! Per-thread record of the cells whose factory is currently running.
//!
//! A factory that reads its own cell shows up here as the cell's address being
//! active on the current thread, which is how self-referential access is told
//! apart from another thread that simply got there first.

use std::cell::RefCell;

thread_local! {
   static ACTIVE: RefCell<Vec<usize>> = const { RefCell::new(Vec::new()) };
}

/// Returns `true` if the current thread is inside the factory of cell `id`.
#[inline]
pub(crate) fn is_active(id: usize) -> bool {
   ACTIVE.with(|active| active.borrow().contains(&id))
}

/// Marks cell `id` active on this thread until the scope is dropped.
#[inline]
pub(crate) fn enter(id: usize) -> ActiveScope {
   ACTIVE.with(|active| active.borrow_mut().push(id));
   ActiveScope { id }
}

/// Unmarks its cell on drop, including while unwinding.
pub(crate) struct ActiveScope {
   id: usize,
}

impl Drop for ActiveScope {
   fn drop(&mut self) {
      // `try_with` because the scope may outlive the thread-local during thread teardown.
      let _ = ACTIVE.try_with(|active| {
         let mut active = active.borrow_mut();
         if let Some(pos) = active.iter().rposition(|&id| id == self.id) {
            active.remove(pos);
         }
      });
   }
}
