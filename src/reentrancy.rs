//! Debug-only reentrancy guard.
//!
//! Detects a thread entering a table it is already inside, e.g. a hash
//! function or a `lookup_with` closure calling back into the same table.
//! Under the table lock that would deadlock (or, for a nested shared lock,
//! deadlock as soon as a writer queues up). In debug builds the second entry
//! panics instead. In release builds this compiles to a zero-cost no-op.
//!
//! Entries are tracked per thread, so concurrent readers on different threads
//! never trip the guard.
//!
//! Internal to the crate:
//!
//! ```compile_fail
//! use fd_state_map::DebugReentrancy;
//! ```

#[cfg(debug_assertions)]
use std::cell::RefCell;
use std::marker::PhantomData;
#[cfg(debug_assertions)]
use std::sync::atomic::{AtomicUsize, Ordering};

#[cfg(debug_assertions)]
static NEXT_ID: AtomicUsize = AtomicUsize::new(0);

#[cfg(debug_assertions)]
thread_local! {
    // Ids of the guarded structures this thread is currently inside.
    static ENTERED: RefCell<Vec<usize>> = const { RefCell::new(Vec::new()) };
}

/// Per-instance reentrancy tracker. Embed this in structs to guard public
/// entry-points with `let _g = self.reentrancy.enter();`.
#[derive(Debug)]
pub struct DebugReentrancy {
    #[cfg(debug_assertions)]
    id: usize,
}

impl DebugReentrancy {
    pub fn new() -> Self {
        Self {
            #[cfg(debug_assertions)]
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// Enter a guarded section. In debug builds, panics if this thread has
    /// already entered the same instance.
    #[inline]
    pub fn enter(&self) -> ReentrancyGuard<'_> {
        #[cfg(debug_assertions)]
        {
            ENTERED.with(|entered| {
                let mut entered = entered.borrow_mut();
                assert!(
                    !entered.contains(&self.id),
                    "reentrancy detected: nested entry into lookup table"
                );
                entered.push(self.id);
            });
            ReentrancyGuard {
                owner: self,
                _nosend: PhantomData,
            }
        }

        #[cfg(not(debug_assertions))]
        {
            ReentrancyGuard {
                _z: PhantomData,
                _nosend: PhantomData,
            }
        }
    }
}

impl Default for DebugReentrancy {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard returned by `DebugReentrancy::enter`. Bound to the entering
/// thread.
pub struct ReentrancyGuard<'a> {
    #[cfg(debug_assertions)]
    owner: &'a DebugReentrancy,
    #[cfg(not(debug_assertions))]
    _z: PhantomData<&'a ()>,
    _nosend: PhantomData<*mut ()>,
}

impl<'a> Drop for ReentrancyGuard<'a> {
    fn drop(&mut self) {
        #[cfg(debug_assertions)]
        {
            ENTERED.with(|entered| {
                let mut entered = entered.borrow_mut();
                let pos = entered.iter().rposition(|&id| id == self.owner.id);
                debug_assert!(pos.is_some());
                if let Some(pos) = pos {
                    entered.swap_remove(pos);
                }
            });
        }
    }
}
