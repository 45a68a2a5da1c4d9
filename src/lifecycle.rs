//! LifecycleGuard: exactly-once construction and teardown of a shared value.
//!
//! Phases move one way: `Uninitialized -> Ready -> Down`. Construction runs
//! outside the slot lock, so racing first callers may each build a candidate;
//! the first to install wins and the losers tear theirs down. Teardown is
//! serialized by a one-shot flag and runs at most once. Every access holds the
//! slot's read lock for its duration, so teardown waits for in-flight calls
//! and later calls see `Down` and get nothing.

use crate::error::{Result, TableError};
use parking_lot::{const_mutex, const_rwlock, Mutex, RwLock};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Phase {
    Uninitialized,
    Ready,
    Down,
}

enum Slot<T> {
    Uninitialized,
    Ready(T),
    Down,
}

impl<T> Slot<T> {
    fn phase(&self) -> Phase {
        match self {
            Slot::Uninitialized => Phase::Uninitialized,
            Slot::Ready(_) => Phase::Ready,
            Slot::Down => Phase::Down,
        }
    }
}

pub struct LifecycleGuard<T> {
    init: fn() -> Result<T>,
    teardown: fn(T),
    slot: RwLock<Slot<T>>,
    shutdown_called: Mutex<bool>,
}

impl<T> LifecycleGuard<T> {
    pub const fn new(init: fn() -> Result<T>, teardown: fn(T)) -> Self {
        Self {
            init,
            teardown,
            slot: const_rwlock(Slot::Uninitialized),
            shutdown_called: const_mutex(false),
        }
    }

    pub fn phase(&self) -> Phase {
        self.slot.read().phase()
    }

    /// Builds and installs the value unless it is already there. Fails with
    /// `ShutDown` once torn down, or with whatever `init` reports.
    pub fn ensure_initialized(&self) -> Result<()> {
        match self.phase() {
            Phase::Ready => return Ok(()),
            Phase::Down => return Err(TableError::ShutDown),
            Phase::Uninitialized => {}
        }

        let candidate = (self.init)()?;
        let mut slot = self.slot.write();
        match slot.phase() {
            Phase::Uninitialized => {
                *slot = Slot::Ready(candidate);
                tracing::debug!("lifecycle guard ready");
                Ok(())
            }
            Phase::Ready => {
                drop(slot);
                tracing::debug!("lost initialization race, discarding candidate");
                (self.teardown)(candidate);
                Ok(())
            }
            Phase::Down => {
                drop(slot);
                (self.teardown)(candidate);
                Err(TableError::ShutDown)
            }
        }
    }

    /// Tears the value down. Only the first call does anything; it returns
    /// `true` if a live value was destroyed.
    pub fn shutdown(&self) -> bool {
        let mut called = self.shutdown_called.lock();
        if *called {
            return false;
        }
        *called = true;

        let previous = std::mem::replace(&mut *self.slot.write(), Slot::Down);
        match previous {
            Slot::Ready(value) => {
                (self.teardown)(value);
                tracing::debug!("lifecycle guard shut down");
                true
            }
            _ => false,
        }
    }

    /// Runs `f` on the value if it is ready.
    pub fn with<R, F>(&self, f: F) -> Option<R>
    where
        F: FnOnce(&T) -> R,
    {
        match &*self.slot.read() {
            Slot::Ready(value) => Some(f(value)),
            _ => None,
        }
    }
}
