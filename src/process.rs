//! The process-wide descriptor state cache.
//!
//! An interposition layer calls [`ensure_initialized`] before its first
//! registration and [`shutdown`] on the way out. Between the two, the other
//! functions here operate on one shared [`FileStateCache`]. Outside that
//! window they report absence (`None` / `false`) instead of failing, so a
//! caller racing teardown simply falls back to uncached behavior.

use crate::config::CacheConfig;
use crate::error::Result;
use crate::file_state::{FileStateCache, StateHandle};
use crate::lifecycle::{LifecycleGuard, Phase};
use nix::fcntl::OFlag;
use std::os::fd::RawFd;

static FILE_STATES: LifecycleGuard<FileStateCache> = LifecycleGuard::new(build_cache, destroy_cache);

fn build_cache() -> Result<FileStateCache> {
    FileStateCache::new(&CacheConfig::from_env())
}

fn destroy_cache(cache: FileStateCache) {
    let released = cache.destroy();
    if released > 0 {
        tracing::debug!(released, "descriptor states dropped at shutdown");
    }
}

pub fn ensure_initialized() -> Result<()> {
    FILE_STATES.ensure_initialized()
}

/// Tears the cache down once. Returns `true` for the call that did it.
pub fn shutdown() -> bool {
    FILE_STATES.shutdown()
}

pub fn phase() -> Phase {
    FILE_STATES.phase()
}

pub fn register_open(fd: RawFd, flags: OFlag) -> Option<StateHandle> {
    FILE_STATES.with(|cache| cache.register_open(fd, flags)).flatten()
}

pub fn lookup_state(fd: RawFd) -> Option<StateHandle> {
    FILE_STATES.with(|cache| cache.lookup_state(fd)).flatten()
}

pub fn get_size(state: &StateHandle) -> Option<u64> {
    FILE_STATES.with(|cache| cache.get_size(state)).flatten()
}

/// Unregisters `state`. Returns `false` if the cache is no longer running.
pub fn unregister_close(state: StateHandle) -> bool {
    FILE_STATES
        .with(|cache| cache.unregister_close(state).is_some())
        .unwrap_or(false)
}

pub fn close_fd(fd: RawFd) -> bool {
    FILE_STATES.with(|cache| cache.close_fd(fd)).unwrap_or(false)
}

pub fn reopen(state: StateHandle, new_fd: RawFd) -> Option<StateHandle> {
    FILE_STATES.with(|cache| cache.reopen(state, new_fd)).flatten()
}

/// Number of registered descriptors; zero when not running.
pub fn registered() -> usize {
    FILE_STATES.with(|cache| cache.len()).unwrap_or(0)
}
