//! FileStateCache: per-descriptor metadata indexed in a `LookupTable`, with
//! a time-windowed size cache on each entry.
//!
//! The table lock covers membership only. Each `FileState` guards its cached
//! size and refresh time with its own lock. A refresh reads the stamp, stats
//! the descriptor with no lock held, then stores the result under the entry's
//! write lock, so only readers of that same entry ever wait on it.
//!
//! Registration failures of any kind leave the descriptor uncached; callers
//! fall back to querying the file themselves.

use crate::bucket_store::Handle;
use crate::config::CacheConfig;
use crate::error::{Result, TableError};
use crate::lookup_table::LookupTable;
use crate::source::{Clock, FileMeta, Fstat, StatSource, SystemClock};
use nix::fcntl::OFlag;
use parking_lot::RwLock;
use std::fmt;
use std::mem::size_of;
use std::os::fd::RawFd;
use std::time::Duration;

#[derive(Debug)]
struct SizeStamp {
    size: u64,
    checked_at: Duration,
}

/// Cached metadata for one open regular file.
pub struct FileState {
    fd: RawFd,
    mode: u32,
    flags: OFlag,
    stamp: RwLock<SizeStamp>,
}

impl FileState {
    pub fn fd(&self) -> RawFd {
        self.fd
    }

    /// `st_mode` captured at registration.
    pub fn mode(&self) -> u32 {
        self.mode
    }

    /// Open flags captured at registration.
    pub fn flags(&self) -> OFlag {
        self.flags
    }

    /// Last cached size, without any staleness check.
    pub fn cached_size(&self) -> u64 {
        self.stamp.read().size
    }

    pub fn checked_at(&self) -> Duration {
        self.stamp.read().checked_at
    }

    fn stamp(&self) -> (u64, Duration) {
        let stamp = self.stamp.read();
        (stamp.size, stamp.checked_at)
    }

    /// Stores a refresh that was started when the stamp read `seen`. If another
    /// thread refreshed in the meantime its result stands.
    fn store_refresh(&self, refreshed: nix::Result<FileMeta>, seen: Duration, now: Duration) -> u64 {
        let mut stamp = self.stamp.write();
        if stamp.checked_at != seen {
            return stamp.size;
        }
        match refreshed {
            Ok(meta) => {
                tracing::trace!(fd = self.fd, old = stamp.size, new = meta.size, "size refreshed");
                stamp.size = meta.size;
                stamp.checked_at = now;
            }
            Err(errno) => {
                tracing::warn!(fd = self.fd, %errno, "size refresh failed, serving stale size");
            }
        }
        stamp.size
    }
}

impl fmt::Debug for FileState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stamp = self.stamp.read();
        f.debug_struct("FileState")
            .field("fd", &self.fd)
            .field("mode", &format_args!("{:o}", self.mode))
            .field("flags", &self.flags)
            .field("size", &stamp.size)
            .field("checked_at", &stamp.checked_at)
            .finish()
    }
}

/// Reference to a registered descriptor. Cheap to copy; resolves to nothing
/// once the descriptor is unregistered, even if the same fd is registered
/// again later.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct StateHandle {
    fd: RawFd,
    handle: Handle,
}

impl StateHandle {
    pub fn fd(&self) -> RawFd {
        self.fd
    }
}

fn fd_key(fd: RawFd) -> [u8; size_of::<RawFd>()] {
    fd.to_ne_bytes()
}

pub struct FileStateCache<S = Fstat, C = SystemClock> {
    table: LookupTable<FileState>,
    source: S,
    clock: C,
    staleness: Duration,
}

impl FileStateCache {
    /// Cache over live descriptors and the system clocks.
    pub fn new(config: &CacheConfig) -> Result<Self> {
        Self::with_sources(config, Fstat, SystemClock)
    }
}

impl<S: StatSource, C: Clock> FileStateCache<S, C> {
    pub fn with_sources(config: &CacheConfig, source: S, clock: C) -> Result<Self> {
        let table = LookupTable::create(config.bucket_hint, &config.name, None, size_of::<RawFd>())?;
        Ok(Self {
            table,
            source,
            clock,
            staleness: config.staleness,
        })
    }

    pub fn staleness(&self) -> Duration {
        self.staleness
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// The underlying descriptor table, for statistics.
    pub fn table(&self) -> &LookupTable<FileState> {
        &self.table
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Registers `fd` and reports why when it cannot be cached.
    pub fn try_register_open(&self, fd: RawFd, flags: OFlag) -> Result<StateHandle> {
        let meta = self.source.stat(fd)?;
        if !meta.is_regular() {
            return Err(TableError::InvalidRegistration);
        }
        let state = FileState {
            fd,
            mode: meta.mode,
            flags,
            stamp: RwLock::new(SizeStamp {
                size: meta.size,
                checked_at: self.clock.coarse(),
            }),
        };
        let handle = self.table.insert(&fd_key(fd), state)?;
        tracing::debug!(fd, size = meta.size, "descriptor registered");
        Ok(StateHandle { fd, handle })
    }

    /// Registers `fd`; `None` means the descriptor stays uncached.
    pub fn register_open(&self, fd: RawFd, flags: OFlag) -> Option<StateHandle> {
        match self.try_register_open(fd, flags) {
            Ok(handle) => Some(handle),
            Err(TableError::AlreadyExists) => {
                tracing::warn!(fd, "descriptor already registered, leaving uncached");
                None
            }
            Err(err) => {
                tracing::debug!(fd, %err, "descriptor not cached");
                None
            }
        }
    }

    pub fn lookup_state(&self, fd: RawFd) -> Option<StateHandle> {
        self.table
            .find(&fd_key(fd))
            .map(|handle| StateHandle { fd, handle })
    }

    /// Size of the file behind `state`, re-queried only when the cached value
    /// is older than the staleness window. `None` if `state` is stale.
    ///
    /// The stat runs with no lock held, so a slow query stalls neither the
    /// table nor other readers of this entry.
    pub fn get_size(&self, state: &StateHandle) -> Option<u64> {
        let now = self.clock.precise();
        let (size, seen) = self.table.with_handle(state.handle, FileState::stamp)?;
        if now.saturating_sub(seen) < self.staleness {
            return Some(size);
        }
        let refreshed = self.source.stat(state.fd);
        self.table.with_handle(state.handle, |file| {
            file.store_refresh(refreshed, seen, self.clock.precise())
        })
    }

    /// Read-only access to the registered state.
    pub fn with_state<R, F>(&self, state: &StateHandle, f: F) -> Option<R>
    where
        F: FnOnce(&FileState) -> R,
    {
        self.table.with_handle(state.handle, f)
    }

    /// Drops the descriptor from the table and returns its state.
    ///
    /// A handle handed out by this cache must still be indexed when it is
    /// unregistered; anything else means the cache and the table disagree.
    pub fn unregister_close(&self, state: StateHandle) -> Option<FileState> {
        match self.table.remove_handle(state.handle) {
            Some((_key, file)) => {
                debug_assert_eq!(file.fd, state.fd);
                tracing::debug!(fd = state.fd, "descriptor unregistered");
                Some(file)
            }
            None => {
                tracing::error!(fd = state.fd, "unregistering a descriptor the table does not hold");
                debug_assert!(false, "fd {} missing from {}", state.fd, self.table.name());
                None
            }
        }
    }

    /// Close path: forgets `fd` if it was registered. Lookup and unlink are
    /// one table operation, so racing closes of the same fd release it once.
    pub fn close_fd(&self, fd: RawFd) -> bool {
        match self.table.remove(&fd_key(fd)) {
            Ok(_) => {
                tracing::debug!(fd, "descriptor unregistered");
                true
            }
            Err(_) => false,
        }
    }

    /// Reopen path: the stream behind `state` now lives on `new_fd`. The old
    /// registration is dropped and `new_fd` is registered with the old flags.
    pub fn reopen(&self, state: StateHandle, new_fd: RawFd) -> Option<StateHandle> {
        let flags = self.unregister_close(state)?.flags;
        self.register_open(new_fd, flags)
    }

    /// Releases every registration. Returns how many were still held.
    pub fn destroy(self) -> usize {
        self.table.destroy()
    }
}

impl<S, C> fmt::Debug for FileStateCache<S, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileStateCache")
            .field("table", &self.table)
            .field("staleness", &self.staleness)
            .finish_non_exhaustive()
    }
}
