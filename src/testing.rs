//! Deterministic stand-ins for the environment inputs of the size cache.
//!
//! `ManualClock` only moves when told to and `FakeFiles` serves sizes from a
//! map, so staleness behavior can be exercised without sleeping or touching
//! the filesystem.
//!
//! ```
//! use fd_state_map::testing::{FakeFiles, ManualClock};
//! use fd_state_map::{CacheConfig, FileStateCache};
//! use nix::fcntl::OFlag;
//! use std::time::Duration;
//!
//! let cache = FileStateCache::with_sources(
//!     &CacheConfig::default(),
//!     FakeFiles::default(),
//!     ManualClock::at(Duration::from_secs(10)),
//! )
//! .unwrap();
//! cache.source().add_file(3, 1000);
//! let state = cache.register_open(3, OFlag::O_RDONLY).unwrap();
//! cache.source().set_size(3, 10);
//! assert_eq!(cache.get_size(&state), Some(1000));
//! cache.clock().advance(Duration::from_secs(2));
//! assert_eq!(cache.get_size(&state), Some(10));
//! ```

use crate::source::{Clock, FileMeta, StatSource};
use nix::errno::Errno;
use nix::sys::stat::SFlag;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::os::fd::RawFd;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Clock that reads a settable instant. `coarse` may be configured to run
/// ahead of `precise` to mimic a coarse clock's tick granularity.
#[derive(Debug, Default)]
pub struct ManualClock {
    now_nanos: AtomicU64,
    coarse_lead_nanos: AtomicU64,
}

impl ManualClock {
    pub fn at(start: Duration) -> Self {
        let clock = Self::default();
        clock.set(start);
        clock
    }

    pub fn now(&self) -> Duration {
        Duration::from_nanos(self.now_nanos.load(Ordering::SeqCst))
    }

    pub fn set(&self, to: Duration) {
        self.now_nanos.store(to.as_nanos() as u64, Ordering::SeqCst);
    }

    pub fn advance(&self, by: Duration) {
        self.now_nanos.fetch_add(by.as_nanos() as u64, Ordering::SeqCst);
    }

    pub fn set_coarse_lead(&self, lead: Duration) {
        self.coarse_lead_nanos
            .store(lead.as_nanos() as u64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn coarse(&self) -> Duration {
        self.now() + Duration::from_nanos(self.coarse_lead_nanos.load(Ordering::SeqCst))
    }

    fn precise(&self) -> Duration {
        self.now()
    }
}

#[derive(Debug)]
struct FakeFile {
    meta: FileMeta,
    stat_calls: usize,
}

/// In-memory descriptor table. Unknown descriptors fail with `EBADF`.
#[derive(Debug, Default)]
pub struct FakeFiles {
    files: Mutex<HashMap<RawFd, FakeFile>>,
}

impl FakeFiles {
    fn put(&self, fd: RawFd, kind: SFlag, size: u64) {
        let meta = FileMeta {
            mode: (kind.bits() as u32) | 0o644,
            size,
        };
        self.files.lock().insert(
            fd,
            FakeFile {
                meta,
                stat_calls: 0,
            },
        );
    }

    pub fn add_file(&self, fd: RawFd, size: u64) {
        self.put(fd, SFlag::S_IFREG, size);
    }

    pub fn add_pipe(&self, fd: RawFd) {
        self.put(fd, SFlag::S_IFIFO, 0);
    }

    pub fn add_dir(&self, fd: RawFd) {
        self.put(fd, SFlag::S_IFDIR, 4096);
    }

    pub fn set_size(&self, fd: RawFd, size: u64) {
        if let Some(file) = self.files.lock().get_mut(&fd) {
            file.meta.size = size;
        }
    }

    pub fn remove(&self, fd: RawFd) {
        self.files.lock().remove(&fd);
    }

    /// How many times `fd` has been stat'ed since it was added.
    pub fn stat_calls(&self, fd: RawFd) -> usize {
        self.files.lock().get(&fd).map(|f| f.stat_calls).unwrap_or(0)
    }
}

impl StatSource for FakeFiles {
    fn stat(&self, fd: RawFd) -> nix::Result<FileMeta> {
        let mut files = self.files.lock();
        let file = files.get_mut(&fd).ok_or(Errno::EBADF)?;
        file.stat_calls += 1;
        Ok(file.meta)
    }
}
