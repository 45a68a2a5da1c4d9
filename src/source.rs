//! Environment inputs of the size cache: descriptor metadata and clocks.

use nix::errno::Errno;
use nix::sys::stat::{fstat, mode_t, SFlag};
use nix::time::{clock_gettime, ClockId};
use std::os::fd::RawFd;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// The parts of `struct stat` the cache cares about.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct FileMeta {
    pub mode: u32,
    pub size: u64,
}

impl FileMeta {
    pub fn is_regular(&self) -> bool {
        (self.mode as mode_t & SFlag::S_IFMT.bits()) == SFlag::S_IFREG.bits()
    }
}

/// Answers "how big is this descriptor right now".
pub trait StatSource: Send + Sync {
    fn stat(&self, fd: RawFd) -> nix::Result<FileMeta>;
}

/// `fstat(2)` on the live descriptor.
#[derive(Copy, Clone, Debug, Default)]
pub struct Fstat;

impl StatSource for Fstat {
    fn stat(&self, fd: RawFd) -> nix::Result<FileMeta> {
        let st = fstat(fd)?;
        file_meta(st.st_mode, st.st_size as i64)
    }
}

/// A negative size is reported as `EOVERFLOW` rather than cached.
fn file_meta(mode: mode_t, size: i64) -> nix::Result<FileMeta> {
    let size = u64::try_from(size).map_err(|_| Errno::EOVERFLOW)?;
    Ok(FileMeta {
        mode: mode as u32,
        size,
    })
}

/// Two wall-clock readings as time since the Unix epoch: a cheap coarse one
/// for stamping new entries and a precise one for refreshes.
pub trait Clock: Send + Sync {
    fn coarse(&self) -> Duration;
    fn precise(&self) -> Duration;
}

#[derive(Copy, Clone, Debug, Default)]
pub struct SystemClock;

#[cfg(any(target_os = "linux", target_os = "android"))]
const COARSE_CLOCK: ClockId = ClockId::CLOCK_REALTIME_COARSE;
#[cfg(not(any(target_os = "linux", target_os = "android")))]
const COARSE_CLOCK: ClockId = ClockId::CLOCK_REALTIME;

fn read_clock(id: ClockId) -> Duration {
    match clock_gettime(id) {
        Ok(ts) => Duration::new(ts.tv_sec() as u64, ts.tv_nsec() as u32),
        Err(_) => SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default(),
    }
}

impl Clock for SystemClock {
    fn coarse(&self) -> Duration {
        read_clock(COARSE_CLOCK)
    }

    fn precise(&self) -> Duration {
        read_clock(ClockId::CLOCK_REALTIME)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::fd::AsRawFd;

    #[test]
    fn fstat_reports_regular_file_size() {
        let mut file = tempfile::tempfile().unwrap();
        file.write_all(&[7u8; 300]).unwrap();
        let meta = Fstat.stat(file.as_raw_fd()).unwrap();
        assert!(meta.is_regular());
        assert_eq!(meta.size, 300);
    }

    #[test]
    fn fstat_flags_directories_as_irregular() {
        let dir = tempfile::tempdir().unwrap();
        let handle = std::fs::File::open(dir.path()).unwrap();
        let meta = Fstat.stat(handle.as_raw_fd()).unwrap();
        assert!(!meta.is_regular());
    }

    #[test]
    fn negative_size_is_an_error() {
        let mode = SFlag::S_IFREG.bits() | 0o644;
        assert_eq!(file_meta(mode, -1), Err(Errno::EOVERFLOW));
        assert_eq!(file_meta(mode, 12).map(|m| m.size), Ok(12));
    }

    #[test]
    fn fstat_on_closed_descriptor_fails() {
        assert!(Fstat.stat(-1).is_err());
    }

    #[test]
    fn clocks_agree_roughly() {
        let c = SystemClock;
        let coarse = c.coarse();
        let precise = c.precise();
        let gap = if precise > coarse {
            precise - coarse
        } else {
            coarse - precise
        };
        assert!(gap < Duration::from_secs(1), "gap {gap:?}");
        assert!(precise > Duration::from_secs(1_000_000_000));
    }
}
