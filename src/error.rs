//! Error vocabulary shared by the lookup table, the file state cache and the
//! lifecycle guard.

use nix::errno::Errno;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, TableError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TableError {
    /// A key with identical bytes is already indexed.
    #[error("key already exists")]
    AlreadyExists,
    #[error("key not found")]
    NotFound,
    /// Allocation of the bucket array or an entry key failed.
    #[error("out of memory")]
    OutOfMemory,
    /// The descriptor does not refer to a regular file.
    #[error("descriptor is not eligible for caching")]
    InvalidRegistration,
    #[error("key is {actual} bytes, table expects {expected}")]
    KeyLength { expected: usize, actual: usize },
    #[error("key size must be non-zero")]
    InvalidKeySize,
    #[error("stat failed: {0}")]
    Stat(#[from] Errno),
    /// The process-wide instance has been torn down and will not come back.
    #[error("already shut down")]
    ShutDown,
}
