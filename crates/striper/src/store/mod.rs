//! Store seam
//!
//! The striping layer talks to its object store only through the traits in
//! this module. They mirror the narrow C API of a RADOS cluster with the
//! striper library on top of it:
//!
//! - [`StoreBackend`] creates sessions (`rados_create`)
//! - [`Session`] loads configuration, authenticates and opens pools
//!   (`rados_conf_read_file`, `rados_connect`, `rados_ioctx_create`)
//! - [`PoolContext`] hands out stripers and truncates objects
//!   (`rados_striper_create`, `rados_striper_trunc`, `rados_ioctx_destroy`)
//! - [`Striper`] performs the striped byte-range and metadata operations
//!
//! Two stores are provided: [`MemStore`] keeps pools in memory and can inject
//! faults, [`FsStore`] keeps one directory per pool on a local filesystem.

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;

use crate::config::StriperOptions;

pub mod fault;
pub mod fs;
pub mod layout;
pub mod mem;
mod native;

pub use fault::{Fault, FaultInjector, StoreOp};
pub use fs::FsStore;
pub use layout::{ObjectExtent, StripeLayout};
pub use mem::MemStore;
pub use native::RESERVED_XATTR_PREFIX;

/// Errors reported by a store, modeled on the errno values of the C API
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("No such object")]
    NotFound,

    #[error("No such attribute")]
    NoData,

    #[error("Object already exists")]
    Exists,

    #[error("Result does not fit in the supplied buffer")]
    Range,

    #[error("Request of {size} bytes exceeds the store limit of {limit} bytes")]
    TooLarge { size: u64, limit: u64 },

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Handle has been shut down")]
    Shutdown,

    #[error("I/O error: {0}")]
    Io(String),

    #[error("{0}")]
    Other(String),
}

impl StoreError {
    /// Negative errno the C API would have returned for this error
    pub fn errno(&self) -> i32 {
        match self {
            StoreError::NotFound => -2,
            StoreError::NoData => -61,
            StoreError::Exists => -17,
            StoreError::Range => -34,
            StoreError::TooLarge { .. } => -27,
            StoreError::PermissionDenied(_) => -13,
            StoreError::InvalidArgument(_) => -22,
            StoreError::Shutdown => -108,
            StoreError::Io(_) => -5,
            StoreError::Other(_) => -1,
        }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::NotFound => StoreError::NotFound,
            std::io::ErrorKind::AlreadyExists => StoreError::Exists,
            std::io::ErrorKind::PermissionDenied => StoreError::PermissionDenied(e.to_string()),
            _ => StoreError::Io(e.to_string()),
        }
    }
}

/// Result type alias for store operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Bytes returned by a striped read
#[derive(Debug, Clone)]
pub struct StripedRead {
    /// At most the requested number of bytes
    pub data: Bytes,
    /// True when the returned range reaches the logical end of the object
    pub eof: bool,
}

/// Result of a stat operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatResult {
    /// Logical object size in bytes
    pub size: u64,
    /// Last modification, seconds since the epoch
    pub mtime: u64,
}

impl StatResult {
    /// Modification time as a `SystemTime`
    pub fn modified(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(self.mtime)
    }
}

/// Entry point of a store: creates unconnected sessions
pub trait StoreBackend: Send + Sync {
    fn create_session(&self) -> StoreResult<Box<dyn Session>>;
}

/// An authenticated session with a store
#[async_trait]
pub trait Session: Send + Sync {
    /// Apply client configuration before connecting
    fn apply_config(&mut self, options: &StriperOptions) -> StoreResult<()>;

    /// Reach the store and authenticate
    async fn connect(&mut self) -> StoreResult<()>;

    /// Bind to a pool by name
    async fn open_pool(&self, pool: &str) -> StoreResult<Arc<dyn PoolContext>>;

    /// Tear the session down. Safe to call more than once.
    fn shutdown(&mut self);
}

/// Operations scoped to one pool
#[async_trait]
pub trait PoolContext: Send + Sync {
    fn name(&self) -> &str;

    /// Allocate a striping context bound to this pool
    async fn create_striper(&self) -> StoreResult<Box<dyn Striper>>;

    /// Resize a striped object
    async fn truncate(&self, oid: &str, size: u64) -> StoreResult<()>;

    /// Release the pool context. Stripers created from it stop working.
    fn release(&self) -> StoreResult<()>;
}

/// The store's native striping primitive
#[async_trait]
pub trait Striper: Send + Sync {
    /// Write `data` at `offset`, returning the number of bytes accepted
    async fn write(&self, oid: &str, data: &[u8], offset: u64) -> StoreResult<usize>;

    /// Read up to `len` bytes at `offset`
    async fn read(&self, oid: &str, len: usize, offset: u64) -> StoreResult<StripedRead>;

    /// Delete the object and all of its backing objects
    async fn remove(&self, oid: &str) -> StoreResult<()>;

    async fn setxattr(&self, oid: &str, name: &str, value: &[u8]) -> StoreResult<()>;

    /// Fetch an xattr; fails with [`StoreError::Range`] if it exceeds `capacity`
    async fn getxattr(&self, oid: &str, name: &str, capacity: usize) -> StoreResult<Bytes>;

    async fn stat(&self, oid: &str) -> StoreResult<StatResult>;

    /// Release the striping context
    fn destroy(&self);
}

/// Snapshot of the handles a store currently has outstanding
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub sessions: usize,
    pub pools: usize,
    pub stripers: usize,
}

#[derive(Debug, Default)]
pub(crate) struct StoreCounters {
    sessions: AtomicUsize,
    pools: AtomicUsize,
    stripers: AtomicUsize,
}

impl StoreCounters {
    pub(crate) fn session_opened(&self) {
        self.sessions.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn session_closed(&self) {
        self.sessions.fetch_sub(1, Ordering::SeqCst);
    }

    pub(crate) fn pool_opened(&self) {
        self.pools.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn pool_released(&self) {
        self.pools.fetch_sub(1, Ordering::SeqCst);
    }

    pub(crate) fn striper_created(&self) {
        self.stripers.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn striper_destroyed(&self) {
        self.stripers.fetch_sub(1, Ordering::SeqCst);
    }

    pub(crate) fn snapshot(&self) -> StoreStats {
        StoreStats {
            sessions: self.sessions.load(Ordering::SeqCst),
            pools: self.pools.load(Ordering::SeqCst),
            stripers: self.stripers.load(Ordering::SeqCst),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errno_mapping() {
        assert_eq!(StoreError::NotFound.errno(), -2);
        assert_eq!(StoreError::Range.errno(), -34);
        assert_eq!(StoreError::NoData.errno(), -61);
    }

    #[test]
    fn test_from_io_error() {
        let e = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        assert_eq!(StoreError::from(e), StoreError::NotFound);

        let e = std::io::Error::new(std::io::ErrorKind::Other, "disk on fire");
        assert!(matches!(StoreError::from(e), StoreError::Io(_)));
    }

    #[test]
    fn test_counters_snapshot() {
        let counters = StoreCounters::default();
        counters.session_opened();
        counters.pool_opened();
        counters.striper_created();
        counters.striper_created();
        counters.striper_destroyed();

        assert_eq!(
            counters.snapshot(),
            StoreStats {
                sessions: 1,
                pools: 1,
                stripers: 1
            }
        );
    }
}
