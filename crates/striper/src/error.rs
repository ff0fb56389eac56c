//! Error types for striped object operations

use cephconfig::ConfigError;
use std::fmt;
use thiserror::Error;

use crate::object::ObjectState;
use crate::store::StoreError;

/// Step of [`Cluster::connect`](crate::Cluster::connect) that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectStage {
    SessionCreate,
    ConfigLoad,
    Authenticate,
    PoolBind,
}

impl fmt::Display for ConnectStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stage = match self {
            ConnectStage::SessionCreate => "session create",
            ConnectStage::ConfigLoad => "config load",
            ConnectStage::Authenticate => "authenticate",
            ConnectStage::PoolBind => "pool bind",
        };
        f.write_str(stage)
    }
}

/// Underlying cause of a connect failure
#[derive(Debug, Error)]
pub enum ConnectCause {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Errors surfaced by [`Cluster`](crate::Cluster) and
/// [`StripedObject`](crate::StripedObject)
///
/// Nothing is retried internally; each variant reports what the store said.
#[derive(Debug, Error)]
pub enum StriperError {
    #[error("Connect failed during {stage}: {source}")]
    Connect {
        stage: ConnectStage,
        source: ConnectCause,
    },

    #[error("Failed to release connection: {0}")]
    Close(StoreError),

    #[error("Failed to create striper for {oid}: {source}")]
    StriperCreate { oid: String, source: StoreError },

    #[error("Object {oid} is {state}; the operation needs a connected object")]
    InvalidState { oid: String, state: ObjectState },

    #[error("Invalid object name: {0:?}")]
    InvalidObjectName(String),

    #[error("Write of {len} bytes to {oid} at offset {offset} failed after {accepted} bytes: {source}")]
    Write {
        oid: String,
        offset: u64,
        len: usize,
        accepted: usize,
        source: StoreError,
    },

    #[error("Short write to {oid} at offset {offset}: {written} of {requested} bytes accepted")]
    ShortWrite {
        oid: String,
        offset: u64,
        requested: usize,
        written: usize,
    },

    #[error("Read from {oid} at offset {offset} failed: {source}")]
    Read {
        oid: String,
        offset: u64,
        source: StoreError,
    },

    #[error("Read buffer must not be empty")]
    EmptyBuffer,

    #[error("Truncate of {oid} to {size} bytes failed: {source}")]
    Truncate {
        oid: String,
        size: u64,
        source: StoreError,
    },

    #[error("Remove of {oid} failed: {source}")]
    Remove { oid: String, source: StoreError },

    #[error("Xattr {name} not found on {oid}")]
    XattrNotFound { oid: String, name: String },

    #[error("Xattr {name} on {oid} is larger than {capacity} bytes")]
    XattrBufferTooSmall {
        oid: String,
        name: String,
        capacity: usize,
    },

    #[error("Xattr {name} on {oid}: {source}")]
    Xattr {
        oid: String,
        name: String,
        source: StoreError,
    },

    #[error("Invalid xattr name: {0:?}")]
    InvalidXattrName(String),

    #[error("Object not found: {0}")]
    ObjectNotFound(String),

    #[error("Stat of {oid} failed: {source}")]
    Stat { oid: String, source: StoreError },

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StriperError {
    pub(crate) fn connect(stage: ConnectStage, cause: impl Into<ConnectCause>) -> Self {
        StriperError::Connect {
            stage,
            source: cause.into(),
        }
    }

    /// Stage of a failed connect, if this is one
    pub fn connect_stage(&self) -> Option<ConnectStage> {
        match self {
            StriperError::Connect { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// True when the object or attribute does not exist
    pub fn is_not_found(&self) -> bool {
        match self {
            StriperError::ObjectNotFound(_) | StriperError::XattrNotFound { .. } => true,
            StriperError::Read { source, .. }
            | StriperError::Truncate { source, .. }
            | StriperError::Remove { source, .. }
            | StriperError::Xattr { source, .. }
            | StriperError::Stat { source, .. } => *source == StoreError::NotFound,
            _ => false,
        }
    }

    /// Store error behind this failure, if any
    pub fn store_error(&self) -> Option<&StoreError> {
        match self {
            StriperError::Connect {
                source: ConnectCause::Store(e),
                ..
            }
            | StriperError::Close(e)
            | StriperError::StriperCreate { source: e, .. }
            | StriperError::Write { source: e, .. }
            | StriperError::Read { source: e, .. }
            | StriperError::Truncate { source: e, .. }
            | StriperError::Remove { source: e, .. }
            | StriperError::Xattr { source: e, .. }
            | StriperError::Stat { source: e, .. } => Some(e),
            _ => None,
        }
    }
}

/// Result type alias for striper operations
pub type Result<T> = std::result::Result<T, StriperError>;
