//! Striped object I/O
//!
//! This crate presents one logical object as a contiguous byte stream while
//! the store spreads its content over many backing objects.
//!
//! # Architecture
//!
//! - `Cluster`: session with a store bound to one pool; created once, shared
//!   by many objects, closed once
//! - `StripedObject`: stream access with independent read and write cursors,
//!   plus remove, truncate, xattrs and stat
//! - `store`: the narrow operation set a store has to provide, and two
//!   reference stores (in-memory and local filesystem)
//! - `chunked`: fallback write strategy for stores that cap request sizes
//! - `io`: streaming between tokio readers/writers and objects

pub mod chunked;
pub mod cluster;
pub mod config;
pub mod error;
pub mod io;
pub mod keyring;
pub mod object;
pub mod store;

// Re-export commonly used types
pub use chunked::WriteStrategy;
pub use cluster::Cluster;
pub use config::StriperOptions;
pub use error::{ConnectCause, ConnectStage, Result, StriperError};
pub use keyring::{Keyring, KeyringError};
pub use object::{ObjectState, StripedObject};
pub use store::{StatResult, StoreBackend, StoreError};
