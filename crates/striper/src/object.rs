//! Stream-style access to one striped object
//!
//! A [`StripedObject`] owns its striping context and two independent cursors.
//! Every call is exactly one round-trip to the store; nothing is cached or
//! buffered on the client.

use bytes::Bytes;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::chunked::{self, WriteStrategy};
use crate::cluster::Cluster;
use crate::error::{Result, StriperError};
use crate::store::{PoolContext, StatResult, StoreError, Striper, RESERVED_XATTR_PREFIX};

/// Lifecycle of a [`StripedObject`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectState {
    Unconnected,
    Connected,
    Destroyed,
}

impl fmt::Display for ObjectState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self {
            ObjectState::Unconnected => "unconnected",
            ObjectState::Connected => "connected",
            ObjectState::Destroyed => "destroyed",
        };
        f.write_str(state)
    }
}

enum Handle {
    Unconnected,
    Connected(Box<dyn Striper>),
    Destroyed,
}

/// A logical object read and written as one contiguous byte stream
///
/// Not `Clone`: the cursors and the striping context have a single owner.
/// Methods that move a cursor take `&mut self`.
pub struct StripedObject {
    name: String,
    pool: Arc<dyn PoolContext>,
    handle: Handle,
    read_offset: u64,
    write_offset: u64,
    strategy: WriteStrategy,
    xattr_initial_size: usize,
    xattr_max_size: usize,
}

impl StripedObject {
    /// Bind a new, unconnected object to `cluster`'s pool
    pub fn new(cluster: &Cluster, name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(StriperError::InvalidObjectName(name));
        }

        let options = cluster.options();
        Ok(Self {
            name,
            pool: cluster.pool_context(),
            handle: Handle::Unconnected,
            read_offset: 0,
            write_offset: 0,
            strategy: WriteStrategy::Native,
            xattr_initial_size: options.striper_xattr_initial_size.0 as usize,
            xattr_max_size: options.striper_xattr_max_size.0 as usize,
        })
    }

    /// Use `strategy` for every subsequent write
    pub fn with_write_strategy(mut self, strategy: WriteStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> ObjectState {
        match self.handle {
            Handle::Unconnected => ObjectState::Unconnected,
            Handle::Connected(_) => ObjectState::Connected,
            Handle::Destroyed => ObjectState::Destroyed,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ObjectState::Connected
    }

    /// Offset the next [`read`](Self::read) starts at
    pub fn read_cursor(&self) -> u64 {
        self.read_offset
    }

    /// Offset the next [`write`](Self::write) starts at
    pub fn write_cursor(&self) -> u64 {
        self.write_offset
    }

    fn striper(&self) -> Result<&dyn Striper> {
        match &self.handle {
            Handle::Connected(striper) => Ok(striper.as_ref()),
            _ => Err(StriperError::InvalidState {
                oid: self.name.clone(),
                state: self.state(),
            }),
        }
    }

    /// Allocate the striping context
    pub async fn connect(&mut self) -> Result<()> {
        if !matches!(self.handle, Handle::Unconnected) {
            return Err(StriperError::InvalidState {
                oid: self.name.clone(),
                state: self.state(),
            });
        }

        let striper = self
            .pool
            .create_striper()
            .await
            .map_err(|source| StriperError::StriperCreate {
                oid: self.name.clone(),
                source,
            })?;

        self.handle = Handle::Connected(striper);
        info!("Striper for {} created in pool {}", self.name, self.pool.name());
        Ok(())
    }

    /// Release the striping context; the object is unusable afterwards
    ///
    /// The stored data is left alone.
    pub fn destroy(&mut self) {
        if let Handle::Connected(striper) = std::mem::replace(&mut self.handle, Handle::Destroyed) {
            striper.destroy();
            info!("Striper for {} destroyed", self.name);
        }
    }

    /// Write `data` at `offset` without touching either cursor
    ///
    /// Succeeds only if the store accepted every byte.
    pub async fn write_at(&self, data: &[u8], offset: u64) -> Result<usize> {
        let striper = self.striper()?;
        if data.is_empty() {
            return Ok(0);
        }

        debug!("Writing {} bytes to {} at {}", data.len(), self.name, offset);
        match self.strategy {
            WriteStrategy::Native => {
                let written = striper.write(&self.name, data, offset).await.map_err(|source| {
                    StriperError::Write {
                        oid: self.name.clone(),
                        offset,
                        len: data.len(),
                        accepted: 0,
                        source,
                    }
                })?;

                if written != data.len() {
                    return Err(StriperError::ShortWrite {
                        oid: self.name.clone(),
                        offset,
                        requested: data.len(),
                        written,
                    });
                }
                Ok(written)
            }
            WriteStrategy::Chunked { chunk_size } => {
                chunked::write_chunked(striper, &self.name, data, offset, chunk_size).await
            }
        }
    }

    /// Write `data` at the write cursor and advance it
    pub async fn write(&mut self, data: &[u8]) -> Result<usize> {
        let written = self.write_at(data, self.write_offset).await?;
        self.write_offset += written as u64;
        debug!("Write cursor of {} now at {}", self.name, self.write_offset);
        Ok(written)
    }

    /// Read into `buf` from the read cursor and advance it
    ///
    /// Returns the number of bytes read and whether the end of the object was
    /// reached: either fewer bytes than `buf.len()` came back, or the bytes
    /// that did come back run up to the end.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<(usize, bool)> {
        let striper = self.striper()?;
        if buf.is_empty() {
            return Err(StriperError::EmptyBuffer);
        }

        let offset = self.read_offset;
        let read_err = |source| StriperError::Read {
            oid: self.name.clone(),
            offset,
            source,
        };

        let result = striper
            .read(&self.name, buf.len(), offset)
            .await
            .map_err(read_err)?;
        let n = result.data.len();
        if n > buf.len() {
            return Err(read_err(StoreError::Other(format!(
                "store returned {} bytes for a {} byte read",
                n,
                buf.len()
            ))));
        }

        buf[..n].copy_from_slice(&result.data);
        let end_of_data = n < buf.len() || result.eof;

        self.read_offset += n as u64;
        debug!(
            "Read {} bytes from {} at {} (end_of_data={})",
            n, self.name, offset, end_of_data
        );
        Ok((n, end_of_data))
    }

    /// Resize the object to exactly `size` bytes
    ///
    /// Growing is up to the store; a refusal is reported, never hidden.
    pub async fn truncate(&self, size: u64) -> Result<()> {
        self.striper()?;
        info!("Truncating {} to {} bytes", self.name, size);

        self.pool
            .truncate(&self.name, size)
            .await
            .map_err(|source| StriperError::Truncate {
                oid: self.name.clone(),
                size,
                source,
            })
    }

    /// Delete the object and all of its stripes
    ///
    /// Removing an object that does not exist succeeds.
    pub async fn remove(&self) -> Result<()> {
        let striper = self.striper()?;

        match striper.remove(&self.name).await {
            Ok(()) => {
                info!("Removed {}", self.name);
                Ok(())
            }
            Err(StoreError::NotFound) => {
                warn!("Remove of {}: object does not exist", self.name);
                Ok(())
            }
            Err(source) => Err(StriperError::Remove {
                oid: self.name.clone(),
                source,
            }),
        }
    }

    fn check_xattr_name(name: &str) -> Result<()> {
        if name.is_empty() || name.starts_with(RESERVED_XATTR_PREFIX) {
            return Err(StriperError::InvalidXattrName(name.to_string()));
        }
        Ok(())
    }

    fn xattr_error(&self, name: &str, source: StoreError) -> StriperError {
        match source {
            StoreError::NoData => StriperError::XattrNotFound {
                oid: self.name.clone(),
                name: name.to_string(),
            },
            source => StriperError::Xattr {
                oid: self.name.clone(),
                name: name.to_string(),
                source,
            },
        }
    }

    pub async fn setxattr(&self, name: &str, value: &[u8]) -> Result<()> {
        let striper = self.striper()?;
        Self::check_xattr_name(name)?;

        debug!("Setting xattr {} ({} bytes) on {}", name, value.len(), self.name);
        striper
            .setxattr(&self.name, name, value)
            .await
            .map_err(|e| self.xattr_error(name, e))
    }

    /// Fetch an xattr, growing the buffer until the value fits
    ///
    /// A missing attribute is [`StriperError::XattrNotFound`]; a missing
    /// object is [`StriperError::Xattr`] carrying [`StoreError::NotFound`].
    /// Both report [`StriperError::is_not_found`].
    pub async fn getxattr(&self, name: &str) -> Result<Bytes> {
        let striper = self.striper()?;
        Self::check_xattr_name(name)?;

        let mut capacity = self.xattr_initial_size.max(1);
        loop {
            match striper.getxattr(&self.name, name, capacity).await {
                Ok(value) => return Ok(value),
                Err(StoreError::Range) if capacity < self.xattr_max_size => {
                    capacity = capacity.saturating_mul(2).min(self.xattr_max_size);
                    debug!("Xattr {} on {} needs more room, retrying with {}", name, self.name, capacity);
                }
                Err(StoreError::Range) => {
                    return Err(StriperError::XattrBufferTooSmall {
                        oid: self.name.clone(),
                        name: name.to_string(),
                        capacity,
                    })
                }
                Err(e) => return Err(self.xattr_error(name, e)),
            }
        }
    }

    /// Logical size and last modification time
    pub async fn stat(&self) -> Result<StatResult> {
        let striper = self.striper()?;

        striper.stat(&self.name).await.map_err(|source| match source {
            StoreError::NotFound => StriperError::ObjectNotFound(self.name.clone()),
            source => StriperError::Stat {
                oid: self.name.clone(),
                source,
            },
        })
    }
}

impl Drop for StripedObject {
    fn drop(&mut self) {
        if let Handle::Connected(striper) = &self.handle {
            warn!("Striped object {} dropped while connected, releasing", self.name);
            striper.destroy();
        }
    }
}

impl fmt::Debug for StripedObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StripedObject")
            .field("name", &self.name)
            .field("pool", &self.pool.name())
            .field("state", &self.state())
            .field("read_offset", &self.read_offset)
            .field("write_offset", &self.write_offset)
            .field("strategy", &self.strategy)
            .finish()
    }
}
