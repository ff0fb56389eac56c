//! Native striping shared by the reference stores
//!
//! A striped object is a set of backing objects named `<oid>.<objectno>`.
//! The first backing object always exists while the striped object does and
//! carries its metadata as xattrs: the logical size and the layout it was
//! created with. User xattrs are stored next to them.
//!
//! Stores only provide per-object primitives through [`ObjectBackend`]; the
//! extent mapping and metadata bookkeeping live here.

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;

use super::fault::{Fault, FaultInjector, StoreOp};
use super::layout::{object_name, StripeLayout};
use super::{
    PoolContext, StatResult, StoreCounters, StoreError, StoreResult, StripedRead, Striper,
};

/// Xattr names under this prefix belong to the striper
pub const RESERVED_XATTR_PREFIX: &str = "striper.";

const SIZE_XATTR: &str = "striper.size";
const STRIPE_UNIT_XATTR: &str = "striper.layout.stripe_unit";
const STRIPE_COUNT_XATTR: &str = "striper.layout.stripe_count";
const OBJECT_SIZE_XATTR: &str = "striper.layout.object_size";

pub(crate) fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Per-object primitives a store has to offer
#[async_trait]
pub(crate) trait ObjectBackend: Send + Sync + 'static {
    /// Write at offset, creating the object if needed
    async fn write(&self, oid: &str, data: &[u8], offset: u64) -> StoreResult<()>;

    /// Read up to `len` bytes; short at end of object, `NotFound` if absent
    async fn read(&self, oid: &str, len: usize, offset: u64) -> StoreResult<Bytes>;

    /// Set the object length, creating the object if needed
    async fn truncate(&self, oid: &str, size: u64) -> StoreResult<()>;

    async fn remove(&self, oid: &str) -> StoreResult<()>;

    /// Set an xattr, creating the object if needed
    async fn setxattr(&self, oid: &str, name: &str, value: &[u8]) -> StoreResult<()>;

    /// `NotFound` for a missing object, `NoData` for a missing attribute
    async fn getxattr(&self, oid: &str, name: &str) -> StoreResult<Bytes>;

    /// Object length and mtime in seconds since the epoch
    async fn stat(&self, oid: &str) -> StoreResult<(u64, u64)>;

    /// Numbers of the backing objects of the striped object `oid` that exist
    async fn list(&self, oid: &str) -> StoreResult<Vec<u64>>;
}

#[derive(Debug, Clone, Copy)]
struct StripedMeta {
    layout: StripeLayout,
    size: u64,
}

/// Striped operations over an [`ObjectBackend`]
pub(crate) struct StripeEngine<B> {
    backend: Arc<B>,
    layout: StripeLayout,
    max_write_size: u64,
}

impl<B> Clone for StripeEngine<B> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            layout: self.layout,
            max_write_size: self.max_write_size,
        }
    }
}

impl<B: ObjectBackend> StripeEngine<B> {
    pub(crate) fn new(backend: Arc<B>, layout: StripeLayout, max_write_size: u64) -> Self {
        Self {
            backend,
            layout,
            max_write_size,
        }
    }

    async fn read_u64_xattr(&self, first: &str, name: &str) -> StoreResult<u64> {
        let raw = self.backend.getxattr(first, name).await.map_err(|e| match e {
            StoreError::NoData => StoreError::Other(format!("{} has no {}", first, name)),
            e => e,
        })?;

        std::str::from_utf8(&raw)
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| StoreError::Other(format!("malformed {} on {}", name, first)))
    }

    async fn load_meta(&self, oid: &str) -> StoreResult<StripedMeta> {
        let first = object_name(oid, 0);
        let size = self.read_u64_xattr(&first, SIZE_XATTR).await?;
        let layout = StripeLayout::new(
            self.read_u64_xattr(&first, STRIPE_UNIT_XATTR).await?,
            self.read_u64_xattr(&first, STRIPE_COUNT_XATTR).await?,
            self.read_u64_xattr(&first, OBJECT_SIZE_XATTR).await?,
        )
        .map_err(|e| StoreError::Other(format!("corrupt layout on {}: {}", first, e)))?;

        Ok(StripedMeta { layout, size })
    }

    async fn create_meta(&self, oid: &str) -> StoreResult<StripedMeta> {
        let first = object_name(oid, 0);
        debug!("Creating striped object {} with {:?}", oid, self.layout);

        for (name, value) in [
            (STRIPE_UNIT_XATTR, self.layout.stripe_unit),
            (STRIPE_COUNT_XATTR, self.layout.stripe_count),
            (OBJECT_SIZE_XATTR, self.layout.object_size),
            (SIZE_XATTR, 0),
        ] {
            self.backend
                .setxattr(&first, name, value.to_string().as_bytes())
                .await?;
        }

        Ok(StripedMeta {
            layout: self.layout,
            size: 0,
        })
    }

    async fn load_or_create(&self, oid: &str) -> StoreResult<StripedMeta> {
        match self.load_meta(oid).await {
            Err(StoreError::NotFound) => self.create_meta(oid).await,
            other => other,
        }
    }

    async fn set_size(&self, oid: &str, size: u64) -> StoreResult<()> {
        self.backend
            .setxattr(&object_name(oid, 0), SIZE_XATTR, size.to_string().as_bytes())
            .await
    }

    pub(crate) async fn write(&self, oid: &str, data: &[u8], offset: u64) -> StoreResult<()> {
        let len = data.len() as u64;
        if len > self.max_write_size {
            return Err(StoreError::TooLarge {
                size: len,
                limit: self.max_write_size,
            });
        }
        let end = offset.checked_add(len).ok_or_else(|| {
            StoreError::InvalidArgument(format!("write at {} overflows the object", offset))
        })?;

        let meta = self.load_or_create(oid).await?;
        for ext in meta.layout.extents(offset, len) {
            let start = ext.buffer_offset as usize;
            let stop = start + ext.length as usize;
            self.backend
                .write(&object_name(oid, ext.objectno), &data[start..stop], ext.offset)
                .await?;
        }

        self.set_size(oid, meta.size.max(end)).await
    }

    pub(crate) async fn read(&self, oid: &str, len: usize, offset: u64) -> StoreResult<StripedRead> {
        let meta = self.load_meta(oid).await?;
        if offset >= meta.size {
            return Ok(StripedRead {
                data: Bytes::new(),
                eof: true,
            });
        }

        let end = offset.saturating_add(len as u64).min(meta.size);
        let mut buf = vec![0u8; (end - offset) as usize];

        for ext in meta.layout.extents(offset, end - offset) {
            match self
                .backend
                .read(&object_name(oid, ext.objectno), ext.length as usize, ext.offset)
                .await
            {
                Ok(bytes) => {
                    let start = ext.buffer_offset as usize;
                    let n = bytes.len().min(ext.length as usize);
                    buf[start..start + n].copy_from_slice(&bytes[..n]);
                }
                // never written: reads as zeros
                Err(StoreError::NotFound) => {}
                Err(e) => return Err(e),
            }
        }

        Ok(StripedRead {
            data: Bytes::from(buf),
            eof: end >= meta.size,
        })
    }

    /// Existing backing objects of `oid`, highest number first
    ///
    /// A truncate that grows the object only records the new size, so the
    /// logical size says nothing about how many backing objects there are.
    async fn existing_objects(&self, oid: &str) -> StoreResult<Vec<u64>> {
        let mut objectnos = self.backend.list(oid).await?;
        objectnos.sort_unstable_by(|a, b| b.cmp(a));
        Ok(objectnos)
    }

    pub(crate) async fn remove(&self, oid: &str) -> StoreResult<()> {
        self.load_meta(oid).await?;

        // metadata object goes last so a failed remove can be retried
        for objectno in self.existing_objects(oid).await? {
            if objectno == 0 {
                continue;
            }
            match self.backend.remove(&object_name(oid, objectno)).await {
                Ok(()) | Err(StoreError::NotFound) => {}
                Err(e) => return Err(e),
            }
        }

        self.backend.remove(&object_name(oid, 0)).await
    }

    pub(crate) async fn truncate(&self, oid: &str, size: u64) -> StoreResult<()> {
        let meta = self.load_meta(oid).await?;

        if size < meta.size {
            for objectno in self.existing_objects(oid).await? {
                let piece = object_name(oid, objectno);
                let keep = meta.layout.object_len_below(objectno, size);

                if keep == 0 && objectno != 0 {
                    match self.backend.remove(&piece).await {
                        Ok(()) | Err(StoreError::NotFound) => {}
                        Err(e) => return Err(e),
                    }
                    continue;
                }

                match self.backend.stat(&piece).await {
                    Ok((current, _)) if current > keep => {
                        self.backend.truncate(&piece, keep).await?
                    }
                    Ok(_) | Err(StoreError::NotFound) => {}
                    Err(e) => return Err(e),
                }
            }
        }

        self.set_size(oid, size).await
    }

    pub(crate) async fn setxattr(&self, oid: &str, name: &str, value: &[u8]) -> StoreResult<()> {
        check_xattr_name(name)?;
        self.load_or_create(oid).await?;
        self.backend.setxattr(&object_name(oid, 0), name, value).await
    }

    pub(crate) async fn getxattr(&self, oid: &str, name: &str) -> StoreResult<Bytes> {
        check_xattr_name(name)?;
        self.load_meta(oid).await?;
        self.backend.getxattr(&object_name(oid, 0), name).await
    }

    pub(crate) async fn stat(&self, oid: &str) -> StoreResult<StatResult> {
        let meta = self.load_meta(oid).await?;
        let (_, mtime) = self.backend.stat(&object_name(oid, 0)).await?;
        Ok(StatResult {
            size: meta.size,
            mtime,
        })
    }
}

fn check_xattr_name(name: &str) -> StoreResult<()> {
    if name.is_empty() || name.starts_with(RESERVED_XATTR_PREFIX) {
        return Err(StoreError::InvalidArgument(format!(
            "xattr name {:?} is reserved or empty",
            name
        )));
    }
    Ok(())
}

/// Pool context handed out by the reference stores
pub(crate) struct NativePool<B> {
    name: String,
    engine: StripeEngine<B>,
    faults: Arc<FaultInjector>,
    counters: Arc<StoreCounters>,
    released: Arc<AtomicBool>,
}

impl<B: ObjectBackend> NativePool<B> {
    pub(crate) fn new(
        name: &str,
        engine: StripeEngine<B>,
        faults: Arc<FaultInjector>,
        counters: Arc<StoreCounters>,
    ) -> Self {
        counters.pool_opened();
        Self {
            name: name.to_string(),
            engine,
            faults,
            counters,
            released: Arc::new(AtomicBool::new(false)),
        }
    }

    fn ensure_open(&self) -> StoreResult<()> {
        if self.released.load(Ordering::SeqCst) {
            return Err(StoreError::Shutdown);
        }
        Ok(())
    }
}

#[async_trait]
impl<B: ObjectBackend> PoolContext for NativePool<B> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn create_striper(&self) -> StoreResult<Box<dyn Striper>> {
        self.ensure_open()?;
        self.faults.check(StoreOp::CreateStriper)?;

        self.counters.striper_created();
        Ok(Box::new(NativeStriper {
            engine: self.engine.clone(),
            faults: Arc::clone(&self.faults),
            counters: Arc::clone(&self.counters),
            pool_released: Arc::clone(&self.released),
            destroyed: AtomicBool::new(false),
        }))
    }

    async fn truncate(&self, oid: &str, size: u64) -> StoreResult<()> {
        self.ensure_open()?;
        self.faults.check(StoreOp::Truncate)?;
        self.engine.truncate(oid, size).await
    }

    fn release(&self) -> StoreResult<()> {
        self.faults.check(StoreOp::ReleasePool)?;
        if self.released.swap(true, Ordering::SeqCst) {
            return Err(StoreError::Shutdown);
        }
        self.counters.pool_released();
        Ok(())
    }
}

struct NativeStriper<B> {
    engine: StripeEngine<B>,
    faults: Arc<FaultInjector>,
    counters: Arc<StoreCounters>,
    pool_released: Arc<AtomicBool>,
    destroyed: AtomicBool,
}

impl<B> NativeStriper<B> {
    fn ensure_usable(&self) -> StoreResult<()> {
        if self.destroyed.load(Ordering::SeqCst) || self.pool_released.load(Ordering::SeqCst) {
            return Err(StoreError::Shutdown);
        }
        Ok(())
    }
}

#[async_trait]
impl<B: ObjectBackend> Striper for NativeStriper<B> {
    async fn write(&self, oid: &str, data: &[u8], offset: u64) -> StoreResult<usize> {
        self.ensure_usable()?;
        let accepted = match self.faults.take(StoreOp::Write) {
            Some(Fault::Fail(e)) => return Err(e),
            Some(Fault::Short(n)) => n.min(data.len()),
            None => data.len(),
        };

        self.engine.write(oid, &data[..accepted], offset).await?;
        Ok(accepted)
    }

    async fn read(&self, oid: &str, len: usize, offset: u64) -> StoreResult<StripedRead> {
        self.ensure_usable()?;
        self.faults.check(StoreOp::Read)?;
        self.engine.read(oid, len, offset).await
    }

    async fn remove(&self, oid: &str) -> StoreResult<()> {
        self.ensure_usable()?;
        self.faults.check(StoreOp::Remove)?;
        self.engine.remove(oid).await
    }

    async fn setxattr(&self, oid: &str, name: &str, value: &[u8]) -> StoreResult<()> {
        self.ensure_usable()?;
        self.faults.check(StoreOp::SetXattr)?;
        self.engine.setxattr(oid, name, value).await
    }

    async fn getxattr(&self, oid: &str, name: &str, capacity: usize) -> StoreResult<Bytes> {
        self.ensure_usable()?;
        self.faults.check(StoreOp::GetXattr)?;
        let value = self.engine.getxattr(oid, name).await?;
        if value.len() > capacity {
            return Err(StoreError::Range);
        }
        Ok(value)
    }

    async fn stat(&self, oid: &str) -> StoreResult<StatResult> {
        self.ensure_usable()?;
        self.faults.check(StoreOp::Stat)?;
        self.engine.stat(oid).await
    }

    fn destroy(&self) {
        if !self.destroyed.swap(true, Ordering::SeqCst) {
            self.counters.striper_destroyed();
        }
    }
}
