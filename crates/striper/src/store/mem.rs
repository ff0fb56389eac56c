//! In-memory store
//!
//! Pools and their objects live in process memory and disappear with the
//! last clone of the [`MemStore`]. Every operation can be made to fail
//! through the store's [`FaultInjector`].

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::fault::{FaultInjector, StoreOp};
use super::layout::parse_object_name;
use super::native::{now_secs, NativePool, ObjectBackend, StripeEngine};
use super::{
    PoolContext, Session, StoreBackend, StoreCounters, StoreError, StoreResult, StoreStats,
};
use crate::config::StriperOptions;
use crate::keyring::{self, Keyring};

#[derive(Debug, Default)]
struct MemObject {
    data: Vec<u8>,
    xattrs: BTreeMap<String, Bytes>,
    mtime: u64,
}

impl MemObject {
    fn touch(&mut self) {
        self.mtime = now_secs();
    }
}

fn to_usize(value: u64) -> StoreResult<usize> {
    usize::try_from(value)
        .map_err(|_| StoreError::InvalidArgument(format!("offset {} out of range", value)))
}

#[derive(Debug, Default)]
struct MemBackend {
    objects: RwLock<HashMap<String, MemObject>>,
}

#[async_trait]
impl ObjectBackend for MemBackend {
    async fn write(&self, oid: &str, data: &[u8], offset: u64) -> StoreResult<()> {
        let start = to_usize(offset)?;
        let end = start + data.len();

        let mut objects = self.objects.write().await;
        let object = objects.entry(oid.to_string()).or_default();
        if object.data.len() < end {
            object.data.resize(end, 0);
        }
        object.data[start..end].copy_from_slice(data);
        object.touch();
        Ok(())
    }

    async fn read(&self, oid: &str, len: usize, offset: u64) -> StoreResult<Bytes> {
        let objects = self.objects.read().await;
        let object = objects.get(oid).ok_or(StoreError::NotFound)?;

        let start = to_usize(offset)?.min(object.data.len());
        let end = start.saturating_add(len).min(object.data.len());
        Ok(Bytes::copy_from_slice(&object.data[start..end]))
    }

    async fn truncate(&self, oid: &str, size: u64) -> StoreResult<()> {
        let size = to_usize(size)?;
        let mut objects = self.objects.write().await;
        let object = objects.entry(oid.to_string()).or_default();
        object.data.resize(size, 0);
        object.touch();
        Ok(())
    }

    async fn remove(&self, oid: &str) -> StoreResult<()> {
        self.objects
            .write()
            .await
            .remove(oid)
            .map(|_| ())
            .ok_or(StoreError::NotFound)
    }

    async fn setxattr(&self, oid: &str, name: &str, value: &[u8]) -> StoreResult<()> {
        let mut objects = self.objects.write().await;
        let object = objects.entry(oid.to_string()).or_default();
        object
            .xattrs
            .insert(name.to_string(), Bytes::copy_from_slice(value));
        object.touch();
        Ok(())
    }

    async fn getxattr(&self, oid: &str, name: &str) -> StoreResult<Bytes> {
        let objects = self.objects.read().await;
        let object = objects.get(oid).ok_or(StoreError::NotFound)?;
        object.xattrs.get(name).cloned().ok_or(StoreError::NoData)
    }

    async fn stat(&self, oid: &str) -> StoreResult<(u64, u64)> {
        let objects = self.objects.read().await;
        let object = objects.get(oid).ok_or(StoreError::NotFound)?;
        Ok((object.data.len() as u64, object.mtime))
    }

    async fn list(&self, oid: &str) -> StoreResult<Vec<u64>> {
        let objects = self.objects.read().await;
        Ok(objects
            .keys()
            .filter_map(|name| parse_object_name(oid, name))
            .collect())
    }
}

#[derive(Default)]
struct MemStoreInner {
    pools: RwLock<HashMap<String, Arc<MemBackend>>>,
    keyring: Option<Keyring>,
    faults: Arc<FaultInjector>,
    counters: Arc<StoreCounters>,
}

/// Store keeping its pools in memory
///
/// Clones share the same pools.
#[derive(Clone, Default)]
pub struct MemStore {
    inner: Arc<MemStoreInner>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that only admits the entities of `keyring`
    pub fn with_keyring(keyring: Keyring) -> Self {
        Self {
            inner: Arc::new(MemStoreInner {
                keyring: Some(keyring),
                ..MemStoreInner::default()
            }),
        }
    }

    pub async fn create_pool(&self, name: &str) -> StoreResult<()> {
        if name.is_empty() {
            return Err(StoreError::InvalidArgument("empty pool name".to_string()));
        }

        let mut pools = self.inner.pools.write().await;
        if pools.contains_key(name) {
            return Err(StoreError::Exists);
        }
        pools.insert(name.to_string(), Arc::default());
        info!("Created pool {}", name);
        Ok(())
    }

    /// Names of the backing objects in a pool, sorted
    pub async fn list_objects(&self, pool: &str) -> StoreResult<Vec<String>> {
        let backend = self
            .inner
            .pools
            .read()
            .await
            .get(pool)
            .cloned()
            .ok_or(StoreError::NotFound)?;

        let mut names: Vec<String> = backend.objects.read().await.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    pub fn faults(&self) -> &FaultInjector {
        &self.inner.faults
    }

    /// Outstanding sessions, pool contexts and stripers
    pub fn stats(&self) -> StoreStats {
        self.inner.counters.snapshot()
    }
}

impl StoreBackend for MemStore {
    fn create_session(&self) -> StoreResult<Box<dyn Session>> {
        self.inner.faults.check(StoreOp::CreateSession)?;
        self.inner.counters.session_opened();

        Ok(Box::new(MemSession {
            store: self.clone(),
            options: None,
            connected: false,
            shut_down: false,
        }))
    }
}

struct MemSession {
    store: MemStore,
    options: Option<StriperOptions>,
    connected: bool,
    shut_down: bool,
}

impl MemSession {
    fn ensure_live(&self) -> StoreResult<()> {
        if self.shut_down {
            return Err(StoreError::Shutdown);
        }
        Ok(())
    }
}

#[async_trait]
impl Session for MemSession {
    fn apply_config(&mut self, options: &StriperOptions) -> StoreResult<()> {
        self.ensure_live()?;
        self.store.inner.faults.check(StoreOp::ApplyConfig)?;
        self.options = Some(options.clone());
        Ok(())
    }

    async fn connect(&mut self) -> StoreResult<()> {
        self.ensure_live()?;
        self.store.inner.faults.check(StoreOp::Connect)?;

        let options = self.options.as_ref().ok_or_else(|| {
            StoreError::InvalidArgument("configuration has not been applied".to_string())
        })?;
        keyring::authenticate(options, self.store.inner.keyring.as_ref())?;

        self.connected = true;
        debug!("Session for {} connected", options.name);
        Ok(())
    }

    async fn open_pool(&self, pool: &str) -> StoreResult<Arc<dyn PoolContext>> {
        self.ensure_live()?;
        let options = match (&self.options, self.connected) {
            (Some(options), true) => options,
            _ => {
                return Err(StoreError::InvalidArgument(
                    "session is not connected".to_string(),
                ))
            }
        };
        self.store.inner.faults.check(StoreOp::OpenPool)?;

        let backend = self
            .store
            .inner
            .pools
            .read()
            .await
            .get(pool)
            .cloned()
            .ok_or(StoreError::NotFound)?;
        let layout = options
            .layout()
            .map_err(|e| StoreError::InvalidArgument(e.to_string()))?;

        Ok(Arc::new(NativePool::new(
            pool,
            StripeEngine::new(backend, layout, options.striper_max_write_size.0),
            Arc::clone(&self.store.inner.faults),
            Arc::clone(&self.store.inner.counters),
        )))
    }

    fn shutdown(&mut self) {
        if !self.shut_down {
            self.shut_down = true;
            self.connected = false;
            self.store.inner.counters.session_closed();
        }
    }
}

impl Drop for MemSession {
    fn drop(&mut self) {
        self.shutdown();
    }
}
