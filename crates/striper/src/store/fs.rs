//! Filesystem store
//!
//! ```text
//! <striper_data_dir>/
//!     keyring               optional; enables authentication
//!     <pool>/objects/<oid>  backing object data
//!     <pool>/xattrs/<oid>   backing object xattrs (JSON, base64 values)
//! ```
//!
//! Object names are percent-escaped so any name maps to a single file.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::UNIX_EPOCH;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, info};

use super::fault::{FaultInjector, StoreOp};
use super::layout::parse_object_name;
use super::native::{NativePool, ObjectBackend, StripeEngine};
use super::{
    PoolContext, Session, StoreBackend, StoreCounters, StoreError, StoreResult, StoreStats,
};
use crate::config::StriperOptions;
use crate::keyring::{self, Keyring};

const OBJECTS_DIR: &str = "objects";
const XATTRS_DIR: &str = "xattrs";
const STORE_KEYRING: &str = "keyring";

/// Escape an object name into a file name
fn escape_name(oid: &str) -> String {
    let mut out = String::with_capacity(oid.len());
    for (i, b) in oid.bytes().enumerate() {
        let plain = b.is_ascii_alphanumeric() || b == b'_' || b == b'-' || (b == b'.' && i > 0);
        if plain {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{:02X}", b));
        }
    }
    out
}

fn check_pool_name(pool: &str) -> StoreResult<()> {
    if pool.is_empty() || pool.starts_with('.') || pool.contains(['/', '\\']) || pool == STORE_KEYRING
    {
        return Err(StoreError::InvalidArgument(format!(
            "invalid pool name {:?}",
            pool
        )));
    }
    Ok(())
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct XattrFile {
    attrs: BTreeMap<String, String>,
}

struct FsBackend {
    root: PathBuf,
}

impl FsBackend {
    fn object_path(&self, oid: &str) -> PathBuf {
        self.root.join(OBJECTS_DIR).join(escape_name(oid))
    }

    fn xattr_path(&self, oid: &str) -> PathBuf {
        self.root.join(XATTRS_DIR).join(escape_name(oid))
    }

    async fn open_for_write(&self, oid: &str) -> StoreResult<fs::File> {
        Ok(fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(self.object_path(oid))
            .await?)
    }

    async fn load_xattrs(&self, oid: &str) -> StoreResult<XattrFile> {
        match fs::read(self.xattr_path(oid)).await {
            Ok(raw) => serde_json::from_slice(&raw)
                .map_err(|e| StoreError::Other(format!("corrupt xattrs of {}: {}", oid, e))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(XattrFile::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Write the sidecar through a temp file so readers never see half of it
    async fn store_xattrs(&self, oid: &str, xattrs: &XattrFile) -> StoreResult<()> {
        let path = self.xattr_path(oid);
        // escaped names never start with '.', so this cannot clash with a sidecar
        let tmp = self
            .root
            .join(XATTRS_DIR)
            .join(format!(".{}.tmp", escape_name(oid)));
        let raw = serde_json::to_vec(xattrs).map_err(|e| StoreError::Other(e.to_string()))?;

        let mut file = fs::File::create(&tmp).await?;
        file.write_all(&raw).await?;
        file.sync_all().await?;
        drop(file);

        fs::rename(&tmp, &path).await?;
        Ok(())
    }
}

fn mtime_secs(meta: &std::fs::Metadata) -> u64 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[async_trait]
impl ObjectBackend for FsBackend {
    async fn write(&self, oid: &str, data: &[u8], offset: u64) -> StoreResult<()> {
        let mut file = self.open_for_write(oid).await?;
        file.seek(std::io::SeekFrom::Start(offset)).await?;
        file.write_all(data).await?;
        file.flush().await?;
        Ok(())
    }

    async fn read(&self, oid: &str, len: usize, offset: u64) -> StoreResult<Bytes> {
        let mut file = fs::File::open(self.object_path(oid)).await?;
        file.seek(std::io::SeekFrom::Start(offset)).await?;

        let mut buf = Vec::with_capacity(len);
        file.take(len as u64).read_to_end(&mut buf).await?;
        Ok(Bytes::from(buf))
    }

    async fn truncate(&self, oid: &str, size: u64) -> StoreResult<()> {
        let file = self.open_for_write(oid).await?;
        file.set_len(size).await?;
        Ok(())
    }

    async fn remove(&self, oid: &str) -> StoreResult<()> {
        fs::remove_file(self.object_path(oid)).await?;
        match fs::remove_file(self.xattr_path(oid)).await {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }

    async fn setxattr(&self, oid: &str, name: &str, value: &[u8]) -> StoreResult<()> {
        self.open_for_write(oid).await?;

        let mut xattrs = self.load_xattrs(oid).await?;
        xattrs.attrs.insert(name.to_string(), STANDARD.encode(value));
        self.store_xattrs(oid, &xattrs).await
    }

    async fn getxattr(&self, oid: &str, name: &str) -> StoreResult<Bytes> {
        fs::metadata(self.object_path(oid)).await?;

        let xattrs = self.load_xattrs(oid).await?;
        let encoded = xattrs.attrs.get(name).ok_or(StoreError::NoData)?;
        STANDARD
            .decode(encoded)
            .map(Bytes::from)
            .map_err(|e| StoreError::Other(format!("corrupt xattr {} of {}: {}", name, oid, e)))
    }

    async fn stat(&self, oid: &str) -> StoreResult<(u64, u64)> {
        let data = fs::metadata(self.object_path(oid)).await?;
        let mut mtime = mtime_secs(&data);

        // xattr updates count as modifications
        if let Ok(xattrs) = fs::metadata(self.xattr_path(oid)).await {
            mtime = mtime.max(mtime_secs(&xattrs));
        }

        Ok((data.len(), mtime))
    }

    async fn list(&self, oid: &str) -> StoreResult<Vec<u64>> {
        // escaping keeps the '.' and hex digits of the suffix as they are
        let escaped = escape_name(oid);
        let mut entries = fs::read_dir(self.root.join(OBJECTS_DIR)).await?;

        let mut objectnos = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if let Some(objectno) = entry
                .file_name()
                .to_str()
                .and_then(|name| parse_object_name(&escaped, name))
            {
                objectnos.push(objectno);
            }
        }
        Ok(objectnos)
    }
}

/// Store keeping each pool in a directory under `striper_data_dir`
#[derive(Clone, Default)]
pub struct FsStore {
    faults: Arc<FaultInjector>,
    counters: Arc<StoreCounters>,
}

impl FsStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the directory tree of a pool
    pub async fn mkpool(data_dir: impl AsRef<Path>, pool: &str) -> StoreResult<()> {
        check_pool_name(pool)?;
        let root = data_dir.as_ref().join(pool);
        if fs::metadata(&root).await.is_ok() {
            return Err(StoreError::Exists);
        }

        fs::create_dir_all(root.join(OBJECTS_DIR)).await?;
        fs::create_dir_all(root.join(XATTRS_DIR)).await?;
        info!("Created pool {} in {}", pool, data_dir.as_ref().display());
        Ok(())
    }

    pub fn faults(&self) -> &FaultInjector {
        &self.faults
    }

    pub fn stats(&self) -> StoreStats {
        self.counters.snapshot()
    }
}

impl StoreBackend for FsStore {
    fn create_session(&self) -> StoreResult<Box<dyn Session>> {
        self.faults.check(StoreOp::CreateSession)?;
        self.counters.session_opened();

        Ok(Box::new(FsSession {
            store: self.clone(),
            data_dir: None,
            options: None,
            connected: false,
            shut_down: false,
        }))
    }
}

struct FsSession {
    store: FsStore,
    data_dir: Option<PathBuf>,
    options: Option<StriperOptions>,
    connected: bool,
    shut_down: bool,
}

#[async_trait]
impl Session for FsSession {
    fn apply_config(&mut self, options: &StriperOptions) -> StoreResult<()> {
        if self.shut_down {
            return Err(StoreError::Shutdown);
        }
        self.store.faults.check(StoreOp::ApplyConfig)?;

        if options.striper_data_dir.is_empty() {
            return Err(StoreError::InvalidArgument(
                "striper_data_dir is not set".to_string(),
            ));
        }
        self.data_dir = Some(PathBuf::from(&options.striper_data_dir));
        self.options = Some(options.clone());
        Ok(())
    }

    async fn connect(&mut self) -> StoreResult<()> {
        if self.shut_down {
            return Err(StoreError::Shutdown);
        }
        self.store.faults.check(StoreOp::Connect)?;

        let (Some(data_dir), Some(options)) = (&self.data_dir, &self.options) else {
            return Err(StoreError::InvalidArgument(
                "configuration has not been applied".to_string(),
            ));
        };

        if !fs::metadata(data_dir).await?.is_dir() {
            return Err(StoreError::InvalidArgument(format!(
                "{} is not a directory",
                data_dir.display()
            )));
        }

        let keyring_path = data_dir.join(STORE_KEYRING);
        let trusted = if fs::metadata(&keyring_path).await.is_ok() {
            let keyring = Keyring::from_file(&keyring_path).map_err(|e| {
                StoreError::Other(format!("store keyring {}: {}", keyring_path.display(), e))
            })?;
            Some(keyring)
        } else {
            None
        };
        keyring::authenticate(options, trusted.as_ref())?;

        self.connected = true;
        debug!("Connected to store at {}", data_dir.display());
        Ok(())
    }

    async fn open_pool(&self, pool: &str) -> StoreResult<Arc<dyn PoolContext>> {
        if self.shut_down {
            return Err(StoreError::Shutdown);
        }
        let (Some(data_dir), Some(options), true) = (&self.data_dir, &self.options, self.connected)
        else {
            return Err(StoreError::InvalidArgument(
                "session is not connected".to_string(),
            ));
        };
        self.store.faults.check(StoreOp::OpenPool)?;
        check_pool_name(pool)?;

        let root = data_dir.join(pool);
        if !fs::metadata(root.join(OBJECTS_DIR)).await?.is_dir() {
            return Err(StoreError::NotFound);
        }

        let layout = options
            .layout()
            .map_err(|e| StoreError::InvalidArgument(e.to_string()))?;

        Ok(Arc::new(NativePool::new(
            pool,
            StripeEngine::new(
                Arc::new(FsBackend { root }),
                layout,
                options.striper_max_write_size.0,
            ),
            Arc::clone(&self.store.faults),
            Arc::clone(&self.store.counters),
        )))
    }

    fn shutdown(&mut self) {
        if !self.shut_down {
            self.shut_down = true;
            self.connected = false;
            self.store.counters.session_closed();
        }
    }
}

impl Drop for FsSession {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_name() {
        assert_eq!(escape_name("obj.0000000000000000"), "obj.0000000000000000");
        assert_eq!(escape_name("a/b c"), "a%2Fb%20c");
        assert_eq!(escape_name(".hidden"), "%2Ehidden");
        assert_eq!(escape_name("ü"), "%C3%BC");
    }

    #[test]
    fn test_pool_names() {
        assert!(check_pool_name("data").is_ok());
        assert!(check_pool_name("").is_err());
        assert!(check_pool_name("../etc").is_err());
        assert!(check_pool_name("a/b").is_err());
        assert!(check_pool_name(STORE_KEYRING).is_err());
    }

    #[tokio::test]
    async fn test_backend_roundtrip() {
        let root = std::env::temp_dir().join(format!("striper-fs-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(root.join(OBJECTS_DIR)).unwrap();
        std::fs::create_dir_all(root.join(XATTRS_DIR)).unwrap();
        let backend = FsBackend { root: root.clone() };

        backend.write("dir/obj", b"world", 6).await.unwrap();
        backend.write("dir/obj", b"hello ", 0).await.unwrap();
        assert_eq!(&backend.read("dir/obj", 64, 0).await.unwrap()[..], b"hello world");
        assert_eq!(backend.read("other", 1, 0).await, Err(StoreError::NotFound));

        backend.setxattr("dir/obj", "user.a", b"\x00\xff").await.unwrap();
        assert_eq!(&backend.getxattr("dir/obj", "user.a").await.unwrap()[..], b"\x00\xff");
        assert_eq!(
            backend.getxattr("dir/obj", "user.b").await,
            Err(StoreError::NoData)
        );

        backend.truncate("dir/obj", 5).await.unwrap();
        assert_eq!(backend.stat("dir/obj").await.unwrap().0, 5);

        backend.remove("dir/obj").await.unwrap();
        assert_eq!(backend.remove("dir/obj").await, Err(StoreError::NotFound));
        assert_eq!(backend.stat("dir/obj").await, Err(StoreError::NotFound));

        std::fs::remove_dir_all(root).unwrap();
    }

    #[tokio::test]
    async fn test_backend_lists_escaped_objects() {
        let root = std::env::temp_dir().join(format!("striper-fs-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(root.join(OBJECTS_DIR)).unwrap();
        std::fs::create_dir_all(root.join(XATTRS_DIR)).unwrap();
        let backend = FsBackend { root: root.clone() };

        backend.write("a b.0000000000000000", b"x", 0).await.unwrap();
        backend.write("a b.0000000000000003", b"x", 0).await.unwrap();
        backend.write("a b", b"x", 0).await.unwrap();
        backend.write("a c.0000000000000001", b"x", 0).await.unwrap();

        let mut objectnos = backend.list("a b").await.unwrap();
        objectnos.sort_unstable();
        assert_eq!(objectnos, vec![0, 3]);
        assert!(backend.list("nothing").await.unwrap().is_empty());

        std::fs::remove_dir_all(root).unwrap();
    }
}
