//! Connection to a store bound to one pool

use cephconfig::CephConfig;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::StriperOptions;
use crate::error::{ConnectStage, Result, StriperError};
use crate::store::{PoolContext, Session, StoreBackend};

/// A session with a store and a pool context opened on it
///
/// Created once, shared by any number of [`StripedObject`]s, and closed once.
/// The pool context is released before the session, both on [`close`] and on
/// drop.
///
/// [`StripedObject`]: crate::StripedObject
/// [`close`]: Cluster::close
pub struct Cluster {
    session: Box<dyn Session>,
    pool: Arc<dyn PoolContext>,
    options: StriperOptions,
    closed: bool,
}

impl std::fmt::Debug for Cluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cluster")
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl Cluster {
    /// Connect using the ceph.conf at `conf_path` and bind to `pool`
    ///
    /// # Example
    ///
    /// ```no_run
    /// # use striper::{Cluster, StripedObject, store::FsStore};
    /// # async fn example() -> striper::Result<()> {
    /// let cluster = Cluster::connect(&FsStore::new(), "/etc/ceph/ceph.conf", "data").await?;
    ///
    /// let mut obj = StripedObject::new(&cluster, "backup.tar")?;
    /// obj.connect().await?;
    /// obj.write(b"hello").await?;
    /// obj.destroy();
    ///
    /// cluster.close()?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn connect(
        backend: &dyn StoreBackend,
        conf_path: impl AsRef<Path>,
        pool: &str,
    ) -> Result<Self> {
        let conf_path = conf_path.as_ref();
        info!("Connecting to pool {} using {}", pool, conf_path.display());

        let mut session = backend
            .create_session()
            .map_err(|e| StriperError::connect(ConnectStage::SessionCreate, e))?;

        let config = match CephConfig::from_file(conf_path) {
            Ok(config) => config,
            Err(e) => {
                session.shutdown();
                return Err(StriperError::connect(ConnectStage::ConfigLoad, e));
            }
        };

        Self::establish(session, &config, pool).await
    }

    /// Connect with an already parsed configuration and bind to `pool`
    pub async fn connect_with(
        backend: &dyn StoreBackend,
        config: &CephConfig,
        pool: &str,
    ) -> Result<Self> {
        info!("Connecting to pool {}", pool);

        let session = backend
            .create_session()
            .map_err(|e| StriperError::connect(ConnectStage::SessionCreate, e))?;

        Self::establish(session, config, pool).await
    }

    async fn establish(
        mut session: Box<dyn Session>,
        config: &CephConfig,
        pool: &str,
    ) -> Result<Self> {
        match Self::bind(session.as_mut(), config, pool).await {
            Ok((options, pool)) => {
                info!("Connected to pool {} as {}", pool.name(), options.name);
                Ok(Self {
                    session,
                    pool,
                    options,
                    closed: false,
                })
            }
            Err(e) => {
                // no partially connected state survives a failure
                session.shutdown();
                Err(e)
            }
        }
    }

    async fn bind(
        session: &mut dyn Session,
        config: &CephConfig,
        pool: &str,
    ) -> Result<(StriperOptions, Arc<dyn PoolContext>)> {
        let options = StriperOptions::load(config)
            .map_err(|e| StriperError::connect(ConnectStage::ConfigLoad, e))?;
        session
            .apply_config(&options)
            .map_err(|e| StriperError::connect(ConnectStage::ConfigLoad, e))?;
        debug!("Configuration applied for {}", options.name);

        session
            .connect()
            .await
            .map_err(|e| StriperError::connect(ConnectStage::Authenticate, e))?;

        let pool = session
            .open_pool(pool)
            .await
            .map_err(|e| StriperError::connect(ConnectStage::PoolBind, e))?;

        Ok((options, pool))
    }

    pub fn pool_name(&self) -> &str {
        self.pool.name()
    }

    /// Options loaded at connect time
    pub fn options(&self) -> &StriperOptions {
        &self.options
    }

    pub(crate) fn pool_context(&self) -> Arc<dyn PoolContext> {
        Arc::clone(&self.pool)
    }

    /// Release the pool context, then the session
    ///
    /// The session is shut down even if releasing the pool context fails.
    pub fn close(mut self) -> Result<()> {
        info!("Closing connection to pool {}", self.pool.name());
        self.closed = true;

        let released = self.pool.release();
        self.session.shutdown();
        released.map_err(StriperError::Close)
    }
}

impl Drop for Cluster {
    fn drop(&mut self) {
        if !self.closed {
            warn!(
                "Connection to pool {} dropped without close, releasing",
                self.pool.name()
            );
            if let Err(e) = self.pool.release() {
                warn!("Releasing pool {} failed: {}", self.pool.name(), e);
            }
            self.session.shutdown();
        }
    }
}
