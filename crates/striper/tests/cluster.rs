//! Connection lifecycle against the in-memory store

use cephconfig::CephConfig;
use std::path::PathBuf;
use striper::store::{MemStore, StoreOp, StoreStats};
use striper::{Cluster, ConnectStage, Keyring, StoreError, StripedObject, StriperError};

const POOL: &str = "data";

const ADMIN_KEY: &str = "AQD8J8JoSpspNhAAU49nK6K8fO4MgTYFnrk+HQ==";
const OTHER_KEY: &str = "AQABCDEFghijklmnU49nK6K8fO4MgTYFnrk+HQ==";

fn no_auth() -> CephConfig {
    CephConfig::parse("[global]\nauth client required = none\n").unwrap()
}

async fn store_with_pool() -> MemStore {
    tracing_subscriber::fmt().with_test_writer().try_init().ok();

    let store = MemStore::new();
    store.create_pool(POOL).await.unwrap();
    store
}

fn temp_file(prefix: &str, content: &str) -> PathBuf {
    let path = std::env::temp_dir().join(format!("{}-{}", prefix, uuid::Uuid::new_v4()));
    std::fs::write(&path, content).unwrap();
    path
}

fn admin_keyring(key: &str) -> String {
    format!("[client.admin]\n    key = {}\n    caps osd = \"allow *\"\n", key)
}

fn connect_stage(result: striper::Result<Cluster>) -> ConnectStage {
    match result {
        Ok(_) => panic!("connect unexpectedly succeeded"),
        Err(e) => e
            .connect_stage()
            .unwrap_or_else(|| panic!("not a connect error: {e}")),
    }
}

#[tokio::test]
async fn test_connect_and_close_release_everything() {
    let store = store_with_pool().await;

    let cluster = Cluster::connect_with(&store, &no_auth(), POOL).await.unwrap();
    assert_eq!(cluster.pool_name(), POOL);
    assert_eq!(cluster.options().name, "client.admin");
    assert_eq!(
        store.stats(),
        StoreStats {
            sessions: 1,
            pools: 1,
            stripers: 0
        }
    );

    cluster.close().unwrap();
    assert_eq!(store.stats(), StoreStats::default());
}

#[tokio::test]
async fn test_drop_without_close_releases_everything() {
    let store = store_with_pool().await;
    {
        let _cluster = Cluster::connect_with(&store, &no_auth(), POOL).await.unwrap();
        assert_eq!(store.stats().sessions, 1);
    }
    assert_eq!(store.stats(), StoreStats::default());
}

#[tokio::test]
async fn test_many_objects_share_one_cluster() {
    let store = store_with_pool().await;
    let cluster = Cluster::connect_with(&store, &no_auth(), POOL).await.unwrap();

    let mut objects = Vec::new();
    for i in 0..5 {
        let mut obj = StripedObject::new(&cluster, format!("obj-{}", i)).unwrap();
        obj.connect().await.unwrap();
        objects.push(obj);
    }
    assert_eq!(store.stats().stripers, 5);
    assert_eq!(store.stats().pools, 1);

    for obj in &mut objects {
        obj.destroy();
    }
    assert_eq!(store.stats().stripers, 0);
    cluster.close().unwrap();
}

#[tokio::test]
async fn test_session_create_failure() {
    let store = store_with_pool().await;
    store
        .faults()
        .fail_next(StoreOp::CreateSession, StoreError::Io("no resources".into()));

    let stage = connect_stage(Cluster::connect_with(&store, &no_auth(), POOL).await);
    assert_eq!(stage, ConnectStage::SessionCreate);
    assert_eq!(store.stats(), StoreStats::default());
}

#[tokio::test]
async fn test_missing_config_file() {
    let store = store_with_pool().await;
    let missing = std::env::temp_dir().join(format!("missing-{}.conf", uuid::Uuid::new_v4()));

    let err = Cluster::connect(&store, &missing, POOL).await.unwrap_err();
    assert_eq!(err.connect_stage(), Some(ConnectStage::ConfigLoad));
    assert_eq!(store.stats(), StoreStats::default());
}

#[tokio::test]
async fn test_config_file_is_read() {
    let store = store_with_pool().await;
    let conf = temp_file(
        "striper-conf",
        "[global]\nauth client required = none\n\n[client]\nrados striper stripe unit = 64K\n",
    );

    let cluster = Cluster::connect(&store, &conf, POOL).await.unwrap();
    assert_eq!(cluster.options().rados_striper_stripe_unit.0, 64 << 10);
    cluster.close().unwrap();
    std::fs::remove_file(conf).unwrap();
}

#[tokio::test]
async fn test_invalid_layout_fails_config_load() {
    let store = store_with_pool().await;
    let config = CephConfig::parse(
        "[global]\nauth client required = none\nrados striper stripe unit = 4\nrados striper object size = 6\n",
    )
    .unwrap();

    let stage = connect_stage(Cluster::connect_with(&store, &config, POOL).await);
    assert_eq!(stage, ConnectStage::ConfigLoad);
    assert_eq!(store.stats(), StoreStats::default());
}

#[tokio::test]
async fn test_config_rejected_by_store() {
    let store = store_with_pool().await;
    store.faults().fail_next(
        StoreOp::ApplyConfig,
        StoreError::InvalidArgument("unknown option".into()),
    );

    let stage = connect_stage(Cluster::connect_with(&store, &no_auth(), POOL).await);
    assert_eq!(stage, ConnectStage::ConfigLoad);
}

#[tokio::test]
async fn test_authenticate_failure() {
    let store = store_with_pool().await;
    store.faults().fail_next(
        StoreOp::Connect,
        StoreError::PermissionDenied("bad ticket".into()),
    );

    let err = Cluster::connect_with(&store, &no_auth(), POOL)
        .await
        .unwrap_err();
    assert_eq!(err.connect_stage(), Some(ConnectStage::Authenticate));
    assert!(matches!(
        err.store_error(),
        Some(StoreError::PermissionDenied(_))
    ));
    assert_eq!(store.stats(), StoreStats::default());
}

#[tokio::test]
async fn test_pool_bind_failure() {
    let store = store_with_pool().await;

    let err = Cluster::connect_with(&store, &no_auth(), "no-such-pool")
        .await
        .unwrap_err();
    assert_eq!(err.connect_stage(), Some(ConnectStage::PoolBind));
    assert_eq!(err.store_error(), Some(&StoreError::NotFound));
    assert_eq!(store.stats(), StoreStats::default());
}

#[tokio::test]
async fn test_cephx_with_matching_key() {
    let keyring = Keyring::from_string(&admin_keyring(ADMIN_KEY)).unwrap();
    let store = MemStore::with_keyring(keyring);
    store.create_pool(POOL).await.unwrap();

    let client_keyring = temp_file("striper-keyring", &admin_keyring(ADMIN_KEY));
    let mut config = CephConfig::default();
    config.set("global", "keyring", client_keyring.display().to_string());

    let cluster = Cluster::connect_with(&store, &config, POOL).await.unwrap();
    cluster.close().unwrap();
    std::fs::remove_file(client_keyring).unwrap();
}

#[tokio::test]
async fn test_cephx_with_wrong_key() {
    let keyring = Keyring::from_string(&admin_keyring(ADMIN_KEY)).unwrap();
    let store = MemStore::with_keyring(keyring);
    store.create_pool(POOL).await.unwrap();

    let client_keyring = temp_file("striper-keyring", &admin_keyring(OTHER_KEY));
    let mut config = CephConfig::default();
    config.set("global", "keyring", client_keyring.display().to_string());

    let stage = connect_stage(Cluster::connect_with(&store, &config, POOL).await);
    assert_eq!(stage, ConnectStage::Authenticate);
    assert_eq!(store.stats(), StoreStats::default());
    std::fs::remove_file(client_keyring).unwrap();
}

#[tokio::test]
async fn test_cephx_without_keyring_file() {
    let store = store_with_pool().await;
    let mut config = CephConfig::default();
    config.set(
        "global",
        "keyring",
        format!("/nonexistent/{}.keyring", uuid::Uuid::new_v4()),
    );

    let stage = connect_stage(Cluster::connect_with(&store, &config, POOL).await);
    assert_eq!(stage, ConnectStage::Authenticate);
}

#[tokio::test]
async fn test_close_shuts_session_down_even_if_release_fails() {
    let store = store_with_pool().await;
    let cluster = Cluster::connect_with(&store, &no_auth(), POOL).await.unwrap();

    store
        .faults()
        .fail_next(StoreOp::ReleasePool, StoreError::Io("lost".into()));
    let err = cluster.close().unwrap_err();
    assert!(matches!(err, StriperError::Close(StoreError::Io(_))));
    assert_eq!(store.stats().sessions, 0);
}

#[tokio::test]
async fn test_objects_fail_after_close() {
    let store = store_with_pool().await;
    let cluster = Cluster::connect_with(&store, &no_auth(), POOL).await.unwrap();

    let mut obj = StripedObject::new(&cluster, "orphan").unwrap();
    obj.connect().await.unwrap();
    cluster.close().unwrap();

    let err = obj.write(b"late").await.unwrap_err();
    assert_eq!(err.store_error(), Some(&StoreError::Shutdown));
    assert_eq!(obj.write_cursor(), 0);

    obj.destroy();
    assert_eq!(store.stats(), StoreStats::default());
}
