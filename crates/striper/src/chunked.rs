//! Write strategies
//!
//! The native strategy hands the whole buffer to the store in one request.
//! The chunked strategy splits it into fixed-size pieces written in order,
//! which keeps each request under a store's per-op limit at the cost of
//! several round-trips.

use tracing::debug;

use crate::error::{Result, StriperError};
use crate::store::Striper;

/// How [`StripedObject`](crate::StripedObject) issues writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteStrategy {
    /// One store request per write
    #[default]
    Native,
    /// Sequential requests of at most `chunk_size` bytes
    Chunked { chunk_size: usize },
}

impl WriteStrategy {
    /// Chunked writes with the chunk size from the client options
    pub fn chunked(chunk_size: u64) -> Self {
        WriteStrategy::Chunked {
            chunk_size: usize::try_from(chunk_size).unwrap_or(usize::MAX).max(1),
        }
    }
}

/// Write `data` at `offset` in chunks of `chunk_size` bytes
///
/// Stops at the first chunk the store does not fully accept. The error
/// reports how many bytes landed before it.
pub(crate) async fn write_chunked(
    striper: &dyn Striper,
    oid: &str,
    data: &[u8],
    offset: u64,
    chunk_size: usize,
) -> Result<usize> {
    let chunk_size = chunk_size.max(1);
    let mut done = 0usize;

    for chunk in data.chunks(chunk_size) {
        let at = offset + done as u64;
        let written = striper
            .write(oid, chunk, at)
            .await
            .map_err(|source| StriperError::Write {
                oid: oid.to_string(),
                offset,
                len: data.len(),
                accepted: done,
                source,
            })?;

        done += written;
        if written != chunk.len() {
            return Err(StriperError::ShortWrite {
                oid: oid.to_string(),
                offset,
                requested: data.len(),
                written: done,
            });
        }
    }

    debug!(
        "Chunked write of {} bytes to {} at {} done in {} requests",
        data.len(),
        oid,
        offset,
        data.len().div_ceil(chunk_size)
    );
    Ok(done)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{StatResult, StoreError, StoreResult, StripedRead};
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::sync::Mutex;

    /// Records every write and fails the write at `fail_at`, if set
    #[derive(Default)]
    struct RecordingStriper {
        writes: Mutex<Vec<(u64, usize)>>,
        fail_at: Option<usize>,
        short_at: Option<usize>,
    }

    #[async_trait]
    impl Striper for RecordingStriper {
        async fn write(&self, _oid: &str, data: &[u8], offset: u64) -> StoreResult<usize> {
            let mut writes = self.writes.lock().unwrap();
            let index = writes.len();
            if self.fail_at == Some(index) {
                return Err(StoreError::Io("injected".into()));
            }
            writes.push((offset, data.len()));
            if self.short_at == Some(index) {
                return Ok(data.len() / 2);
            }
            Ok(data.len())
        }

        async fn read(&self, _oid: &str, _len: usize, _offset: u64) -> StoreResult<StripedRead> {
            unimplemented!()
        }

        async fn remove(&self, _oid: &str) -> StoreResult<()> {
            unimplemented!()
        }

        async fn setxattr(&self, _oid: &str, _name: &str, _value: &[u8]) -> StoreResult<()> {
            unimplemented!()
        }

        async fn getxattr(&self, _oid: &str, _name: &str, _capacity: usize) -> StoreResult<Bytes> {
            unimplemented!()
        }

        async fn stat(&self, _oid: &str) -> StoreResult<StatResult> {
            unimplemented!()
        }

        fn destroy(&self) {}
    }

    #[tokio::test]
    async fn test_chunks_are_written_in_order() {
        let striper = RecordingStriper::default();
        let data = vec![7u8; 10];

        let n = write_chunked(&striper, "obj", &data, 100, 4).await.unwrap();
        assert_eq!(n, 10);
        assert_eq!(
            *striper.writes.lock().unwrap(),
            vec![(100, 4), (104, 4), (108, 2)]
        );
    }

    #[tokio::test]
    async fn test_failure_reports_accepted_bytes() {
        let striper = RecordingStriper {
            fail_at: Some(2),
            ..Default::default()
        };
        let data = vec![1u8; 12];

        let err = write_chunked(&striper, "obj", &data, 0, 4).await.unwrap_err();
        match err {
            StriperError::Write { accepted, len, .. } => {
                assert_eq!(accepted, 8);
                assert_eq!(len, 12);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_short_chunk_stops_the_write() {
        let striper = RecordingStriper {
            short_at: Some(1),
            ..Default::default()
        };
        let data = vec![1u8; 12];

        let err = write_chunked(&striper, "obj", &data, 0, 4).await.unwrap_err();
        assert!(matches!(
            err,
            StriperError::ShortWrite {
                requested: 12,
                written: 6,
                ..
            }
        ));
        assert_eq!(striper.writes.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_chunked_constructor_never_yields_zero() {
        assert_eq!(WriteStrategy::chunked(0), WriteStrategy::Chunked { chunk_size: 1 });
        assert_eq!(WriteStrategy::default(), WriteStrategy::Native);
    }
}
