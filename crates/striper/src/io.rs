//! Streaming between local readers/writers and striped objects

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::error::Result;
use crate::object::StripedObject;

/// Stream everything from `reader` into `obj` at its write cursor
///
/// Each block read from `reader` becomes one [`StripedObject::write`].
/// Returns the number of bytes written.
pub async fn copy_in<R>(obj: &mut StripedObject, reader: &mut R, block_size: usize) -> Result<u64>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut buf = vec![0u8; block_size.max(1)];
    let mut total = 0u64;

    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        total += obj.write(&buf[..n]).await? as u64;
    }

    debug!("Copied {} bytes into {}", total, obj.name());
    Ok(total)
}

/// Stream `obj` from its read cursor into `writer` until the end of data
///
/// Returns the number of bytes copied.
pub async fn copy_out<W>(obj: &mut StripedObject, writer: &mut W, block_size: usize) -> Result<u64>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut buf = vec![0u8; block_size.max(1)];
    let mut total = 0u64;

    loop {
        let (n, end_of_data) = obj.read(&mut buf).await?;
        writer.write_all(&buf[..n]).await?;
        total += n as u64;
        if end_of_data {
            break;
        }
    }
    writer.flush().await?;

    debug!("Copied {} bytes out of {}", total, obj.name());
    Ok(total)
}
