use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Error, Result};

/// Largest frame a peer may send. Anything bigger is rejected before
/// allocation.
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// Write one length-prefixed frame (4-byte big-endian length, then payload).
pub(crate) async fn write_frame<W>(
    stream: &mut W,
    bytes: &[u8],
    timeout: Option<Duration>,
) -> Result<()>
where
    W: AsyncWrite + Unpin + Send,
{
    if bytes.len() > MAX_FRAME_LEN {
        return Err(Error::InvalidFrame(format!(
            "frame too large: {} bytes",
            bytes.len()
        )));
    }

    let op = async {
        stream.write_u32(bytes.len() as u32).await?;
        stream.write_all(bytes).await?;
        stream.flush().await?;
        Ok::<(), Error>(())
    };

    match timeout {
        Some(limit) => tokio::time::timeout(limit, op)
            .await
            .map_err(|_| Error::Timeout("sending frame"))?,
        None => op.await,
    }
}

/// Read one length-prefixed frame. EOF maps to `ConnectionClosed` so callers
/// can tell a clean shutdown from a broken stream.
pub(crate) async fn read_frame<R>(stream: &mut R, timeout: Option<Duration>) -> Result<Vec<u8>>
where
    R: AsyncRead + Unpin + Send,
{
    let op = async {
        let len = stream.read_u32().await.map_err(eof_as_closed)? as usize;

        if len > MAX_FRAME_LEN {
            return Err(Error::InvalidFrame(format!("frame too large: {} bytes", len)));
        }

        let mut buf = vec![0u8; len];
        stream.read_exact(&mut buf).await.map_err(eof_as_closed)?;
        Ok::<Vec<u8>, Error>(buf)
    };

    match timeout {
        Some(limit) => tokio::time::timeout(limit, op)
            .await
            .map_err(|_| Error::Timeout("receiving frame"))?,
        None => op.await,
    }
}

fn eof_as_closed(e: std::io::Error) -> Error {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        Error::ConnectionClosed
    } else {
        e.into()
    }
}
