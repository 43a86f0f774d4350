use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{UnixListener, UnixStream};

use crate::error::{Error, Result};
use crate::transport::frame::{read_frame, write_frame};
use crate::transport::{ReadTransport, Transport, TransportConfig, WriteTransport};

/// Unix domain socket transport with length-prefix framing
pub struct UnixTransport {
    stream: UnixStream,
    config: TransportConfig,
}

impl UnixTransport {
    /// Connect to a Unix socket with no timeouts
    pub async fn connect(path: impl AsRef<Path>) -> Result<Self> {
        Self::connect_with(path, TransportConfig::default()).await
    }

    /// Connect with the given timeouts
    pub async fn connect_with(path: impl AsRef<Path>, config: TransportConfig) -> Result<Self> {
        let connect_op = UnixStream::connect(path.as_ref());

        let stream = if let Some(limit) = config.connect_timeout {
            tokio::time::timeout(limit, connect_op)
                .await
                .map_err(|_| Error::Timeout("connecting"))??
        } else {
            connect_op.await?
        };

        Ok(Self { stream, config })
    }

    /// Create from an already connected stream
    pub fn from_stream(stream: UnixStream) -> Self {
        Self {
            stream,
            config: TransportConfig::default(),
        }
    }
}

#[async_trait::async_trait]
impl Transport for UnixTransport {
    async fn send(&mut self, bytes: &[u8]) -> Result<()> {
        write_frame(&mut self.stream, bytes, self.config.send_timeout).await
    }

    async fn receive(&mut self) -> Result<Vec<u8>> {
        read_frame(&mut self.stream, self.config.receive_timeout).await
    }

    async fn close(&mut self) -> Result<()> {
        self.stream.shutdown().await?;
        Ok(())
    }

    fn into_split(self: Box<Self>) -> (Box<dyn ReadTransport>, Box<dyn WriteTransport>) {
        let config = self.config;
        let (read, write) = self.stream.into_split();
        (
            Box::new(UnixReadHalf { read, config }),
            Box::new(UnixWriteHalf { write, config }),
        )
    }
}

pub struct UnixReadHalf {
    read: OwnedReadHalf,
    config: TransportConfig,
}

#[async_trait::async_trait]
impl ReadTransport for UnixReadHalf {
    async fn receive(&mut self) -> Result<Vec<u8>> {
        read_frame(&mut self.read, self.config.receive_timeout).await
    }
}

pub struct UnixWriteHalf {
    write: OwnedWriteHalf,
    config: TransportConfig,
}

#[async_trait::async_trait]
impl WriteTransport for UnixWriteHalf {
    async fn send(&mut self, bytes: &[u8]) -> Result<()> {
        write_frame(&mut self.write, bytes, self.config.send_timeout).await
    }

    async fn close(&mut self) -> Result<()> {
        self.write.shutdown().await?;
        Ok(())
    }
}

/// Unix socket listener for accepting incoming connections
///
/// Removes the socket file when closed.
pub struct UnixAcceptor {
    listener: UnixListener,
    path: PathBuf,
}

impl UnixAcceptor {
    /// Bind to a socket path
    pub async fn bind(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let listener = UnixListener::bind(&path)?;
        Ok(Self { listener, path })
    }

    /// Accept an incoming connection
    pub async fn accept(&self) -> Result<UnixTransport> {
        let (stream, _) = self.listener.accept().await?;
        Ok(UnixTransport::from_stream(stream))
    }

    /// Close the listener and remove the socket file
    pub fn close(self) -> Result<()> {
        std::fs::remove_file(&self.path).map_err(Error::Io)
    }
}
