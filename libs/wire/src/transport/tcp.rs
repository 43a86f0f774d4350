use std::net::SocketAddr;

use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};

use crate::error::{Error, Result};
use crate::transport::frame::{read_frame, write_frame};
use crate::transport::{ReadTransport, Transport, TransportConfig, WriteTransport};

/// TCP transport with length-prefix framing
pub struct TcpTransport {
    stream: TcpStream,
    config: TransportConfig,
}

impl TcpTransport {
    /// Connect to a remote TCP address with no timeouts
    pub async fn connect(addr: SocketAddr) -> Result<Self> {
        Self::connect_with(addr, TransportConfig::default()).await
    }

    /// Connect with the given timeouts
    pub async fn connect_with(addr: SocketAddr, config: TransportConfig) -> Result<Self> {
        let connect_op = TcpStream::connect(addr);

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
    pub fn from_stream(stream: TcpStream) -> Self {
        Self {
            stream,
            config: TransportConfig::default(),
        }
    }

    pub fn peer_addr(&self) -> Result<SocketAddr> {
        self.stream.peer_addr().map_err(Into::into)
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.stream.local_addr().map_err(Into::into)
    }
}

#[async_trait::async_trait]
impl Transport for TcpTransport {
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
            Box::new(TcpReadHalf { read, config }),
            Box::new(TcpWriteHalf { write, config }),
        )
    }
}

pub struct TcpReadHalf {
    read: OwnedReadHalf,
    config: TransportConfig,
}

#[async_trait::async_trait]
impl ReadTransport for TcpReadHalf {
    async fn receive(&mut self) -> Result<Vec<u8>> {
        read_frame(&mut self.read, self.config.receive_timeout).await
    }
}

pub struct TcpWriteHalf {
    write: OwnedWriteHalf,
    config: TransportConfig,
}

#[async_trait::async_trait]
impl WriteTransport for TcpWriteHalf {
    async fn send(&mut self, bytes: &[u8]) -> Result<()> {
        write_frame(&mut self.write, bytes, self.config.send_timeout).await
    }

    async fn close(&mut self) -> Result<()> {
        self.write.shutdown().await?;
        Ok(())
    }
}

/// TCP listener for accepting incoming connections
pub struct TcpAcceptor {
    listener: TcpListener,
}

impl TcpAcceptor {
    /// Bind to a local address
    pub async fn bind(addr: SocketAddr) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener })
    }

    /// Accept an incoming connection
    pub async fn accept(&self) -> Result<(TcpTransport, SocketAddr)> {
        let (stream, addr) = self.listener.accept().await?;
        Ok((TcpTransport::from_stream(stream), addr))
    }

    /// Get the local address this acceptor is bound to
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener.local_addr().map_err(Into::into)
    }
}
