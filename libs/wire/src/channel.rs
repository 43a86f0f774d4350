use std::net::SocketAddr;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::codec::Codec;
use crate::error::Result;
use crate::transport::{ReadTransport, TcpTransport, Transport, TransportConfig, UnixTransport, WriteTransport};

/// High-level channel for bidirectional communication
///
/// Combines a transport and codec for persistent connections
pub struct Channel<C> {
    transport: Box<dyn Transport>,
    codec: C,
}

impl<C: Codec + Clone> Channel<C> {
    /// Create a channel from an existing transport
    pub fn from_transport(transport: impl Transport + 'static, codec: C) -> Self {
        Self {
            transport: Box::new(transport),
            codec,
        }
    }

    /// Open a TCP channel
    pub async fn tcp(addr: SocketAddr, codec: C) -> Result<Self> {
        let transport = TcpTransport::connect(addr).await?;
        Ok(Self::from_transport(transport, codec))
    }

    /// Open a TCP channel with transport timeouts
    pub async fn tcp_with(addr: SocketAddr, config: TransportConfig, codec: C) -> Result<Self> {
        let transport = TcpTransport::connect_with(addr, config).await?;
        Ok(Self::from_transport(transport, codec))
    }

    /// Open a Unix socket channel
    pub async fn unix(path: impl AsRef<Path>, codec: C) -> Result<Self> {
        let transport = UnixTransport::connect(path).await?;
        Ok(Self::from_transport(transport, codec))
    }

    /// Send a message over the channel
    pub async fn send<T: Serialize>(&mut self, message: &T) -> Result<()> {
        let bytes = self.codec.encode(message)?;
        self.transport.send(&bytes).await
    }

    /// Receive a message from the channel
    pub async fn receive<T: for<'de> Deserialize<'de>>(&mut self) -> Result<T> {
        let bytes = self.transport.receive().await?;
        self.codec.decode(&bytes)
    }

    /// Close the channel
    pub async fn close(mut self) -> Result<()> {
        self.transport.close().await
    }

    /// Split into independently owned writer and reader halves, so one task
    /// can receive while another sends.
    pub fn split(self) -> (ChannelWriter<C>, ChannelReader<C>) {
        let (read, write) = self.transport.into_split();
        (
            ChannelWriter {
                transport: write,
                codec: self.codec.clone(),
            },
            ChannelReader {
                transport: read,
                codec: self.codec,
            },
        )
    }
}

/// Sending half of a split channel
pub struct ChannelWriter<C> {
    transport: Box<dyn WriteTransport>,
    codec: C,
}

impl<C: Codec> ChannelWriter<C> {
    pub async fn send<T: Serialize>(&mut self, message: &T) -> Result<()> {
        let bytes = self.codec.encode(message)?;
        self.transport.send(&bytes).await
    }

    /// Shut down the write direction of the connection
    pub async fn close(&mut self) -> Result<()> {
        self.transport.close().await
    }
}

/// Receiving half of a split channel
pub struct ChannelReader<C> {
    transport: Box<dyn ReadTransport>,
    codec: C,
}

impl<C: Codec> ChannelReader<C> {
    pub async fn receive<T: for<'de> Deserialize<'de>>(&mut self) -> Result<T> {
        let bytes = self.transport.receive().await?;
        self.codec.decode(&bytes)
    }
}
