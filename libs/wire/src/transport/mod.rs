use std::time::Duration;

use crate::error::Result;

pub mod frame;
pub mod tcp;
pub mod unix;

pub use self::frame::MAX_FRAME_LEN;
pub use self::tcp::{TcpAcceptor, TcpTransport};
pub use self::unix::{UnixAcceptor, UnixTransport};

/// Transport trait for sending and receiving framed byte messages
///
/// Each transport instance represents a single connection.
#[async_trait::async_trait]
pub trait Transport: Send {
    /// Send one message over the transport
    async fn send(&mut self, bytes: &[u8]) -> Result<()>;

    /// Receive the next message from the transport
    async fn receive(&mut self) -> Result<Vec<u8>>;

    /// Close the transport connection
    async fn close(&mut self) -> Result<()>;

    /// Split into independently owned read and write halves, so one task can
    /// receive while another sends on the same connection.
    fn into_split(self: Box<Self>) -> (Box<dyn ReadTransport>, Box<dyn WriteTransport>);
}

/// Receiving half of a split transport
#[async_trait::async_trait]
pub trait ReadTransport: Send {
    async fn receive(&mut self) -> Result<Vec<u8>>;
}

/// Sending half of a split transport
#[async_trait::async_trait]
pub trait WriteTransport: Send {
    async fn send(&mut self, bytes: &[u8]) -> Result<()>;

    /// Shut down the write direction of the connection
    async fn close(&mut self) -> Result<()>;
}

/// Optional timeouts applied to a transport's operations
#[derive(Debug, Clone, Copy, Default)]
pub struct TransportConfig {
    pub connect_timeout: Option<Duration>,
    pub send_timeout: Option<Duration>,
    pub receive_timeout: Option<Duration>,
}

impl TransportConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    pub fn send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = Some(timeout);
        self
    }

    pub fn receive_timeout(mut self, timeout: Duration) -> Self {
        self.receive_timeout = Some(timeout);
        self
    }
}
