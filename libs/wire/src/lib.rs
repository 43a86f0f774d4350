//! Lattice Wire - framed transport and codec layer
//!
//! Provides transport abstractions (TCP, Unix sockets) with length-prefix
//! framing, bincode codec support, and a duplex [`Channel`] that can be split
//! into independently owned reader and writer halves.
//!
//! # Example
//!
//! ```no_run
//! use lattice_wire::{Channel, codec::BincodeCodec};
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Serialize, Deserialize)]
//! struct Ping { seq: u32 }
//!
//! #[derive(Serialize, Deserialize)]
//! struct Pong { seq: u32 }
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let addr = "127.0.0.1:8080".parse()?;
//! let mut channel = Channel::tcp(addr, BincodeCodec).await?;
//! channel.send(&Ping { seq: 1 }).await?;
//! let pong: Pong = channel.receive().await?;
//!
//! // Or split for concurrent reading and writing
//! let channel = Channel::tcp(addr, BincodeCodec).await?;
//! let (mut writer, mut reader) = channel.split();
//! # Ok(())
//! # }
//! ```

pub mod channel;
pub mod codec;
pub mod error;
pub mod transport;

// Re-exports for convenience
pub use channel::{Channel, ChannelReader, ChannelWriter};
pub use error::{Error, Result};
