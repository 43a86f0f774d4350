//! Lattice Client - transaction-stream layer of the database driver
//!
//! Opens a logical transaction over one duplex channel, multiplexes many
//! concurrent request/response exchanges and paged iterations onto it, and
//! reconstructs typed concepts from wire records.
//!
//! # Example
//!
//! ```no_run
//! use lattice_client::{Options, Transaction};
//! use lattice_wire::{codec::BincodeCodec, Channel};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let addr = "127.0.0.1:1729".parse()?;
//! let channel = Channel::tcp(addr, BincodeCodec).await?;
//! let transaction = Transaction::open(channel, Options::new());
//!
//! let person = transaction.concepts().put_entity_type("person").await?;
//! let alice = person.bind(&transaction).create_instance().await?;
//!
//! let mut attributes = alice.bind(&transaction).attributes(false).await?;
//! while let Some(attribute) = attributes.next().await? {
//!     println!("{}", attribute.id());
//! }
//!
//! transaction.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod concept;
pub mod error;
pub mod message;
pub mod options;
pub mod query;
pub mod stream;
pub mod transaction;

// Re-exports for convenience
pub use concept::{BoundConcept, Concept, ConceptManager, Value, ValueKind};
pub use error::{Error, Result};
pub use options::Options;
pub use query::QueryManager;
pub use stream::ItemStream;
pub use transaction::{Transaction, DEFAULT_BATCH_SIZE, MAX_ABANDONED_CALLS};
