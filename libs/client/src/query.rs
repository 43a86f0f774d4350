//! Query execution over a transaction.
//!
//! Query strings are composed by the caller; this layer only carries them to
//! the server and decodes what comes back.

use crate::concept::codec::decode_concept;
use crate::concept::Concept;
use crate::error::{Error, Result};
use crate::message::{Operation, Payload};
use crate::options::Options;
use crate::stream::ItemStream;
use crate::transaction::Transaction;

pub struct QueryManager<'a> {
    transaction: &'a Transaction,
}

impl<'a> QueryManager<'a> {
    pub(crate) fn new(transaction: &'a Transaction) -> Self {
        Self { transaction }
    }

    pub async fn define(&self, query: &str, options: Options) -> Result<()> {
        self.run(Operation::QueryDefine {
            query: query.to_string(),
            options,
        })
        .await
    }

    pub async fn undefine(&self, query: &str, options: Options) -> Result<()> {
        self.run(Operation::QueryUndefine {
            query: query.to_string(),
            options,
        })
        .await
    }

    pub async fn delete(&self, query: &str, options: Options) -> Result<()> {
        self.run(Operation::QueryDelete {
            query: query.to_string(),
            options,
        })
        .await
    }

    /// Insert and stream the inserted concepts back.
    pub async fn insert(&self, query: &str, options: Options) -> Result<ItemStream<Concept>> {
        self.transaction
            .stream(
                Operation::QueryInsert {
                    query: query.to_string(),
                    options,
                },
                decode_concept,
            )
            .await
    }

    async fn run(&self, operation: Operation) -> Result<()> {
        match self.transaction.execute(operation).await? {
            Payload::Unit => Ok(()),
            other => Err(Error::ProtocolViolation(format!(
                "expected unit payload, got {:?}",
                other.kind()
            ))),
        }
    }
}
