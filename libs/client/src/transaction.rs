//! The transaction multiplexer.
//!
//! One physical channel carries every logical exchange of a transaction.
//! Each outgoing request gets a fresh correlation id; inbound messages are
//! routed back to whichever pending call or open iteration owns that id. The
//! send path serializes behind a writer lock so `execute` and `stream` may be
//! called from many tasks at once; the receive path runs in its own task.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, Mutex as AsyncMutex};
use tokio::task::JoinHandle;

use lattice_wire::codec::BincodeCodec;
use lattice_wire::{Channel, ChannelReader, ChannelWriter};

use crate::concept::remote::ConceptManager;
use crate::error::{Error, Result};
use crate::message::{
    ConceptRecord, Operation, Payload, PayloadKind, Request, Response, ResponseBody, StreamHint,
};
use crate::options::Options;
use crate::query::QueryManager;
use crate::stream::{DecodeFn, ItemStream};

/// Default number of items requested per iteration batch.
pub const DEFAULT_BATCH_SIZE: u32 = 50;

/// Most timed-out correlation ids are cleared when their late response
/// arrives; the rest are evicted oldest-first once this many accumulate.
pub const MAX_ABANDONED_CALLS: usize = 1024;

/// A logical transaction over one duplex channel.
///
/// Cheap to clone; all clones share the same channel and correlation tables.
#[derive(Clone)]
pub struct Transaction {
    shared: Arc<Shared>,
}

impl Transaction {
    /// Open a transaction over an established channel.
    pub fn open(channel: Channel<BincodeCodec>, options: Options) -> Self {
        let (writer, reader) = channel.split();
        let shared = Arc::new(Shared {
            writer: AsyncMutex::new(writer),
            registry: Mutex::new(Registry {
                closed: false,
                calls: HashMap::new(),
                iterations: HashMap::new(),
                abandoned: HashSet::new(),
                abandoned_order: VecDeque::new(),
            }),
            next_id: AtomicU64::new(0),
            batch_size: options.batch_size.unwrap_or(DEFAULT_BATCH_SIZE),
            reader_task: Mutex::new(None),
        });

        let task = tokio::spawn(read_loop(shared.clone(), reader));
        *shared.reader_task.lock().unwrap() = Some(task);

        Self { shared }
    }

    /// Typed concept lookup and creation.
    pub fn concepts(&self) -> ConceptManager<'_> {
        ConceptManager::new(self)
    }

    /// Query execution.
    pub fn query(&self) -> QueryManager<'_> {
        QueryManager::new(self)
    }

    /// Send a unary request and await its matching response.
    pub async fn execute(&self, operation: Operation) -> Result<Payload> {
        self.shared.execute(operation, None).await
    }

    /// Like [`execute`](Self::execute), racing the response against a
    /// deadline. On timeout the pending call is withdrawn; a response that
    /// arrives later matches no outstanding entry and is discarded.
    pub async fn execute_with_timeout(
        &self,
        operation: Operation,
        deadline: Duration,
    ) -> Result<Payload> {
        self.shared.execute(operation, Some(deadline)).await
    }

    /// Send a streaming request and return a pull-based handle over its
    /// paged results. Returns without awaiting any response.
    pub async fn stream<T, F>(&self, operation: Operation, decode: F) -> Result<ItemStream<T>>
    where
        F: Fn(ConceptRecord) -> Result<T> + Send + 'static,
    {
        self.shared.stream(operation, Box::new(decode)).await
    }

    /// Close the transaction. Every pending call and open iteration fails
    /// with `ChannelClosed`; nothing is left suspended. Idempotent, and the
    /// channel is released even when the read loop already failed the
    /// transaction.
    pub async fn close(&self) -> Result<()> {
        self.shared.fail_all(Error::ChannelClosed);
        if let Some(task) = self.shared.reader_task.lock().unwrap().take() {
            task.abort();
        }
        // Best effort; the peer may already be gone.
        let mut writer = self.shared.writer.lock().await;
        let _ = writer.close().await;
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.shared.registry.lock().unwrap().closed
    }

    /// Fail the whole transaction after a contract violation: the correlation
    /// table can no longer be trusted.
    pub(crate) fn fail(&self, error: Error) {
        self.shared.fail_all(error);
        if let Some(task) = self.shared.reader_task.lock().unwrap().take() {
            task.abort();
        }
    }
}

pub(crate) struct Shared {
    writer: AsyncMutex<ChannelWriter<BincodeCodec>>,
    registry: Mutex<Registry>,
    next_id: AtomicU64,
    batch_size: u32,
    reader_task: Mutex<Option<JoinHandle<()>>>,
}

struct Registry {
    closed: bool,
    calls: HashMap<u64, PendingCall>,
    iterations: HashMap<u64, mpsc::UnboundedSender<IterEvent>>,
    /// Correlation ids withdrawn by a timeout. Their one response, if it ever
    /// arrives, is discarded instead of failing the transaction.
    abandoned: HashSet<u64>,
    /// Withdrawal order, for evicting ids whose response never came.
    abandoned_order: VecDeque<u64>,
}

impl Registry {
    fn abandon(&mut self, id: u64) {
        // Cleared ids may linger in the order queue; pop until one eviction
        // actually shrinks the set.
        while self.abandoned.len() >= MAX_ABANDONED_CALLS {
            match self.abandoned_order.pop_front() {
                Some(old) => {
                    self.abandoned.remove(&old);
                }
                None => break,
            }
        }
        if self.abandoned.insert(id) {
            self.abandoned_order.push_back(id);
        }
    }
}

struct PendingCall {
    expected: PayloadKind,
    resolver: oneshot::Sender<Result<Payload>>,
}

/// What the read loop feeds an open iteration.
pub(crate) enum IterEvent {
    Batch(Vec<ConceptRecord>),
    Done,
    Failed(Error),
}

impl Shared {
    async fn execute(
        self: &Arc<Self>,
        operation: Operation,
        deadline: Option<Duration>,
    ) -> Result<Payload> {
        let expected = operation.expected_response().ok_or_else(|| {
            Error::InvalidHandle("streaming operation must go through stream()".to_string())
        })?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (resolver, resolution) = oneshot::channel();
        {
            let mut reg = self.registry.lock().unwrap();
            if reg.closed {
                return Err(Error::ChannelClosed);
            }
            reg.calls.insert(id, PendingCall { expected, resolver });
        }

        let request = Request {
            correlation_id: id,
            operation,
            streaming: None,
        };
        if let Err(e) = self.send(&request).await {
            self.registry.lock().unwrap().calls.remove(&id);
            return Err(e);
        }

        match deadline {
            None => resolution.await.unwrap_or(Err(Error::ChannelClosed)),
            Some(limit) => match tokio::time::timeout(limit, resolution).await {
                Ok(resolved) => resolved.unwrap_or(Err(Error::ChannelClosed)),
                Err(_) => {
                    let mut reg = self.registry.lock().unwrap();
                    if reg.calls.remove(&id).is_some() {
                        reg.abandon(id);
                    }
                    Err(Error::Timeout)
                }
            },
        }
    }

    async fn stream<T>(
        self: &Arc<Self>,
        operation: Operation,
        decode: DecodeFn<T>,
    ) -> Result<ItemStream<T>> {
        if !operation.is_streaming() {
            return Err(Error::InvalidHandle(
                "unary operation must go through execute()".to_string(),
            ));
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (feed, events) = mpsc::unbounded_channel();
        {
            let mut reg = self.registry.lock().unwrap();
            if reg.closed {
                return Err(Error::ChannelClosed);
            }
            reg.iterations.insert(id, feed);
        }

        let request = Request {
            correlation_id: id,
            operation,
            streaming: Some(StreamHint {
                batch_size: self.batch_size,
            }),
        };
        if let Err(e) = self.send(&request).await {
            self.registry.lock().unwrap().iterations.remove(&id);
            return Err(e);
        }

        Ok(ItemStream::new(
            self.clone(),
            id,
            self.batch_size,
            events,
            decode,
        ))
    }

    /// Ask the server for the next bounded batch of an open iteration.
    pub(crate) async fn send_continue(&self, id: u64, batch_size: u32) -> Result<()> {
        {
            let reg = self.registry.lock().unwrap();
            if reg.closed {
                return Err(Error::ChannelClosed);
            }
        }
        let request = Request {
            correlation_id: id,
            operation: Operation::Continue,
            streaming: Some(StreamHint { batch_size }),
        };
        self.send(&request).await
    }

    async fn send(&self, request: &Request) -> Result<()> {
        let mut writer = self.writer.lock().await;
        writer.send(request).await.map_err(Error::from)
    }

    pub(crate) fn deregister_iteration(&self, id: u64) {
        if let Ok(mut reg) = self.registry.lock() {
            reg.iterations.remove(&id);
        }
    }

    /// Fail every outstanding call and iteration and refuse further work.
    pub(crate) fn fail_all(&self, error: Error) {
        let mut reg = self.registry.lock().unwrap();
        reg.closed = true;
        for (_, call) in reg.calls.drain() {
            let _ = call.resolver.send(Err(error.clone()));
        }
        for (_, feed) in reg.iterations.drain() {
            let _ = feed.send(IterEvent::Failed(error.clone()));
        }
    }

    /// Route one inbound message. An error return means the transaction
    /// itself can no longer be trusted.
    fn dispatch(&self, response: Response) -> Result<()> {
        let mut reg = self.registry.lock().unwrap();
        let id = response.correlation_id;

        if let Some(call) = reg.calls.remove(&id) {
            let outcome = match response.body {
                ResponseBody::Ok(payload) => {
                    if payload.kind() == call.expected {
                        Ok(payload)
                    } else {
                        Err(Error::ProtocolViolation(format!(
                            "call {id} expected {:?} response, got {:?}",
                            call.expected,
                            payload.kind()
                        )))
                    }
                }
                ResponseBody::Error(message) => Err(Error::Server(message)),
                ResponseBody::Batch(_) | ResponseBody::Done => Err(Error::ProtocolViolation(
                    format!("stream response for unary call {id}"),
                )),
            };
            return match outcome {
                Err(Error::ProtocolViolation(msg)) => {
                    let violation = Error::ProtocolViolation(msg);
                    let _ = call.resolver.send(Err(violation.clone()));
                    Err(violation)
                }
                other => {
                    let _ = call.resolver.send(other);
                    Ok(())
                }
            };
        }

        if let Some(feed) = reg.iterations.get(&id).cloned() {
            let event = match response.body {
                ResponseBody::Batch(items) => IterEvent::Batch(items),
                ResponseBody::Done => IterEvent::Done,
                ResponseBody::Error(message) => IterEvent::Failed(Error::Server(message)),
                ResponseBody::Ok(_) => {
                    let violation = Error::ProtocolViolation(format!(
                        "unary response for open iteration {id}"
                    ));
                    let _ = feed.send(IterEvent::Failed(violation.clone()));
                    reg.iterations.remove(&id);
                    return Err(violation);
                }
            };
            let terminal = matches!(event, IterEvent::Done | IterEvent::Failed(_));
            let _ = feed.send(event);
            if terminal {
                reg.iterations.remove(&id);
            }
            return Ok(());
        }

        if reg.abandoned.remove(&id) {
            tracing::debug!(correlation_id = id, "discarding response for timed-out call");
            return Ok(());
        }

        tracing::warn!(
            correlation_id = id,
            "response matches no outstanding call or iteration"
        );
        Err(Error::ProtocolViolation(format!(
            "unmatched correlation id {id}"
        )))
    }
}

async fn read_loop(shared: Arc<Shared>, mut reader: ChannelReader<BincodeCodec>) {
    loop {
        let response: Response = match reader.receive().await {
            Ok(response) => response,
            Err(e) => {
                let error = Error::from(e);
                if error == Error::ChannelClosed {
                    tracing::debug!("transaction channel closed");
                } else {
                    tracing::error!(%error, "transaction channel failed");
                }
                shared.fail_all(error);
                return;
            }
        };
        if let Err(violation) = shared.dispatch(response) {
            shared.fail_all(violation);
            return;
        }
    }
}
