//! Pull-based iteration over a paged server-side result stream.

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::message::ConceptRecord;
use crate::transaction::{IterEvent, Shared};

pub(crate) type DecodeFn<T> = Box<dyn Fn(ConceptRecord) -> Result<T> + Send>;

/// A lazy, forward-only sequence of decoded items.
///
/// Batching is invisible: pulling drains the local buffer, and when it
/// empties the handle transparently issues a bounded continuation request on
/// the same correlation id. Exhaustion is a clean `Ok(None)`; a transaction
/// closing mid-flight surfaces as `ChannelClosed`, so "done" and
/// "interrupted" stay distinguishable. Not restartable.
pub struct ItemStream<T> {
    shared: Arc<Shared>,
    correlation_id: u64,
    batch_size: u32,
    events: mpsc::UnboundedReceiver<IterEvent>,
    decode: DecodeFn<T>,
    buffer: VecDeque<ConceptRecord>,
    /// The initial request (or a sent continuation) has a reply in flight.
    awaiting_reply: bool,
    state: StreamState,
}

enum StreamState {
    Active,
    Exhausted,
    Failed(Error),
}

impl<T> ItemStream<T> {
    pub(crate) fn new(
        shared: Arc<Shared>,
        correlation_id: u64,
        batch_size: u32,
        events: mpsc::UnboundedReceiver<IterEvent>,
        decode: DecodeFn<T>,
    ) -> Self {
        Self {
            shared,
            correlation_id,
            batch_size,
            events,
            decode,
            buffer: VecDeque::new(),
            awaiting_reply: true,
            state: StreamState::Active,
        }
    }

    /// Pull the next item. Suspends only while the buffer is empty and the
    /// iteration is not exhausted.
    pub async fn next(&mut self) -> Result<Option<T>> {
        loop {
            if let Some(record) = self.buffer.pop_front() {
                return match (self.decode)(record) {
                    Ok(item) => Ok(Some(item)),
                    Err(e) => {
                        // A garbled item means the framing can't be trusted.
                        if let Error::ProtocolViolation(_) = &e {
                            self.shared.fail_all(e.clone());
                        }
                        self.state = StreamState::Failed(e.clone());
                        Err(e)
                    }
                };
            }

            match &self.state {
                StreamState::Exhausted => return Ok(None),
                StreamState::Failed(e) => return Err(e.clone()),
                StreamState::Active => {}
            }

            if !self.awaiting_reply {
                // Pick up a terminal event that arrived unsolicited (e.g.
                // close) before issuing a continuation.
                match self.events.try_recv() {
                    Ok(event) => {
                        self.apply(event);
                        continue;
                    }
                    Err(mpsc::error::TryRecvError::Empty) => {}
                    Err(mpsc::error::TryRecvError::Disconnected) => {
                        self.state = StreamState::Failed(Error::ChannelClosed);
                        continue;
                    }
                }
                if let Err(e) = self
                    .shared
                    .send_continue(self.correlation_id, self.batch_size)
                    .await
                {
                    self.state = StreamState::Failed(e.clone());
                    return Err(e);
                }
                self.awaiting_reply = true;
            }

            match self.events.recv().await {
                Some(event) => {
                    self.awaiting_reply = false;
                    self.apply(event);
                }
                None => {
                    self.awaiting_reply = false;
                    self.state = StreamState::Failed(Error::ChannelClosed);
                }
            }
        }
    }

    /// Drain the remaining items. "Fetch all" is client-side repeated
    /// continuation, never one unbounded request.
    pub async fn collect_all(mut self) -> Result<Vec<T>> {
        let mut items = Vec::new();
        while let Some(item) = self.next().await? {
            items.push(item);
        }
        Ok(items)
    }

    fn apply(&mut self, event: IterEvent) {
        match event {
            IterEvent::Batch(items) => self.buffer.extend(items),
            IterEvent::Done => self.state = StreamState::Exhausted,
            IterEvent::Failed(e) => self.state = StreamState::Failed(e),
        }
    }
}

impl<T> Drop for ItemStream<T> {
    fn drop(&mut self) {
        // An abandoned iteration must not linger in the correlation table.
        self.shared.deregister_iteration(self.correlation_id);
    }
}
