//! Caller side of the execution bus.
//!
//! A [`BusLink`] owns one channel. Each operation gets a fresh
//! [`CorrelationId`] and a pending entry holding a oneshot sender; a
//! background reader settles entries as responses arrive, in any order.
//! When the channel ends every still-pending operation fails with
//! [`BusError::Closed`] and later operations fail immediately.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::bus::channel::Channel;
use crate::bus::message::{BusMessage, CorrelationId, ExecutorArgs, Inbound};
use crate::bus::OperationLink;
use crate::error::BusError;
use crate::metrics::METRICS;
use crate::obs;
use crate::schema::{ExecutionResult, OperationRequest};

const EVENT_BUFFER: usize = 64;

/// Lifecycle of one in-flight operation.
///
/// `Created → Sent → Resolving → Completed | Failed`. An ack may overtake
/// the caller marking its own send, so `Created → Resolving` is allowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationState {
    Created,
    Sent,
    Resolving,
    Completed,
    Failed,
}

impl OperationState {
    pub fn is_terminal(self) -> bool {
        matches!(self, OperationState::Completed | OperationState::Failed)
    }

    pub fn can_advance_to(self, next: OperationState) -> bool {
        use OperationState::*;
        match (self, next) {
            (Created, Sent) | (Created, Resolving) | (Sent, Resolving) => true,
            (from, Completed | Failed) => !from.is_terminal(),
            _ => false,
        }
    }
}

/// Event forwarded from the executor
#[derive(Debug, Clone, PartialEq)]
pub struct BusEvent {
    pub topic: String,
    pub payload: Value,
}

enum Reply {
    Initialised,
    Result(ExecutionResult),
}

struct Pending {
    state: OperationState,
    reply: oneshot::Sender<Result<Reply, BusError>>,
}

struct Shared {
    pending: Mutex<HashMap<CorrelationId, Pending>>,
    closed: AtomicBool,
    events: broadcast::Sender<BusEvent>,
}

impl Shared {
    fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Shared {
            pending: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
            events,
        }
    }

    fn pending(&self) -> MutexGuard<'_, HashMap<CorrelationId, Pending>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// `closed` is only written under the pending lock, so nothing can be
    /// registered after the reader has drained the map.
    fn register(
        &self,
        id: CorrelationId,
        reply: oneshot::Sender<Result<Reply, BusError>>,
    ) -> Result<(), BusError> {
        let mut pending = self.pending();
        if self.closed.load(Ordering::Acquire) {
            return Err(BusError::Closed);
        }
        pending.insert(
            id,
            Pending {
                state: OperationState::Created,
                reply,
            },
        );
        Ok(())
    }

    fn advance(&self, id: &CorrelationId, next: OperationState) {
        let mut pending = self.pending();
        match pending.get_mut(id) {
            Some(entry) if entry.state.can_advance_to(next) => {
                debug!(correlation_id = %id, from = ?entry.state, to = ?next, "operation state");
                entry.state = next;
            }
            Some(_) => {}
            None => debug!(correlation_id = %id, to = ?next, "no pending operation"),
        }
    }

    fn settle(&self, id: &CorrelationId, outcome: Result<Reply, BusError>) {
        let Some(entry) = self.pending().remove(id) else {
            debug!(correlation_id = %id, "reply for unknown operation dropped");
            return;
        };
        let next = if outcome.is_ok() {
            OperationState::Completed
        } else {
            OperationState::Failed
        };
        debug!(correlation_id = %id, from = ?entry.state, to = ?next, "operation state");
        // The caller may have stopped waiting.
        let _ = entry.reply.send(outcome);
    }

    fn close(&self) {
        let drained: Vec<_> = {
            let mut pending = self.pending();
            self.closed.store(true, Ordering::Release);
            pending.drain().collect()
        };
        if !drained.is_empty() {
            warn!(pending = drained.len(), "bus channel closed with operations in flight");
        }
        for (_, entry) in drained {
            let _ = entry.reply.send(Err(BusError::Closed));
        }
    }

    fn in_flight(&self) -> Vec<(CorrelationId, OperationState)> {
        self.pending()
            .iter()
            .map(|(id, entry)| (id.clone(), entry.state))
            .collect()
    }
}

/// Removes the pending entry if the waiting future is dropped first.
struct PendingGuard<'a> {
    shared: &'a Shared,
    id: CorrelationId,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.shared.pending().remove(&self.id);
    }
}

pub struct BusLink<C: Channel> {
    channel: Arc<C>,
    shared: Arc<Shared>,
    reader: JoinHandle<()>,
}

impl<C: Channel> BusLink<C> {
    /// Start reading `channel` and perform the initialise handshake.
    pub async fn connect(channel: C, args: ExecutorArgs) -> Result<Self, BusError> {
        let channel = Arc::new(channel);
        let shared = Arc::new(Shared::new());
        let reader = tokio::spawn(read_loop(Arc::clone(&channel), Arc::clone(&shared)));
        let link = BusLink {
            channel,
            shared,
            reader,
        };

        match link
            .round_trip(|id| BusMessage::Initialise { id, args })
            .await?
        {
            Reply::Initialised => Ok(link),
            Reply::Result(_) => Err(BusError::Malformed(
                "response received for initialise".into(),
            )),
        }
    }

    pub async fn execute(&self, operation: OperationRequest) -> Result<ExecutionResult, BusError> {
        let id = CorrelationId::new();
        let started = Instant::now();
        obs::emit_operation_sent(id.as_str(), operation.operation_name.as_deref());

        let outcome = self
            .round_trip_with(id.clone(), |id| BusMessage::Request { id, operation })
            .await
            .and_then(|reply| match reply {
                Reply::Result(result) => Ok(result),
                Reply::Initialised => Err(BusError::Malformed(
                    "initialised received for request".into(),
                )),
            });

        match &outcome {
            Ok(result) => obs::emit_operation_completed(
                id.as_str(),
                started.elapsed().as_millis() as u64,
                result.errors.len(),
            ),
            Err(e) => {
                METRICS.inc_bus_failures();
                obs::emit_operation_failed(id.as_str(), e);
            }
        }
        outcome
    }

    /// Operations awaiting a reply, with their current state.
    pub fn in_flight(&self) -> Vec<(CorrelationId, OperationState)> {
        self.shared.in_flight()
    }

    /// Events forwarded by the executor from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<BusEvent> {
        self.shared.events.subscribe()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    async fn round_trip(
        &self,
        build: impl FnOnce(CorrelationId) -> BusMessage,
    ) -> Result<Reply, BusError> {
        self.round_trip_with(CorrelationId::new(), build).await
    }

    async fn round_trip_with(
        &self,
        id: CorrelationId,
        build: impl FnOnce(CorrelationId) -> BusMessage,
    ) -> Result<Reply, BusError> {
        let (tx, rx) = oneshot::channel();
        self.shared.register(id.clone(), tx)?;
        let _guard = PendingGuard {
            shared: &self.shared,
            id: id.clone(),
        };

        self.channel.send(&build(id.clone())).await?;
        self.shared.advance(&id, OperationState::Sent);

        rx.await.unwrap_or(Err(BusError::Closed))
    }
}

impl<C: Channel> Drop for BusLink<C> {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

#[async_trait]
impl<C: Channel> OperationLink for BusLink<C> {
    async fn execute(&self, request: OperationRequest) -> Result<ExecutionResult, BusError> {
        BusLink::execute(self, request).await
    }
}

async fn read_loop<C: Channel>(channel: Arc<C>, shared: Arc<Shared>) {
    while let Some(inbound) = channel.receive().await {
        match inbound {
            Inbound::Message(BusMessage::Ack { id }) => {
                shared.advance(&id, OperationState::Resolving)
            }
            Inbound::Message(BusMessage::Response { id, result }) => {
                shared.settle(&id, Ok(Reply::Result(result)))
            }
            Inbound::Message(BusMessage::Initialised { id }) => {
                shared.settle(&id, Ok(Reply::Initialised))
            }
            Inbound::Message(BusMessage::Failure { id, message }) => {
                shared.settle(&id, Err(BusError::Remote(message)))
            }
            Inbound::Message(BusMessage::Event { topic, payload }) => {
                // No subscribers is fine.
                let _ = shared.events.send(BusEvent { topic, payload });
            }
            Inbound::Message(other) => {
                warn!(kind = other.kind(), "unexpected message on caller side")
            }
            Inbound::Malformed {
                id: Some(id),
                reason,
            } => shared.settle(&id, Err(BusError::Malformed(reason))),
            Inbound::Malformed { id: None, reason } => {
                warn!(reason = %reason, "dropping malformed bus message")
            }
        }
    }
    debug!("bus reader finished");
    shared.close();
}
