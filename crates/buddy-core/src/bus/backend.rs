//! Executor side of the execution bus.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use buddy_firmware::StoreEvent;
use futures::FutureExt;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn, Instrument};

use crate::bus::channel::Channel;
use crate::bus::message::{BusMessage, ExecutorArgs, Inbound};
use crate::metrics::METRICS;
use crate::obs;
use crate::schema::SchemaExecutor;

/// Builds the executor from the first initialise message's arguments.
pub type ExecutorFactory =
    Box<dyn Fn(&ExecutorArgs) -> anyhow::Result<SchemaExecutor> + Send + Sync>;

/// Serves operations arriving on one channel.
///
/// Requests are acknowledged immediately and resolved concurrently; each
/// response goes out as soon as its operation finishes. Malformed frames
/// are answered with a failure when they carry an id and never stop the
/// loop.
pub struct BusBackend<C: Channel> {
    channel: Arc<C>,
    factory: ExecutorFactory,
    executor: Option<SchemaExecutor>,
    requests: Vec<JoinHandle<()>>,
    forwarder: Option<JoinHandle<()>>,
}

impl<C: Channel> BusBackend<C> {
    pub fn new<F>(channel: C, factory: F) -> Self
    where
        F: Fn(&ExecutorArgs) -> anyhow::Result<SchemaExecutor> + Send + Sync + 'static,
    {
        BusBackend {
            channel: Arc::new(channel),
            factory: Box::new(factory),
            executor: None,
            requests: Vec::new(),
            forwarder: None,
        }
    }

    /// Build the executor now. Later calls, and later initialise messages,
    /// keep the first one.
    pub fn initialise(&mut self, args: &ExecutorArgs) -> anyhow::Result<()> {
        if self.executor.is_some() {
            debug!(?args, "executor already initialised");
            return Ok(());
        }
        let executor = (self.factory)(args)?;
        info!(mocked = args.mocked, "executor initialised");
        self.forwarder = Some(self.forward_events(&executor));
        self.executor = Some(executor);
        Ok(())
    }

    pub fn is_initialised(&self) -> bool {
        self.executor.is_some()
    }

    /// Serve until the channel ends, then let in-flight requests finish.
    pub async fn listen(mut self) {
        while let Some(inbound) = self.channel.receive().await {
            self.dispatch(inbound).await;
        }
        debug!(in_flight = self.requests.len(), "bus channel ended");
        for request in self.requests.drain(..) {
            if let Err(e) = request.await {
                warn!(error = %e, "request task failed");
            }
        }
    }

    async fn dispatch(&mut self, inbound: Inbound) {
        self.requests.retain(|task| !task.is_finished());

        match inbound {
            Inbound::Message(BusMessage::Initialise { id, args }) => {
                let reply = match self.initialise(&args) {
                    Ok(()) => BusMessage::Initialised { id },
                    Err(e) => {
                        warn!(error = %e, "executor initialisation failed");
                        BusMessage::Failure {
                            id,
                            message: format!("{e:#}"),
                        }
                    }
                };
                self.reply(&reply).await;
            }
            Inbound::Message(BusMessage::Request { id, operation }) => {
                let Some(executor) = self.executor.clone() else {
                    self.reply(&BusMessage::Failure {
                        id,
                        message: "executor not initialised".into(),
                    })
                    .await;
                    return;
                };
                {
                    let _span = obs::OperationSpan::enter(id.as_str());
                    debug!(operation = operation.operation_name.as_deref().unwrap_or(""), "request received");
                }
                self.reply(&BusMessage::Ack { id: id.clone() }).await;

                let channel = Arc::clone(&self.channel);
                let span = obs::operation_span(id.as_str());
                self.requests.push(tokio::spawn(
                    async move {
                        let reply = match AssertUnwindSafe(executor.execute(operation))
                            .catch_unwind()
                            .await
                        {
                            Ok(result) => BusMessage::Response { id, result },
                            Err(payload) => {
                                let message = panic_message(payload.as_ref());
                                warn!(reason = %message, "operation panicked");
                                METRICS.inc_bus_failures();
                                BusMessage::Failure {
                                    id,
                                    message: format!("operation panicked: {message}"),
                                }
                            }
                        };
                        if let Err(e) = channel.send(&reply).await {
                            warn!(kind = reply.kind(), error = %e, "failed to send response");
                        }
                    }
                    .instrument(span),
                ));
            }
            Inbound::Malformed {
                id: Some(id),
                reason,
            } => {
                warn!(correlation_id = %id, reason = %reason, "malformed request");
                self.reply(&BusMessage::Failure { id, message: reason })
                    .await;
            }
            Inbound::Malformed { id: None, reason } => {
                warn!(reason = %reason, "dropping malformed bus message");
            }
            Inbound::Message(other) => {
                warn!(kind = other.kind(), "unexpected message on executor side");
            }
        }
    }

    async fn reply(&self, message: &BusMessage) {
        if let Err(e) = self.channel.send(message).await {
            warn!(kind = message.kind(), error = %e, "failed to send reply");
        }
    }

    /// Store events become `event` frames. The store outlives any one
    /// channel, so the forwarder is aborted with the backend.
    fn forward_events(&self, executor: &SchemaExecutor) -> JoinHandle<()> {
        let mut events = executor.context().firmware().subscribe();
        let channel = Arc::clone(&self.channel);
        tokio::spawn(async move {
            loop {
                let event = match events.recv().await {
                    Ok(event) => event,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "store events dropped");
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                };
                if let StoreEvent::BundleReady { url, targets } = &event {
                    obs::emit_bundle_downloaded(url, *targets);
                    METRICS.inc_bundle_downloads();
                }
                let payload = match serde_json::to_value(&event) {
                    Ok(payload) => payload,
                    Err(e) => {
                        warn!(error = %e, "unserializable store event");
                        continue;
                    }
                };
                let message = BusMessage::Event {
                    topic: event.topic().to_string(),
                    payload,
                };
                if channel.send(&message).await.is_err() {
                    break;
                }
            }
        })
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

impl<C: Channel> Drop for BusBackend<C> {
    fn drop(&mut self) {
        if let Some(forwarder) = self.forwarder.take() {
            forwarder.abort();
        }
        for request in &self.requests {
            request.abort();
        }
    }
}
