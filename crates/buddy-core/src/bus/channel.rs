use async_trait::async_trait;

use crate::bus::message::{decode, encode, BusMessage, Inbound};
use crate::error::BusError;

/// A bidirectional frame transport between caller and executor.
///
/// Implementations only move text frames; encoding lives in the provided
/// `send` and `receive`. `receive_frame` returning `None` means the peer
/// is gone and no further frames will arrive.
#[async_trait]
pub trait Channel: Send + Sync + 'static {
    async fn send_frame(&self, frame: String) -> Result<(), BusError>;

    async fn receive_frame(&self) -> Option<String>;

    async fn send(&self, message: &BusMessage) -> Result<(), BusError> {
        self.send_frame(encode(message)?).await
    }

    async fn receive(&self) -> Option<Inbound> {
        self.receive_frame().await.map(|frame| decode(&frame))
    }
}
