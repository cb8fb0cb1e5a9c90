//! In-process worker transport.

use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::bus::channel::Channel;
use crate::error::BusError;

/// One end of an in-process channel pair. Frames cross as owned strings,
/// so the two sides still share no state.
pub struct MemoryChannel {
    tx: Mutex<Option<mpsc::UnboundedSender<String>>>,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<String>>,
}

/// Two connected ends.
pub fn memory_pair() -> (MemoryChannel, MemoryChannel) {
    let (a_tx, a_rx) = mpsc::unbounded_channel();
    let (b_tx, b_rx) = mpsc::unbounded_channel();
    (
        MemoryChannel {
            tx: Mutex::new(Some(a_tx)),
            rx: tokio::sync::Mutex::new(b_rx),
        },
        MemoryChannel {
            tx: Mutex::new(Some(b_tx)),
            rx: tokio::sync::Mutex::new(a_rx),
        },
    )
}

impl MemoryChannel {
    /// Stop sending; the peer's `receive` ends once queued frames are read.
    pub fn close(&self) {
        self.tx.lock().unwrap_or_else(|e| e.into_inner()).take();
    }
}

#[async_trait]
impl Channel for MemoryChannel {
    async fn send_frame(&self, frame: String) -> Result<(), BusError> {
        let tx = self.tx.lock().unwrap_or_else(|e| e.into_inner());
        match tx.as_ref() {
            Some(tx) => tx.send(frame).map_err(|_| BusError::Closed),
            None => Err(BusError::Closed),
        }
    }

    async fn receive_frame(&self) -> Option<String> {
        self.rx.lock().await.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn frames_cross_in_both_directions() {
        let (a, b) = memory_pair();
        a.send_frame("ping".into()).await.unwrap();
        b.send_frame("pong".into()).await.unwrap();
        assert_eq!(b.receive_frame().await.as_deref(), Some("ping"));
        assert_eq!(a.receive_frame().await.as_deref(), Some("pong"));
    }

    #[tokio::test]
    async fn close_drains_then_ends() {
        let (a, b) = memory_pair();
        a.send_frame("last".into()).await.unwrap();
        a.close();
        assert_eq!(a.send_frame("late".into()).await, Err(BusError::Closed));
        assert_eq!(b.receive_frame().await.as_deref(), Some("last"));
        assert_eq!(b.receive_frame().await, None);
    }

    #[tokio::test]
    async fn dropped_peer_fails_send() {
        let (a, b) = memory_pair();
        drop(b);
        assert_eq!(a.send_frame("x".into()).await, Err(BusError::Closed));
        assert_eq!(a.receive_frame().await, None);
    }
}
