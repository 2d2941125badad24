//! In-memory transports for testing.
//!
//! Used by the test suite to wire a host and a device together, or to let a
//! test play one side of the link by hand.

use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::sync::mpsc;

use crate::transport;
use crate::transport::Transport;

/// A duplex channel transport using tokio mpsc channels.
///
/// Frames sent via send() appear on the peer's recv() and vice versa.
pub struct DuplexChannelTransport {
    tx: mpsc::UnboundedSender<Vec<u8>>,
    rx: Arc<Mutex<mpsc::UnboundedReceiver<Vec<u8>>>>,
}

impl DuplexChannelTransport {
    /// Creates a new transport from separate tx and rx channels.
    pub fn new(
        tx: mpsc::UnboundedSender<Vec<u8>>,
        rx: mpsc::UnboundedReceiver<Vec<u8>>,
    ) -> Self {
        Self {
            tx,
            rx: Arc::new(Mutex::new(rx)),
        }
    }

    /// Creates a pair of transports connected to each other.
    ///
    /// Frames sent on `a` are received by `b` and vice versa.
    pub fn pair() -> (Self, Self) {
        let (tx_a, rx_a) = mpsc::unbounded_channel();
        let (tx_b, rx_b) = mpsc::unbounded_channel();
        (Self::new(tx_a, rx_b), Self::new(tx_b, rx_a))
    }

    /// Takes a frame that has already arrived, without waiting.
    ///
    /// Returns `None` when nothing is queued, or while a pump holds the receiver.
    pub fn try_recv(&self) -> Option<Vec<u8>> {
        let mut rx = self.rx.try_lock().ok()?;
        rx.try_recv().ok()
    }
}

#[async_trait::async_trait]
impl Transport for DuplexChannelTransport {
    async fn send(&self, frame: &[u8]) -> transport::Result<()> {
        self.tx
            .send(frame.to_vec())
            .map_err(|_| transport::Error::ConnectionLost("Channel closed".into()))
    }

    async fn recv(&self) -> transport::Result<Option<Vec<u8>>> {
        let mut rx = self.rx.lock().await;
        Ok(rx.recv().await)
    }
}

/// A transport whose sends always fail and which never delivers anything.
pub struct BrokenTransport;

#[async_trait::async_trait]
impl Transport for BrokenTransport {
    async fn send(&self, _frame: &[u8]) -> transport::Result<()> {
        Err(transport::Error::Io("link is down".into()))
    }

    async fn recv(&self) -> transport::Result<Option<Vec<u8>>> {
        std::future::pending().await
    }
}
