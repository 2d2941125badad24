//! # Transport Abstraction
//!
//! A minimal, async interface for moving frames between host and device.
//!
//! ## Philosophy
//!
//! - **Frame-Oriented**: A transport moves whole frames. It knows nothing about
//!   packet kinds, lambdas or caching. Where one frame ends and the next begins
//!   is the transport's business; what a frame means is not.
//! - **Duplex**: Both sides send whenever they like. Requests and replies are
//!   correlated above this layer, never here.

use std::fmt;

/// Errors that occur at the link layer.
#[derive(Debug, Clone)]
pub enum Error {
    /// The peer is unreachable or the link was dropped.
    ConnectionLost(String),
    /// The frame does not fit the transport's framing.
    PayloadTooLarge,
    /// Generic I/O error or internal transport failure.
    Io(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionLost(msg) => write!(f, "Connection lost: {}", msg),
            Self::PayloadTooLarge => write!(f, "Payload too large for transport"),
            Self::Io(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::UnexpectedEof => Self::ConnectionLost(e.to_string()),
            _ => Self::Io(e.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// A bidirectional frame pipe.
///
/// This trait is designed to be object-safe (`Arc<dyn Transport>`).
#[async_trait::async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Sends one complete frame.
    async fn send(&self, frame: &[u8]) -> Result<()>;

    /// Waits for the next complete frame.
    ///
    /// Returns `Ok(None)` once the link is closed cleanly.
    async fn recv(&self) -> Result<Option<Vec<u8>>>;
}
