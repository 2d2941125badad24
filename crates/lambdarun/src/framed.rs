//! # Length-Prefixed Framing
//!
//! Carries frames over any byte stream (a serial port, a pipe, a socket).
//!
//! Wire format:
//! ```text
//! ┌────────────┬──────────────────────┐
//! │ Length (4B)│ Packet (N B)         │
//! │ BE u32     │                      │
//! └────────────┴──────────────────────┘
//! ```
//!
//! ## Invariants
//! - A zero-length frame or a frame larger than `MAX_FRAME_SIZE` is a link error.
//! - A stream that ends between frames is a clean close; one that ends inside
//!   a frame is a lost connection.
//! - After a link error the stream is no longer on a frame boundary. The pump
//!   stops reading and the endpoint reports itself unlinked.

use tokio::io::AsyncRead;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWrite;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use lambdapack::MAX_PACKET_SIZE;

use crate::transport;
use crate::transport::Transport;

/// Largest frame the framing will carry.
pub const MAX_FRAME_SIZE: usize = MAX_PACKET_SIZE;

/// Frame header size (4-byte big-endian length).
const HEADER_SIZE: usize = 4;

type Reader = Box<dyn AsyncRead + Send + Unpin>;
type Writer = Box<dyn AsyncWrite + Send + Unpin>;

/// A transport over a pair of byte stream halves.
pub struct FramedTransport {
    reader: Mutex<Reader>,
    writer: Mutex<Writer>,
}

impl FramedTransport {
    pub fn new<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            reader: Mutex::new(Box::new(reader)),
            writer: Mutex::new(Box::new(writer)),
        }
    }

    /// Splits a single duplex stream into its halves.
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        Self::new(reader, writer)
    }
}

/// Prepends the length header to a frame.
pub fn encode_frame(frame: &[u8]) -> transport::Result<Vec<u8>> {
    if frame.is_empty() {
        return Err(transport::Error::Io("refusing to send an empty frame".into()));
    }
    if frame.len() > MAX_FRAME_SIZE {
        return Err(transport::Error::PayloadTooLarge);
    }

    let mut out = Vec::with_capacity(HEADER_SIZE + frame.len());
    out.extend_from_slice(&(frame.len() as u32).to_be_bytes());
    out.extend_from_slice(frame);
    Ok(out)
}

#[async_trait::async_trait]
impl Transport for FramedTransport {
    async fn send(&self, frame: &[u8]) -> transport::Result<()> {
        let bytes = encode_frame(frame)?;
        let mut writer = self.writer.lock().await;
        writer.write_all(&bytes).await?;
        writer.flush().await?;
        Ok(())
    }

    async fn recv(&self) -> transport::Result<Option<Vec<u8>>> {
        let mut reader = self.reader.lock().await;

        let mut header = [0u8; HEADER_SIZE];
        let mut collected = 0;
        while collected < HEADER_SIZE {
            let n = reader.read(&mut header[collected..]).await?;
            if n == 0 {
                if collected == 0 {
                    return Ok(None);
                }
                return Err(transport::Error::ConnectionLost(
                    "stream ended inside a frame header".into(),
                ));
            }
            collected += n;
        }

        let expected = u32::from_be_bytes(header) as usize;
        if expected == 0 || expected > MAX_FRAME_SIZE {
            return Err(transport::Error::Io(format!("invalid frame length {}", expected)));
        }

        let mut payload = vec![0u8; expected];
        reader.read_exact(&mut payload).await?;
        Ok(Some(payload))
    }
}
