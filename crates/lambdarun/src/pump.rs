//! # Receive Pump
//!
//! One background task per endpoint reads frames off the transport and hands
//! each to the endpoint's handler, strictly one at a time.
//!
//! A bad frame is the handler's problem and never stops the pump. A transport
//! error does: the byte stream can no longer be trusted to be on a frame
//! boundary, so the link is dead until its owner starts over on a new one.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::debug;
use tracing::error;
use tracing::info;

use crate::transport::Transport;

/// Reacts to inbound frames.
#[async_trait::async_trait]
pub trait FrameHandler: Send + Sync + 'static {
    async fn handle(&self, frame: &[u8]);
}

/// Spawns the pump. The task ends with the link or when its handle is aborted.
pub fn spawn_pump(
    endpoint: String,
    transport: Arc<dyn Transport>,
    handler: Arc<dyn FrameHandler>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match transport.recv().await {
                Ok(Some(frame)) => {
                    debug!(endpoint = %endpoint, len = frame.len(), "frame received");
                    handler.handle(&frame).await;
                }
                Ok(None) => {
                    info!(endpoint = %endpoint, "link closed");
                    break;
                }
                Err(e) => {
                    error!(endpoint = %endpoint, error = %e, "transport failed, link is dead");
                    break;
                }
            }
        }
    })
}
