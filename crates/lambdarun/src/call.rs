//! # Call Engine
//!
//! Turns a synchronous-looking call into a request packet and a bounded wait
//! for the matching result.
//!
//! ## Philosophy
//!
//! A call walks `Idle -> Sent -> {Resolved | Errored | TimedOut}`. The cache
//! policy is consulted twice: before sending (a cached answer may make the
//! round trip unnecessary) and after a timeout (a stale answer may be better
//! than none).
//!
//! ## Invariants
//! - The registry lock is never held across an await.
//! - The waiter is installed before the request leaves, so a result that
//!   arrives before the caller starts waiting is not lost.
//! - A result delivered before the deadline wins over the timeout, even if the
//!   two race.
//! - Each lambda has a single wait slot. A second concurrent call takes it
//!   over and the first caller falls through to the timeout path at once.

use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use tokio::sync::oneshot;
use tracing::debug;
use tracing::warn;

use lambdapack::CachePolicy;
use lambdapack::LambdaId;
use lambdapack::LambdaType;
use lambdapack::NameField;
use lambdapack::Packet;
use lambdapack::Value;

use crate::registry;
use crate::registry::Outcome;
use crate::registry::SharedRegistry;
use crate::registry::Waiter;
use crate::transport::Transport;

/// Addresses a lambda either way the protocol allows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LambdaKey<'a> {
    Id(LambdaId),
    Name(&'a [u8]),
}

impl std::fmt::Display for LambdaKey<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LambdaKey::Id(id) => write!(f, "#{}", id),
            LambdaKey::Name(name) => write!(f, "{}", String::from_utf8_lossy(name)),
        }
    }
}

/// Where a successful value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallStatus {
    /// Fresh from the device.
    Success,
    /// Served from cache without asking the device.
    Cache,
    /// The device did not answer in time; this is the last known value.
    CacheTimeout,
}

impl CallStatus {
    pub fn code(self) -> i8 {
        match self {
            CallStatus::Success => 0,
            CallStatus::Cache => 1,
            CallStatus::CacheTimeout => 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CallResult {
    pub status: CallStatus,
    pub value: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallError {
    NotFound,
    WrongType,
    Timeout,
    /// CacheOnly lambda with nothing cached yet.
    CacheEmpty,
    /// OnTimeout lambda that timed out with nothing cached yet.
    CacheTimeoutEmpty,
    /// Error code reported by the device.
    Remote(i8),
}

impl CallError {
    pub fn code(self) -> i8 {
        match self {
            CallError::NotFound => -1,
            CallError::WrongType => -2,
            CallError::Timeout => -3,
            CallError::CacheEmpty => -4,
            CallError::CacheTimeoutEmpty => -5,
            CallError::Remote(code) => code,
        }
    }
}

impl std::fmt::Display for CallError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CallError::NotFound => write!(f, "lambda not found"),
            CallError::WrongType => write!(f, "lambda has a different type"),
            CallError::Timeout => write!(f, "call timed out"),
            CallError::CacheEmpty => write!(f, "cache-only lambda has no cached value"),
            CallError::CacheTimeoutEmpty => write!(f, "call timed out and no cached value exists"),
            CallError::Remote(code) => write!(f, "device reported error {}", code),
        }
    }
}

impl std::error::Error for CallError {}

pub type Result<T> = std::result::Result<T, CallError>;

/// Issues calls against a registry of remote lambdas.
pub struct CallEngine {
    endpoint: String,
    registry: SharedRegistry,
    transport: Arc<dyn Transport>,
    call_timeout: Duration,
    tokens: AtomicU64,
}

impl CallEngine {
    pub fn new(
        endpoint: impl Into<String>,
        registry: SharedRegistry,
        transport: Arc<dyn Transport>,
        call_timeout: Duration,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            registry,
            transport,
            call_timeout,
            tokens: AtomicU64::new(1),
        }
    }

    pub async fn call(&self, key: LambdaKey<'_>, expected: LambdaType) -> Result<CallResult> {
        let token = self.tokens.fetch_add(1, Ordering::Relaxed);
        let (tx, mut rx) = oneshot::channel();

        let (id, request) = {
            let mut reg = registry::lock(&self.registry);
            let lambda = match key {
                LambdaKey::Id(id) => reg.get_mut(id),
                LambdaKey::Name(name) => reg.find_mut(name),
            }
            .ok_or(CallError::NotFound)?;

            if lambda.ty != expected {
                return Err(CallError::WrongType);
            }

            let id = lambda.id;
            let request = match key {
                LambdaKey::Id(_) => Ok(Packet::CallById { id, expected }),
                LambdaKey::Name(_) => NameField::new(lambda.name.as_bytes())
                    .map(|name| Packet::CallByName { name, expected }),
            };

            let cache = lambda.cache;
            let slot = lambda.handle.remote_mut().ok_or(CallError::NotFound)?;
            match cache {
                CachePolicy::CallOnce => {
                    if let Some(value) = &slot.cached {
                        return Ok(CallResult { status: CallStatus::Cache, value: value.clone() });
                    }
                }
                CachePolicy::CacheOnly => {
                    return slot
                        .cached
                        .clone()
                        .map(|value| CallResult { status: CallStatus::Cache, value })
                        .ok_or(CallError::CacheEmpty);
                }
                CachePolicy::NoCache | CachePolicy::OnTimeout => {}
            }

            if let Some(displaced) = slot.waiter.replace(Waiter { token, tx }) {
                warn!(
                    endpoint = %self.endpoint,
                    lambda = id,
                    displaced = displaced.token,
                    "concurrent call took over the wait slot"
                );
            }

            (id, request)
        };

        let sent = match request.and_then(|packet| packet.encode()) {
            Ok(frame) => match self.transport.send(&frame).await {
                Ok(()) => true,
                Err(e) => {
                    warn!(endpoint = %self.endpoint, lambda = id, error = %e, "failed to send call");
                    false
                }
            },
            Err(e) => {
                warn!(endpoint = %self.endpoint, lambda = id, error = %e, "failed to encode call");
                false
            }
        };

        let outcome = if sent {
            debug!(endpoint = %self.endpoint, lambda = id, %key, "call sent, waiting");
            match tokio::time::timeout(self.call_timeout, &mut rx).await {
                Ok(Ok(outcome)) => Some(outcome),
                Ok(Err(_)) | Err(_) => None,
            }
        } else {
            None
        };

        match outcome {
            Some(outcome) => Self::resolve(outcome),
            None => self.expire(id, token, rx),
        }
    }

    fn resolve(outcome: Outcome) -> Result<CallResult> {
        match outcome {
            Outcome::Value(value) => Ok(CallResult { status: CallStatus::Success, value }),
            Outcome::Error(code) => Err(CallError::Remote(code)),
            Outcome::Unregistered => Err(CallError::NotFound),
        }
    }

    /// Timeout path: withdraw the waiter and fall back to the cache.
    fn expire(
        &self,
        id: LambdaId,
        token: u64,
        mut rx: oneshot::Receiver<Outcome>,
    ) -> Result<CallResult> {
        let mut reg = registry::lock(&self.registry);

        // a result may have been posted while the deadline passed
        if let Ok(outcome) = rx.try_recv() {
            return Self::resolve(outcome);
        }

        let Some(lambda) = reg.get_mut(id) else {
            return Err(CallError::NotFound);
        };
        let cache = lambda.cache;
        let Some(slot) = lambda.handle.remote_mut() else {
            return Err(CallError::NotFound);
        };

        if slot.waiter.as_ref().is_some_and(|w| w.token == token) {
            slot.waiter = None;
        }

        warn!(endpoint = %self.endpoint, lambda = id, "call timed out");
        match cache {
            CachePolicy::OnTimeout => slot
                .cached
                .clone()
                .map(|value| CallResult { status: CallStatus::CacheTimeout, value })
                .ok_or(CallError::CacheTimeoutEmpty),
            _ => Err(CallError::Timeout),
        }
    }
}
