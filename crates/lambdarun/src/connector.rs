//! # Connector
//!
//! The host side of the link. Keeps a registry of what the device announced,
//! runs the receive pump, and offers typed calls by id or by name.
//!
//! ## Lifecycle
//!
//! `start` begins with an empty registry; the device fills it with
//! `Registered` packets. `stop` halts reception, drops every entry and wakes
//! any waiting caller with `NotFound`. Dropping a `Connector` stops its pump.
//! A transport error also ends the pump; `is_linked` reports it.

use std::sync::Arc;
use std::sync::Mutex;

use tokio::task::JoinHandle;
use tracing::info;
use tracing::warn;

use lambdapack::CachePolicy;
use lambdapack::LambdaId;
use lambdapack::LambdaType;
use lambdapack::Value;

use crate::call;
use crate::call::CallEngine;
use crate::call::CallResult;
use crate::call::LambdaKey;
use crate::config::ConnectorConfig;
use crate::dispatch;
use crate::pump;
use crate::pump::FrameHandler;
use crate::registry;
use crate::registry::Lambda;
use crate::registry::Outcome;
use crate::registry::Registry;
use crate::registry::SharedRegistry;
use crate::transport::Transport;

/// A registered lambda as shown to users.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LambdaInfo {
    pub id: LambdaId,
    pub name: String,
    pub ty: LambdaType,
    pub cache: CachePolicy,
}

impl From<&Lambda> for LambdaInfo {
    fn from(lambda: &Lambda) -> Self {
        Self {
            id: lambda.id,
            name: lambda.name.to_string(),
            ty: lambda.ty,
            cache: lambda.cache,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CachedLambdaInfo {
    pub info: LambdaInfo,
    pub cached: Option<Value>,
}

struct HostHandler {
    endpoint: String,
    registry: SharedRegistry,
}

#[async_trait::async_trait]
impl FrameHandler for HostHandler {
    async fn handle(&self, frame: &[u8]) {
        if let Err(e) = dispatch::dispatch(&self.registry, frame) {
            warn!(endpoint = %self.endpoint, error = %e, "dropped frame");
        }
    }
}

pub struct Connector {
    config: ConnectorConfig,
    registry: SharedRegistry,
    engine: CallEngine,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl Connector {
    /// Starts listening on `transport`. Must be called inside a tokio runtime.
    pub fn start(transport: Arc<dyn Transport>, config: ConnectorConfig) -> Self {
        let registry: SharedRegistry = Arc::new(Mutex::new(Registry::new()));
        let engine = CallEngine::new(
            config.name.clone(),
            registry.clone(),
            transport.clone(),
            config.call_timeout,
        );

        let handler = Arc::new(HostHandler {
            endpoint: config.name.clone(),
            registry: registry.clone(),
        });
        let pump = pump::spawn_pump(config.name.clone(), transport, handler);

        info!(endpoint = %config.name, timeout = ?config.call_timeout, "connector started");
        Self {
            config,
            registry,
            engine,
            pump: Mutex::new(Some(pump)),
        }
    }

    /// Whether the receive pump still runs. It ends for good when the link
    /// closes or fails, after which calls can only time out; start a new
    /// `Connector` on a fresh transport.
    pub fn is_linked(&self) -> bool {
        self.pump
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .as_ref()
            .is_some_and(|pump| !pump.is_finished())
    }

    /// Halts reception and releases every lambda.
    ///
    /// Callers blocked on a result return `NotFound`. Calling `stop` twice is harmless.
    pub fn stop(&self) {
        let pump = self.pump.lock().unwrap_or_else(|p| p.into_inner()).take();
        if let Some(pump) = pump {
            pump.abort();
        }

        let released = registry::lock(&self.registry).clear();
        let count = released.len();
        for mut lambda in released {
            if let Some(slot) = lambda.handle.remote_mut() {
                slot.post(Outcome::Unregistered);
            }
        }
        info!(endpoint = %self.config.name, released = count, "connector stopped");
    }

    pub async fn call_by_id(&self, id: LambdaId, expected: LambdaType) -> call::Result<CallResult> {
        self.engine.call(LambdaKey::Id(id), expected).await
    }

    pub async fn call_by_name(&self, name: &str, expected: LambdaType) -> call::Result<CallResult> {
        self.engine.call(LambdaKey::Name(name.as_bytes()), expected).await
    }

    /// Registered lambdas in id order, optionally only those of one type.
    pub fn list(&self, filter: Option<LambdaType>) -> Vec<LambdaInfo> {
        registry::lock(&self.registry)
            .iter()
            .filter(|l| filter.is_none_or(|ty| l.ty == ty))
            .map(LambdaInfo::from)
            .collect()
    }

    /// Like [`Connector::list`], with each lambda's cached value.
    pub fn list_with_cache(&self, filter: Option<LambdaType>) -> Vec<CachedLambdaInfo> {
        registry::lock(&self.registry)
            .iter()
            .filter(|l| filter.is_none_or(|ty| l.ty == ty))
            .map(|l| CachedLambdaInfo {
                info: LambdaInfo::from(l),
                cached: l.handle.remote_ref().and_then(|slot| slot.cached.clone()),
            })
            .collect()
    }

    /// Number of ids the device has been issued, emptied slots included.
    pub fn count(&self) -> usize {
        registry::lock(&self.registry).count()
    }

    /// Applies a frame as if it had arrived on the transport.
    pub fn dispatch(&self, frame: &[u8]) -> dispatch::Result<()> {
        dispatch::dispatch(&self.registry, frame)
    }
}

impl Drop for Connector {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.lock().unwrap_or_else(|p| p.into_inner()).take() {
            pump.abort();
        }
    }
}
