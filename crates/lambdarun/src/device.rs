//! # Device
//!
//! The side of the link that owns the lambdas. It announces each lambda to the
//! host, answers call requests by evaluating them, and can push results on its
//! own initiative to keep the host's cache warm.

use std::sync::Arc;
use std::sync::Mutex;

use tokio::task::JoinHandle;
use tracing::debug;
use tracing::info;
use tracing::warn;

use lambdapack::CachePolicy;
use lambdapack::LambdaId;
use lambdapack::LambdaType;
use lambdapack::NameField;
use lambdapack::Packet;
use lambdapack::Value;

use crate::call::CallError;
use crate::call::LambdaKey;
use crate::config::ConnectorConfig;
use crate::pump;
use crate::pump::FrameHandler;
use crate::registry;
use crate::registry::LambdaHandle;
use crate::registry::LocalFn;
use crate::registry::RegisterError;
use crate::registry::Registry;
use crate::registry::SharedRegistry;
use crate::registry::UnregisterError;
use crate::transport;
use crate::transport::Transport;

/// Failures of an out-of-band result push.
#[derive(Debug, Clone)]
pub enum PushError {
    NotFound,
    WrongType,
    Encode(lambdapack::Error),
    Transport(transport::Error),
}

impl PushError {
    pub fn code(&self) -> i8 {
        match self {
            PushError::NotFound => -1,
            PushError::WrongType => -2,
            PushError::Encode(_) | PushError::Transport(_) => -3,
        }
    }
}

impl std::fmt::Display for PushError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound => write!(f, "lambda not found"),
            Self::WrongType => write!(f, "value does not match the lambda type"),
            Self::Encode(e) => write!(f, "encode error: {}", e),
            Self::Transport(e) => write!(f, "transport error: {}", e),
        }
    }
}

impl std::error::Error for PushError {}

impl From<lambdapack::Error> for PushError {
    fn from(e: lambdapack::Error) -> Self {
        Self::Encode(e)
    }
}

impl From<transport::Error> for PushError {
    fn from(e: transport::Error) -> Self {
        Self::Transport(e)
    }
}

/// Failures of a registration or removal, including its announcement.
///
/// A failed announcement is rolled back, so the host and the device keep
/// agreeing on every id.
#[derive(Debug, Clone)]
pub enum AnnounceError {
    Register(RegisterError),
    Unregister(UnregisterError),
    Encode(lambdapack::Error),
    Transport(transport::Error),
}

impl AnnounceError {
    /// Registry failures keep their own codes; a failed announcement is −5.
    pub fn code(&self) -> i8 {
        match self {
            AnnounceError::Register(e) => e.code(),
            AnnounceError::Unregister(e) => e.code(),
            AnnounceError::Encode(_) | AnnounceError::Transport(_) => -5,
        }
    }
}

impl std::fmt::Display for AnnounceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Register(e) => write!(f, "{}", e),
            Self::Unregister(e) => write!(f, "{}", e),
            Self::Encode(e) => write!(f, "cannot encode announcement: {}", e),
            Self::Transport(e) => write!(f, "cannot send announcement: {}", e),
        }
    }
}

impl std::error::Error for AnnounceError {}

impl From<RegisterError> for AnnounceError {
    fn from(e: RegisterError) -> Self {
        Self::Register(e)
    }
}

impl From<UnregisterError> for AnnounceError {
    fn from(e: UnregisterError) -> Self {
        Self::Unregister(e)
    }
}

impl From<lambdapack::Error> for AnnounceError {
    fn from(e: lambdapack::Error) -> Self {
        Self::Encode(e)
    }
}

impl From<transport::Error> for AnnounceError {
    fn from(e: transport::Error) -> Self {
        Self::Transport(e)
    }
}

/// Looks up a local lambda and runs it outside the registry lock.
fn evaluate(
    registry: &Mutex<Registry>,
    key: LambdaKey<'_>,
    expected: LambdaType,
) -> Result<(LambdaId, NameField, Value), CallError> {
    let (id, name, function) = {
        let reg = registry::lock(registry);
        let lambda = match key {
            LambdaKey::Id(id) => reg.get(id),
            LambdaKey::Name(name) => reg.find(name),
        }
        .ok_or(CallError::NotFound)?;

        if lambda.ty != expected {
            return Err(CallError::WrongType);
        }
        let LambdaHandle::Local(function) = &lambda.handle else {
            return Err(CallError::NotFound);
        };
        let name = NameField::new(lambda.name.as_bytes()).map_err(|_| CallError::NotFound)?;
        (lambda.id, name, function.clone())
    };

    Ok((id, name, function()))
}

fn result_packet(id: LambdaId, name: NameField, value: Value) -> Packet {
    match value {
        Value::Int(value) => Packet::ResultInt { id, name, value },
        Value::Double(value) => Packet::ResultDouble { id, name, value },
        Value::String(value) => Packet::ResultString { id, name, value },
    }
}

struct DeviceHandler {
    endpoint: String,
    registry: SharedRegistry,
    transport: Arc<dyn Transport>,
}

impl DeviceHandler {
    /// Builds the reply to a call, or `None` if the call cannot be answered.
    fn answer(&self, packet: Packet) -> Option<Packet> {
        let (key, expected) = match &packet {
            Packet::CallById { id, expected } => (LambdaKey::Id(*id), *expected),
            Packet::CallByName { name, expected } => (LambdaKey::Name(name.as_bytes()), *expected),
            other => {
                warn!(endpoint = %self.endpoint, kind = %other.kind(), "device ignores packet");
                return None;
            }
        };

        match evaluate(&self.registry, key, expected) {
            Ok((id, name, value)) => {
                debug!(endpoint = %self.endpoint, lambda = id, "call answered");
                Some(result_packet(id, name, value))
            }
            Err(e) => {
                let target = match key {
                    LambdaKey::Id(id) => {
                        let reg = registry::lock(&self.registry);
                        let name = reg
                            .get(id)
                            .and_then(|l| NameField::new(l.name.as_bytes()).ok())
                            .unwrap_or_default();
                        Some((id, name))
                    }
                    LambdaKey::Name(name) => {
                        let reg = registry::lock(&self.registry);
                        reg.find(name)
                            .and_then(|l| Some((l.id, NameField::new(l.name.as_bytes()).ok()?)))
                    }
                };
                match target {
                    Some((id, name)) => {
                        debug!(endpoint = %self.endpoint, lambda = id, error = %e, "call failed");
                        Some(Packet::ResultError { id, name, code: e.code() })
                    }
                    None => {
                        warn!(endpoint = %self.endpoint, %key, "call for unknown lambda name dropped");
                        None
                    }
                }
            }
        }
    }
}

#[async_trait::async_trait]
impl FrameHandler for DeviceHandler {
    async fn handle(&self, frame: &[u8]) {
        let packet = match Packet::decode(frame) {
            Ok(packet) => packet,
            Err(e) => {
                warn!(endpoint = %self.endpoint, error = %e, "dropped frame");
                return;
            }
        };

        let Some(reply) = self.answer(packet) else { return };
        let sent = match reply.encode() {
            Ok(bytes) => self.transport.send(&bytes).await.map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };
        if let Err(e) = sent {
            warn!(endpoint = %self.endpoint, kind = %reply.kind(), error = %e, "failed to send reply");
        }
    }
}

/// The device end of the link.
///
/// The host numbers lambdas in the order their announcements arrive, so
/// registrations and removals go out one at a time, each holding `announcing`
/// from the local change until its packet is sent.
pub struct Device {
    config: ConnectorConfig,
    registry: SharedRegistry,
    transport: Arc<dyn Transport>,
    announcing: tokio::sync::Mutex<()>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl Device {
    /// Starts answering calls on `transport`. Must be called inside a tokio runtime.
    pub fn start(transport: Arc<dyn Transport>, config: ConnectorConfig) -> Self {
        let registry: SharedRegistry = Arc::new(Mutex::new(Registry::new()));
        let handler = Arc::new(DeviceHandler {
            endpoint: config.name.clone(),
            registry: registry.clone(),
            transport: transport.clone(),
        });
        let pump = pump::spawn_pump(config.name.clone(), transport.clone(), handler);

        info!(endpoint = %config.name, "device started");
        Self {
            config,
            registry,
            transport,
            announcing: tokio::sync::Mutex::new(()),
            pump: Mutex::new(Some(pump)),
        }
    }

    pub async fn register_int<F>(&self, name: &str, cache: CachePolicy, f: F) -> Result<LambdaId, AnnounceError>
    where
        F: Fn() -> i32 + Send + Sync + 'static,
    {
        self.register(name, LambdaType::Int, cache, Arc::new(move || Value::Int(f()))).await
    }

    pub async fn register_double<F>(&self, name: &str, cache: CachePolicy, f: F) -> Result<LambdaId, AnnounceError>
    where
        F: Fn() -> f64 + Send + Sync + 'static,
    {
        self.register(name, LambdaType::Double, cache, Arc::new(move || Value::Double(f()))).await
    }

    pub async fn register_string<F>(&self, name: &str, cache: CachePolicy, f: F) -> Result<LambdaId, AnnounceError>
    where
        F: Fn() -> Vec<u8> + Send + Sync + 'static,
    {
        self.register(name, LambdaType::String, cache, Arc::new(move || Value::String(f()))).await
    }

    /// Registers locally, then announces. If the announcement cannot be sent
    /// the registration is withdrawn and its id is issued again next time.
    async fn register(
        &self,
        name: &str,
        ty: LambdaType,
        cache: CachePolicy,
        function: LocalFn,
    ) -> Result<LambdaId, AnnounceError> {
        let _announcing = self.announcing.lock().await;
        let id = registry::lock(&self.registry).register(
            name.as_bytes(),
            ty,
            cache,
            LambdaHandle::Local(function),
        )?;

        let announced = match NameField::new(name.as_bytes()) {
            Ok(field) => self.announce(Packet::Registered { name: field, ty, cache }).await,
            Err(e) => Err(e.into()),
        };
        if let Err(e) = announced {
            registry::lock(&self.registry).withdraw(id);
            warn!(endpoint = %self.config.name, lambda = id, name, error = %e, "registration withdrawn");
            return Err(e);
        }

        info!(endpoint = %self.config.name, lambda = id, name, %ty, %cache, "lambda registered");
        Ok(id)
    }

    /// Removes locally, then announces. If the announcement cannot be sent the
    /// lambda is put back, since the host still knows it.
    pub async fn unregister(&self, id: LambdaId) -> Result<(), AnnounceError> {
        let _announcing = self.announcing.lock().await;
        let lambda = registry::lock(&self.registry).unregister(id)?;

        let announced = match NameField::new(lambda.name.as_bytes()) {
            Ok(name) => self.announce(Packet::Unregistered { id, name }).await,
            Err(e) => Err(e.into()),
        };
        if let Err(e) = announced {
            if registry::lock(&self.registry).restore(lambda).is_err() {
                warn!(endpoint = %self.config.name, lambda = id, "registry cleared before restore");
            }
            warn!(endpoint = %self.config.name, lambda = id, error = %e, "removal rolled back");
            return Err(e);
        }

        info!(endpoint = %self.config.name, lambda = id, "lambda unregistered");
        Ok(())
    }

    async fn announce(&self, packet: Packet) -> Result<(), AnnounceError> {
        let bytes = packet.encode()?;
        self.transport.send(&bytes).await?;
        debug!(endpoint = %self.config.name, kind = %packet.kind(), "announced");
        Ok(())
    }

    /// Runs a local lambda directly, without touching the link.
    pub fn call_local(&self, key: LambdaKey<'_>, expected: LambdaType) -> Result<Value, CallError> {
        evaluate(&self.registry, key, expected).map(|(_, _, value)| value)
    }

    /// Pushes a result to the host without being asked.
    pub async fn send_result(&self, id: LambdaId, value: Value) -> Result<(), PushError> {
        let name = {
            let reg = registry::lock(&self.registry);
            let lambda = reg.get(id).ok_or(PushError::NotFound)?;
            if lambda.ty != value.ty() {
                return Err(PushError::WrongType);
            }
            NameField::new(lambda.name.as_bytes())?
        };

        let bytes = result_packet(id, name, value).encode()?;
        self.transport.send(&bytes).await?;
        debug!(endpoint = %self.config.name, lambda = id, "result pushed");
        Ok(())
    }

    pub async fn send_result_by_name(&self, name: &str, value: Value) -> Result<(), PushError> {
        let id = registry::lock(&self.registry)
            .find(name.as_bytes())
            .map(|l| l.id)
            .ok_or(PushError::NotFound)?;
        self.send_result(id, value).await
    }

    pub fn count(&self) -> usize {
        registry::lock(&self.registry).count()
    }

    /// Whether calls from the host can still arrive.
    pub fn is_linked(&self) -> bool {
        self.pump
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .as_ref()
            .is_some_and(|pump| !pump.is_finished())
    }

    /// Halts reception and forgets every lambda.
    pub fn stop(&self) {
        if let Some(pump) = self.pump.lock().unwrap_or_else(|p| p.into_inner()).take() {
            pump.abort();
        }
        let released = registry::lock(&self.registry).clear();
        info!(endpoint = %self.config.name, released = released.len(), "device stopped");
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.lock().unwrap_or_else(|p| p.into_inner()).take() {
            pump.abort();
        }
    }
}
