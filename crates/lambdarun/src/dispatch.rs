//! # Packet Dispatcher
//!
//! Applies one inbound frame to the host's registry.
//!
//! Every failure here is a dropped frame, never a dead link. The pump logs the
//! returned error and moves on to the next frame.

use std::sync::Mutex;

use tracing::debug;
use tracing::info;

use lambdapack::CachePolicy;
use lambdapack::LambdaId;
use lambdapack::LambdaType;
use lambdapack::NameField;
use lambdapack::Packet;
use lambdapack::PacketKind;
use lambdapack::Value;

use crate::registry;
use crate::registry::Lambda;
use crate::registry::LambdaHandle;
use crate::registry::Outcome;
use crate::registry::RegisterError;
use crate::registry::Registry;
use crate::registry::UnregisterError;

/// Reasons a frame was dropped.
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    Decode(lambdapack::Error),
    Register(RegisterError),
    Unregister(UnregisterError),
    /// A result for an id nobody registered.
    UnknownLambda(LambdaId),
    /// A result whose type disagrees with the registered lambda.
    TypeMismatch { id: LambdaId, expected: LambdaType, found: LambdaType },
    /// A result naming a different lambda than the one under its id.
    NameMismatch { id: LambdaId, registered: String, found: String },
    /// The lambda exists but has no remote slot to deliver into.
    NotRemote(LambdaId),
    /// A packet kind that only ever travels the other way.
    Unexpected(PacketKind),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Decode(e) => write!(f, "malformed frame: {}", e),
            Self::Register(e) => write!(f, "registration rejected: {} ({})", e, e.code()),
            Self::Unregister(e) => write!(f, "unregistration rejected: {}", e),
            Self::UnknownLambda(id) => write!(f, "result for unknown lambda #{}", id),
            Self::TypeMismatch { id, expected, found } => {
                write!(f, "lambda #{} is {}, result is {}", id, expected, found)
            }
            Self::NameMismatch { id, registered, found } => {
                write!(f, "lambda #{} is {:?}, result names {:?}", id, registered, found)
            }
            Self::NotRemote(id) => write!(f, "lambda #{} is not a remote lambda", id),
            Self::Unexpected(kind) => write!(f, "{} is not accepted on this side", kind),
        }
    }
}

impl std::error::Error for Error {}

impl From<lambdapack::Error> for Error {
    fn from(e: lambdapack::Error) -> Self {
        Self::Decode(e)
    }
}

impl From<RegisterError> for Error {
    fn from(e: RegisterError) -> Self {
        Self::Register(e)
    }
}

impl From<UnregisterError> for Error {
    fn from(e: UnregisterError) -> Self {
        Self::Unregister(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Decodes `frame` and applies it to `registry`.
pub fn dispatch(registry: &Mutex<Registry>, frame: &[u8]) -> Result<()> {
    let packet = Packet::decode(frame)?;
    let mut reg = registry::lock(registry);

    match packet {
        Packet::Registered { name, ty, cache } => {
            let id = reg.register(name.as_bytes(), ty, cache, LambdaHandle::remote())?;
            info!(lambda = id, name = %name, %ty, %cache, "lambda registered");
        }
        Packet::Unregistered { id, name } => {
            let mut lambda = reg.unregister(id)?;
            if lambda.name.as_bytes() != name.as_bytes() {
                debug!(lambda = id, registered = %lambda.name, announced = %name, "unregister names differ");
            }
            if let Some(slot) = lambda.handle.remote_mut() {
                slot.post(Outcome::Unregistered);
            }
            info!(lambda = id, name = %lambda.name, "lambda unregistered");
        }
        Packet::ResultInt { id, name, value } => deliver(&mut reg, id, name, Value::Int(value))?,
        Packet::ResultDouble { id, name, value } => deliver(&mut reg, id, name, Value::Double(value))?,
        Packet::ResultString { id, name, value } => deliver(&mut reg, id, name, Value::String(value))?,
        Packet::ResultError { id, name, code } => {
            let lambda = reg.get_mut(id).ok_or(Error::UnknownLambda(id))?;
            check_name(lambda, name)?;
            let slot = lambda.handle.remote_mut().ok_or(Error::NotRemote(id))?;
            let woken = slot.post(Outcome::Error(code));
            debug!(lambda = id, code, woken, "error result");
        }
        Packet::CallById { .. } | Packet::CallByName { .. } => {
            return Err(Error::Unexpected(packet.kind()));
        }
    }

    Ok(())
}

/// An empty name is accepted; a non-empty one must match the entry.
fn check_name(lambda: &Lambda, name: NameField) -> Result<()> {
    if name.is_empty() || name.as_bytes() == lambda.name.as_bytes() {
        return Ok(());
    }
    Err(Error::NameMismatch {
        id: lambda.id,
        registered: lambda.name.to_string(),
        found: name.to_string(),
    })
}

fn deliver(reg: &mut Registry, id: LambdaId, name: NameField, value: Value) -> Result<()> {
    let lambda = reg.get_mut(id).ok_or(Error::UnknownLambda(id))?;
    check_name(lambda, name)?;
    if lambda.ty != value.ty() {
        return Err(Error::TypeMismatch { id, expected: lambda.ty, found: value.ty() });
    }

    let cache = lambda.cache;
    let slot = lambda.handle.remote_mut().ok_or(Error::NotRemote(id))?;
    if cache != CachePolicy::NoCache {
        slot.cached = Some(value.clone());
    }
    let woken = slot.post(Outcome::Value(value));
    debug!(lambda = id, woken, "result delivered");
    Ok(())
}
