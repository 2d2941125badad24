//! # Protocol Types
//!
//! The scalar vocabulary shared by both ends of the link.

use crate::error::Error;
use crate::error::Result;

/// Maximum number of lambdas a registry can ever issue ids for.
pub const MAX_LAMBDAS: usize = 255;

/// Width of the fixed name field on the wire.
pub const MAX_NAME_LENGTH: usize = 12;

/// Dense identifier assigned at registration.
pub type LambdaId = u8;

/// Return type of a lambda. Fixed at registration.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LambdaType {
    Int = 1,
    Double = 2,
    String = 3,
}

impl LambdaType {
    pub fn from_u8(b: u8) -> Result<Self> {
        match b {
            1 => Ok(LambdaType::Int),
            2 => Ok(LambdaType::Double),
            3 => Ok(LambdaType::String),
            _ => Err(Error::UnknownLambdaType(b)),
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LambdaType::Int => "int",
            LambdaType::Double => "double",
            LambdaType::String => "string",
        }
    }
}

impl std::fmt::Display for LambdaType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How results of a lambda are cached on the calling side.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CachePolicy {
    /// Every call is a round trip; nothing is cached.
    NoCache = 1,
    /// The first successful result is served from cache forever after.
    CallOnce = 2,
    /// Never call; serve whatever the device pushed.
    CacheOnly = 3,
    /// Call, and fall back to the last result if the call times out.
    OnTimeout = 4,
}

impl CachePolicy {
    pub fn from_u8(b: u8) -> Result<Self> {
        match b {
            1 => Ok(CachePolicy::NoCache),
            2 => Ok(CachePolicy::CallOnce),
            3 => Ok(CachePolicy::CacheOnly),
            4 => Ok(CachePolicy::OnTimeout),
            _ => Err(Error::UnknownCachePolicy(b)),
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CachePolicy::NoCache => "no-cache",
            CachePolicy::CallOnce => "call-once",
            CachePolicy::CacheOnly => "cache-only",
            CachePolicy::OnTimeout => "on-timeout",
        }
    }
}

impl std::fmt::Display for CachePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed lambda result.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i32),
    Double(f64),
    String(Vec<u8>),
}

impl Value {
    pub fn ty(&self) -> LambdaType {
        match self {
            Value::Int(_) => LambdaType::Int,
            Value::Double(_) => LambdaType::Double,
            Value::String(_) => LambdaType::String,
        }
    }

    pub fn as_int(&self) -> Option<i32> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_double(&self) -> Option<f64> {
        match self {
            Value::Double(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::String(v) => Some(v),
            _ => None,
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{}", v),
            Value::Double(v) => write!(f, "{}", v),
            Value::String(v) => write!(f, "{:?}", String::from_utf8_lossy(v)),
        }
    }
}

/// The fixed, NUL-padded name field carried by most packets.
///
/// A name of exactly `MAX_NAME_LENGTH` bytes has no terminator on the wire.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct NameField([u8; MAX_NAME_LENGTH]);

impl NameField {
    pub fn new(name: &[u8]) -> Result<Self> {
        if name.len() > MAX_NAME_LENGTH {
            return Err(Error::NameTooLong(name.len()));
        }
        let mut field = [0u8; MAX_NAME_LENGTH];
        field[..name.len()].copy_from_slice(name);
        Ok(Self(field))
    }

    pub fn from_raw(raw: [u8; MAX_NAME_LENGTH]) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> &[u8; MAX_NAME_LENGTH] {
        &self.0
    }

    /// The name bytes up to the first NUL.
    pub fn as_bytes(&self) -> &[u8] {
        let end = self.0.iter().position(|&b| b == 0).unwrap_or(MAX_NAME_LENGTH);
        &self.0[..end]
    }

    pub fn is_empty(&self) -> bool {
        self.as_bytes().is_empty()
    }
}

impl std::fmt::Debug for NameField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "NameField({:?})", String::from_utf8_lossy(self.as_bytes()))
    }
}

impl std::fmt::Display for NameField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&String::from_utf8_lossy(self.as_bytes()))
    }
}
