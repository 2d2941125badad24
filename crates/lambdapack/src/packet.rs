//! # Packets
//!
//! The eight packet kinds exchanged between host and device.
//!
//! ## Invariants
//! - Every packet starts with a one-byte tag.
//! - Multi-byte integers are big-endian; doubles travel as binary64 patterns.
//! - A frame decodes only if its length is exactly the size of its kind
//!   (for `ResultString`, the fixed header plus the declared string length).
//! - Decoding never panics on arbitrary input.

use crate::cursor::Cursor;
use crate::error::Error;
use crate::error::Result;
use crate::ieee754::pack754_64;
use crate::ieee754::unpack754_64;
use crate::types::CachePolicy;
use crate::types::LambdaId;
use crate::types::LambdaType;
use crate::types::NameField;
use crate::types::MAX_NAME_LENGTH;

/// Bytes preceding the string payload of a `ResultString` packet.
pub const RESULT_STRING_HEADER: usize = 1 + 1 + MAX_NAME_LENGTH + 2;

/// Largest frame any packet kind can produce.
pub const MAX_PACKET_SIZE: usize = RESULT_STRING_HEADER + u16::MAX as usize;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketKind {
    Registered = 1,
    Unregistered = 2,
    CallById = 3,
    CallByName = 4,
    ResultError = 5,
    ResultInt = 6,
    ResultDouble = 7,
    ResultString = 8,
}

impl PacketKind {
    pub fn from_tag(tag: u8) -> Result<Self> {
        match tag {
            1 => Ok(PacketKind::Registered),
            2 => Ok(PacketKind::Unregistered),
            3 => Ok(PacketKind::CallById),
            4 => Ok(PacketKind::CallByName),
            5 => Ok(PacketKind::ResultError),
            6 => Ok(PacketKind::ResultInt),
            7 => Ok(PacketKind::ResultDouble),
            8 => Ok(PacketKind::ResultString),
            _ => Err(Error::UnknownKind(tag)),
        }
    }

    pub fn tag(self) -> u8 {
        self as u8
    }

    /// Size of the fixed part of the packet, tag included.
    /// For every kind but `ResultString` this is the whole frame.
    pub fn fixed_size(self) -> usize {
        1 + match self {
            PacketKind::Registered => MAX_NAME_LENGTH + 1 + 1,
            PacketKind::Unregistered => 1 + MAX_NAME_LENGTH,
            PacketKind::CallById => 1 + 1,
            PacketKind::CallByName => MAX_NAME_LENGTH + 1,
            PacketKind::ResultError => 1 + MAX_NAME_LENGTH + 1,
            PacketKind::ResultInt => 1 + MAX_NAME_LENGTH + 4,
            PacketKind::ResultDouble => 1 + MAX_NAME_LENGTH + 8,
            PacketKind::ResultString => 1 + MAX_NAME_LENGTH + 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PacketKind::Registered => "Registered",
            PacketKind::Unregistered => "Unregistered",
            PacketKind::CallById => "CallById",
            PacketKind::CallByName => "CallByName",
            PacketKind::ResultError => "ResultError",
            PacketKind::ResultInt => "ResultInt",
            PacketKind::ResultDouble => "ResultDouble",
            PacketKind::ResultString => "ResultString",
        }
    }
}

impl std::fmt::Display for PacketKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decoded packet.
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    /// Device announces a lambda.
    Registered { name: NameField, ty: LambdaType, cache: CachePolicy },
    /// Device withdraws a lambda.
    Unregistered { id: LambdaId, name: NameField },
    /// Host invokes a lambda by id.
    CallById { id: LambdaId, expected: LambdaType },
    /// Host invokes a lambda by name.
    CallByName { name: NameField, expected: LambdaType },
    /// Device reports a failed call.
    ResultError { id: LambdaId, name: NameField, code: i8 },
    ResultInt { id: LambdaId, name: NameField, value: i32 },
    ResultDouble { id: LambdaId, name: NameField, value: f64 },
    ResultString { id: LambdaId, name: NameField, value: Vec<u8> },
}

impl Packet {
    pub fn kind(&self) -> PacketKind {
        match self {
            Packet::Registered { .. } => PacketKind::Registered,
            Packet::Unregistered { .. } => PacketKind::Unregistered,
            Packet::CallById { .. } => PacketKind::CallById,
            Packet::CallByName { .. } => PacketKind::CallByName,
            Packet::ResultError { .. } => PacketKind::ResultError,
            Packet::ResultInt { .. } => PacketKind::ResultInt,
            Packet::ResultDouble { .. } => PacketKind::ResultDouble,
            Packet::ResultString { .. } => PacketKind::ResultString,
        }
    }

    /// Size of the encoded frame.
    pub fn encoded_len(&self) -> usize {
        match self {
            Packet::ResultString { value, .. } => RESULT_STRING_HEADER + value.len(),
            other => other.kind().fixed_size(),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        self.encode_into(&mut buf)?;
        Ok(buf)
    }

    /// Appends the encoded frame to `buf`. On error `buf` is left untouched.
    pub fn encode_into(&self, buf: &mut Vec<u8>) -> Result<()> {
        if let Packet::ResultString { value, .. } = self {
            if value.len() > u16::MAX as usize {
                return Err(Error::StringTooLong(value.len()));
            }
        }

        buf.push(self.kind().tag());
        match self {
            Packet::Registered { name, ty, cache } => {
                buf.extend_from_slice(name.raw());
                buf.push(ty.as_u8());
                buf.push(cache.as_u8());
            }
            Packet::Unregistered { id, name } => {
                buf.push(*id);
                buf.extend_from_slice(name.raw());
            }
            Packet::CallById { id, expected } => {
                buf.push(*id);
                buf.push(expected.as_u8());
            }
            Packet::CallByName { name, expected } => {
                buf.extend_from_slice(name.raw());
                buf.push(expected.as_u8());
            }
            Packet::ResultError { id, name, code } => {
                buf.push(*id);
                buf.extend_from_slice(name.raw());
                buf.push(*code as u8);
            }
            Packet::ResultInt { id, name, value } => {
                buf.push(*id);
                buf.extend_from_slice(name.raw());
                buf.extend_from_slice(&value.to_be_bytes());
            }
            Packet::ResultDouble { id, name, value } => {
                buf.push(*id);
                buf.extend_from_slice(name.raw());
                buf.extend_from_slice(&pack754_64(*value).to_be_bytes());
            }
            Packet::ResultString { id, name, value } => {
                buf.push(*id);
                buf.extend_from_slice(name.raw());
                buf.extend_from_slice(&(value.len() as u16).to_be_bytes());
                buf.extend_from_slice(value);
            }
        }
        Ok(())
    }

    pub fn decode(frame: &[u8]) -> Result<Packet> {
        let mut cur = Cursor::new(frame);
        let tag = cur.read_u8().map_err(|_| Error::Empty)?;
        let kind = PacketKind::from_tag(tag)?;

        let expected = kind.fixed_size();
        let size_ok = match kind {
            PacketKind::ResultString => frame.len() >= expected,
            _ => frame.len() == expected,
        };
        if !size_ok {
            return Err(Error::WrongSize { kind, expected, actual: frame.len() });
        }

        let packet = match kind {
            PacketKind::Registered => Packet::Registered {
                name: read_name(&mut cur)?,
                ty: LambdaType::from_u8(cur.read_u8()?)?,
                cache: CachePolicy::from_u8(cur.read_u8()?)?,
            },
            PacketKind::Unregistered => Packet::Unregistered {
                id: cur.read_u8()?,
                name: read_name(&mut cur)?,
            },
            PacketKind::CallById => Packet::CallById {
                id: cur.read_u8()?,
                expected: LambdaType::from_u8(cur.read_u8()?)?,
            },
            PacketKind::CallByName => Packet::CallByName {
                name: read_name(&mut cur)?,
                expected: LambdaType::from_u8(cur.read_u8()?)?,
            },
            PacketKind::ResultError => Packet::ResultError {
                id: cur.read_u8()?,
                name: read_name(&mut cur)?,
                code: cur.read_i8()?,
            },
            PacketKind::ResultInt => Packet::ResultInt {
                id: cur.read_u8()?,
                name: read_name(&mut cur)?,
                value: cur.read_i32()?,
            },
            PacketKind::ResultDouble => Packet::ResultDouble {
                id: cur.read_u8()?,
                name: read_name(&mut cur)?,
                value: unpack754_64(cur.read_u64()?),
            },
            PacketKind::ResultString => {
                let id = cur.read_u8()?;
                let name = read_name(&mut cur)?;
                let declared = cur.read_u16()? as usize;
                let available = cur.remaining();
                if declared != available {
                    return Err(Error::StringLength { declared, available });
                }
                Packet::ResultString { id, name, value: cur.read_bytes(declared)?.to_vec() }
            }
        };

        Ok(packet)
    }
}

fn read_name(cur: &mut Cursor<'_>) -> Result<NameField> {
    Ok(NameField::from_raw(cur.read_array()?))
}
