//! # Error Definitions
//!
//! Every way a frame can fail to encode or decode.

use crate::packet::PacketKind;

/// Codec failures. None of these are fatal; the caller logs and drops the frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The frame did not even contain the one-byte packet tag.
    Empty,
    /// The tag byte does not name a known packet kind.
    UnknownKind(u8),
    /// The frame length disagrees with the layout of its kind.
    WrongSize { kind: PacketKind, expected: usize, actual: usize },
    /// A lambda type byte outside the known range.
    UnknownLambdaType(u8),
    /// A cache policy byte outside the known range.
    UnknownCachePolicy(u8),
    /// The declared string length does not match the bytes left in the frame.
    StringLength { declared: usize, available: usize },
    /// A name longer than the fixed wire field.
    NameTooLong(usize),
    /// A string result longer than the u16 length prefix can express.
    StringTooLong(usize),
    /// Read past the end of the frame.
    UnexpectedEnd,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Empty => write!(f, "frame too short for packet type detection"),
            Error::UnknownKind(tag) => write!(f, "unknown packet type {}", tag),
            Error::WrongSize { kind, expected, actual } => {
                write!(f, "{} expects {} bytes, frame has {}", kind, expected, actual)
            }
            Error::UnknownLambdaType(b) => write!(f, "unknown lambda type {}", b),
            Error::UnknownCachePolicy(b) => write!(f, "unknown cache policy {}", b),
            Error::StringLength { declared, available } => {
                write!(f, "string declares {} bytes, frame carries {}", declared, available)
            }
            Error::NameTooLong(len) => write!(f, "name of {} bytes does not fit the name field", len),
            Error::StringTooLong(len) => write!(f, "string of {} bytes exceeds the length prefix", len),
            Error::UnexpectedEnd => write!(f, "unexpected end of frame"),
        }
    }
}

impl std::error::Error for Error {}

/// A specialized Result type for codec operations.
pub type Result<T> = std::result::Result<T, Error>;
