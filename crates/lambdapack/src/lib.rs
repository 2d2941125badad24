//! # LambdaPack
//!
//! Wire format for calling typed lambdas that live on a small device.
//!
//! ## Philosophy
//!
//! A frame is a flat, packed record: a one-byte tag followed by fields at fixed
//! offsets. There is no schema negotiation and no optional fields; a frame
//! either has exactly the size of its kind or it is rejected. This keeps the
//! device side trivial and makes a truncated or corrupted frame impossible to
//! misread as a valid one.
//!
//! Framing (where one packet ends and the next begins) is the transport's job.

pub mod cursor;
pub mod error;
pub mod ieee754;
pub mod packet;
pub mod types;

pub use error::Error;
pub use error::Result;
pub use packet::Packet;
pub use packet::PacketKind;
pub use packet::MAX_PACKET_SIZE;
pub use types::CachePolicy;
pub use types::LambdaId;
pub use types::LambdaType;
pub use types::NameField;
pub use types::Value;
pub use types::MAX_LAMBDAS;
pub use types::MAX_NAME_LENGTH;
