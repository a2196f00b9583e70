//! Protocol module - Message schemas, the message registry and the wire codec
//!
//! Every frame on the wire is laid out as:
//! - 2 bytes message ID (byte order configurable, big-endian by default)
//! - Variable length payload, serialized by the schema's payload format
//!
//! The frame carries no length of its own; delimiting frames is the
//! transport's job (see [`crate::network`]).

mod codec;
mod format;
mod message;
mod registry;

pub use codec::*;
pub use format::*;
pub use message::*;
pub use registry::*;

/// Size of the message ID header
pub const ID_HEADER_SIZE: usize = 2;

/// Maximum number of schemas a registry can hold (one per `u16` ID)
pub const MAX_MESSAGES: usize = 1 << 16;

/// Default port for the reference transport
pub const DEFAULT_PORT: u16 = 24900;
