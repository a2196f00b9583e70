//! Message definitions
//!
//! A schema is a plain Rust type that carries an explicit, stable tag. The
//! registry indexes on that tag, so identity never depends on how the
//! compiler lays types out.

use std::any::Any;
use std::fmt;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::format::PayloadFormat;

/// Numeric identifier written in the frame header
pub type MessageId = u16;

/// An application-defined message shape.
///
/// ```ignore
/// #[derive(Debug, Serialize, Deserialize)]
/// struct Ping { seq: u32 }
///
/// impl Schema for Ping {
///     const TAG: &'static str = "game.Ping";
///     type Format = Bincode;
/// }
/// ```
pub trait Schema: Serialize + DeserializeOwned + fmt::Debug + Send + Sync + 'static {
    /// Stable registry tag. Must be non-empty and unique within a registry.
    const TAG: &'static str;

    /// Serialization used for this schema's payload
    type Format: PayloadFormat;
}

/// Type-erased message instance
pub trait Message: Any + fmt::Debug + Send + Sync {
    /// Registry tag of the concrete schema
    fn tag(&self) -> &'static str;

    fn as_any(&self) -> &dyn Any;

    fn into_any(self: Box<Self>) -> Box<dyn Any + Send + Sync>;
}

impl<T: Schema> Message for T {
    fn tag(&self) -> &'static str {
        T::TAG
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any + Send + Sync> {
        self
    }
}

impl dyn Message {
    /// Check whether the message is an instance of `T`
    pub fn is<T: Schema>(&self) -> bool {
        self.as_any().is::<T>()
    }

    pub fn downcast_ref<T: Schema>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }

    /// Take ownership of the concrete message
    pub fn downcast<T: Schema>(self: Box<Self>) -> Option<Box<T>> {
        self.into_any().downcast::<T>().ok()
    }
}

/// A frame whose payload was left undecoded because a raw handler is
/// attached to its ID.
///
/// The payload shares the buffer handed to the codec; `Bytes` is immutable,
/// so the original frame cannot change underneath it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    id: MessageId,
    payload: Bytes,
}

impl RawMessage {
    pub fn new(id: MessageId, payload: Bytes) -> Self {
        Self { id, payload }
    }

    pub fn id(&self) -> MessageId {
        self.id
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn into_payload(self) -> Bytes {
        self.payload
    }
}

/// Result of decoding a frame
#[derive(Debug)]
pub enum Decoded {
    /// A fully deserialized schema instance
    Message(Box<dyn Message>),
    /// An undecoded payload destined for a raw handler
    Raw(RawMessage),
}

impl Decoded {
    /// Wrap an in-memory message so it can be routed
    pub fn message<T: Schema>(message: T) -> Self {
        Decoded::Message(Box::new(message))
    }

    /// Tag of the typed message, `None` for raw frames
    pub fn tag(&self) -> Option<&'static str> {
        match self {
            Decoded::Message(message) => Some(message.tag()),
            Decoded::Raw(_) => None,
        }
    }

    pub fn as_raw(&self) -> Option<&RawMessage> {
        match self {
            Decoded::Raw(raw) => Some(raw),
            Decoded::Message(_) => None,
        }
    }

    /// Extract a typed message of schema `T`
    pub fn into_message<T: Schema>(self) -> Option<T> {
        match self {
            Decoded::Message(message) => message.downcast::<T>().map(|m| *m),
            Decoded::Raw(_) => None,
        }
    }
}

impl From<RawMessage> for Decoded {
    fn from(raw: RawMessage) -> Self {
        Decoded::Raw(raw)
    }
}
