//! Wire codec
//!
//! Converts between typed messages and `[id][payload]` frames using the
//! bindings held by the registry.

use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::format::FormatError;
use super::message::{Decoded, Message, MessageId, RawMessage};
use super::registry::Registry;
use super::ID_HEADER_SIZE;

/// Codec errors. All of them are recoverable; the caller decides whether to
/// drop the frame or the connection.
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Frame too short: {0} bytes")]
    FrameTooShort(usize),

    #[error("Message ID {0} not registered")]
    UnknownId(MessageId),

    #[error("Message {0} not registered")]
    NotRegistered(&'static str),

    #[error("Payload error: {0}")]
    Payload(#[from] FormatError),
}

pub type CodecResult<T> = Result<T, CodecError>;

/// Byte order of the ID header.
///
/// Fixed when the processor is built. Both peers must agree on it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ByteOrder {
    #[default]
    #[serde(rename = "big")]
    BigEndian,
    #[serde(rename = "little")]
    LittleEndian,
}

impl ByteOrder {
    pub fn encode_u16(self, value: u16) -> [u8; 2] {
        match self {
            ByteOrder::BigEndian => value.to_be_bytes(),
            ByteOrder::LittleEndian => value.to_le_bytes(),
        }
    }

    pub fn decode_u16(self, bytes: [u8; 2]) -> u16 {
        match self {
            ByteOrder::BigEndian => u16::from_be_bytes(bytes),
            ByteOrder::LittleEndian => u16::from_le_bytes(bytes),
        }
    }

    pub fn encode_u32(self, value: u32) -> [u8; 4] {
        match self {
            ByteOrder::BigEndian => value.to_be_bytes(),
            ByteOrder::LittleEndian => value.to_le_bytes(),
        }
    }

    pub fn decode_u32(self, bytes: [u8; 4]) -> u32 {
        match self {
            ByteOrder::BigEndian => u32::from_be_bytes(bytes),
            ByteOrder::LittleEndian => u32::from_le_bytes(bytes),
        }
    }
}

/// An encoded frame: the ID header followed by the payload.
///
/// No length prefix is included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedFrame {
    header: [u8; ID_HEADER_SIZE],
    payload: Bytes,
}

impl EncodedFrame {
    pub fn header(&self) -> [u8; ID_HEADER_SIZE] {
        self.header
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Total size of header and payload
    pub fn len(&self) -> usize {
        ID_HEADER_SIZE + self.payload.len()
    }

    /// Append header and payload to `buf`
    pub fn write_to(&self, buf: &mut BytesMut) {
        buf.reserve(self.len());
        buf.put_slice(&self.header);
        buf.put_slice(&self.payload);
    }

    /// Header and payload as one contiguous buffer
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.len());
        self.write_to(&mut buf);
        buf.freeze()
    }

    pub fn into_parts(self) -> ([u8; ID_HEADER_SIZE], Bytes) {
        (self.header, self.payload)
    }
}

/// Encodes and decodes frames against a shared registry
pub struct Codec<C> {
    registry: Arc<Registry<C>>,
    byte_order: ByteOrder,
}

impl<C> Codec<C> {
    pub fn new(registry: Arc<Registry<C>>, byte_order: ByteOrder) -> Self {
        Self {
            registry,
            byte_order,
        }
    }

    pub fn byte_order(&self) -> ByteOrder {
        self.byte_order
    }

    /// Encode a typed message into a frame
    pub fn encode(&self, message: &dyn Message) -> CodecResult<EncodedFrame> {
        let info = self
            .registry
            .lookup(message)
            .ok_or(CodecError::NotRegistered(message.tag()))?;

        let payload = info
            .encode_payload(message)
            .ok_or(CodecError::NotRegistered(message.tag()))??;

        tracing::trace!(
            "Encoded {} as ID {} ({} payload bytes)",
            info.tag(),
            info.id(),
            payload.len()
        );

        Ok(EncodedFrame {
            header: self.byte_order.encode_u16(info.id()),
            payload: Bytes::from(payload),
        })
    }

    /// Re-frame an undecoded payload under its ID
    pub fn encode_raw(&self, raw: &RawMessage) -> CodecResult<EncodedFrame> {
        if self.registry.by_id(raw.id()).is_none() {
            return Err(CodecError::UnknownId(raw.id()));
        }

        Ok(EncodedFrame {
            header: self.byte_order.encode_u16(raw.id()),
            payload: raw.payload().clone(),
        })
    }

    /// Decode one frame.
    ///
    /// When a raw handler is attached to the frame's ID the payload is
    /// returned as a slice of `frame` without being deserialized.
    pub fn decode(&self, frame: Bytes) -> CodecResult<Decoded> {
        if frame.len() < ID_HEADER_SIZE {
            return Err(CodecError::FrameTooShort(frame.len()));
        }

        let id = self.byte_order.decode_u16([frame[0], frame[1]]);
        let info = self.registry.by_id(id).ok_or(CodecError::UnknownId(id))?;

        if info.has_raw_handler() {
            tracing::trace!("Decoded raw frame with ID {}", id);
            return Ok(Decoded::Raw(RawMessage::new(
                id,
                frame.slice(ID_HEADER_SIZE..),
            )));
        }

        let message = info.decode_payload(&frame[ID_HEADER_SIZE..])?;
        tracing::trace!("Decoded {} from ID {}", info.tag(), id);
        Ok(Decoded::Message(message))
    }
}

impl<C> std::fmt::Debug for Codec<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Codec")
            .field("byte_order", &self.byte_order)
            .field("messages", &self.registry.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Bincode, Json, PayloadFormat, Schema};
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Ping {
        seq: u32,
    }

    impl Schema for Ping {
        const TAG: &'static str = "test.Ping";
        type Format = Bincode;
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Say {
        text: String,
    }

    impl Schema for Say {
        const TAG: &'static str = "test.Say";
        type Format = Json;
    }

    #[derive(Debug, Serialize, Deserialize)]
    struct Stray;

    impl Schema for Stray {
        const TAG: &'static str = "test.Stray";
        type Format = Bincode;
    }

    fn codec(byte_order: ByteOrder) -> Codec<()> {
        let mut registry = Registry::new();
        registry.register::<Ping>(1).unwrap();
        registry.register::<Say>(0x0102).unwrap();
        Codec::new(Arc::new(registry), byte_order)
    }

    #[test]
    fn test_ping_frame_layout() {
        let codec = codec(ByteOrder::BigEndian);
        let frame = codec.encode(&Ping { seq: 7 }).unwrap();

        assert_eq!(frame.header(), [0x00, 0x01]);
        assert_eq!(
            &frame.payload()[..],
            Bincode::serialize(&Ping { seq: 7 }).unwrap().as_slice()
        );

        let decoded = codec.decode(frame.to_bytes()).unwrap();
        assert_eq!(decoded.into_message::<Ping>(), Some(Ping { seq: 7 }));
    }

    #[test]
    fn test_little_endian_header() {
        let codec = codec(ByteOrder::LittleEndian);
        let frame = codec.encode(&Say { text: "gg".into() }).unwrap();
        assert_eq!(frame.header(), [0x02, 0x01]);
        assert_eq!(&frame.payload()[..], br#"{"text":"gg"}"#);

        let decoded = codec.decode(frame.to_bytes()).unwrap();
        assert_eq!(
            decoded.into_message::<Say>(),
            Some(Say { text: "gg".into() })
        );
    }

    #[test]
    fn test_encode_unregistered() {
        let codec = codec(ByteOrder::BigEndian);
        let err = codec.encode(&Stray).unwrap_err();
        assert!(matches!(err, CodecError::NotRegistered("test.Stray")));
    }

    #[test]
    fn test_decode_short_frames() {
        let codec = codec(ByteOrder::BigEndian);
        assert!(matches!(
            codec.decode(Bytes::new()),
            Err(CodecError::FrameTooShort(0))
        ));
        assert!(matches!(
            codec.decode(Bytes::from_static(&[0x00])),
            Err(CodecError::FrameTooShort(1))
        ));
    }

    #[test]
    fn test_decode_unknown_id() {
        let codec = codec(ByteOrder::BigEndian);
        assert!(matches!(
            codec.decode(Bytes::from_static(&[0x00, 0x09])),
            Err(CodecError::UnknownId(9))
        ));
    }

    #[test]
    fn test_decode_propagates_payload_error() {
        let codec = codec(ByteOrder::BigEndian);
        let err = codec
            .decode(Bytes::from_static(&[0x01, 0x02, b'{', b'x']))
            .unwrap_err();
        assert!(matches!(err, CodecError::Payload(FormatError::Json(_))));
    }

    #[derive(Debug, Serialize, Deserialize)]
    struct Scores {
        by_pair: std::collections::BTreeMap<(u8, u8), u8>,
    }

    impl Schema for Scores {
        const TAG: &'static str = "test.Scores";
        type Format = Json;
    }

    #[test]
    fn test_encode_propagates_payload_error() {
        let mut registry = Registry::<()>::new();
        registry.register::<Scores>(1).unwrap();
        let codec = Codec::new(Arc::new(registry), ByteOrder::BigEndian);

        // JSON object keys must be strings
        let scores = Scores {
            by_pair: [((1, 2), 3)].into_iter().collect(),
        };
        let err = codec.encode(&scores).unwrap_err();
        assert!(matches!(err, CodecError::Payload(FormatError::Json(_))));
    }

    #[test]
    fn test_raw_handler_bypasses_deserialization() {
        let mut registry = Registry::<()>::new();
        registry.register::<Ping>(1).unwrap();
        registry.set_raw_handler(1, |_, _, _| {}).unwrap();
        let codec = Codec::new(Arc::new(registry), ByteOrder::BigEndian);

        // Not a valid bincode Ping, would fail if deserialized
        let frame = Bytes::from_static(&[0x00, 0x01, 0xde, 0xad]);
        let decoded = codec.decode(frame.clone()).unwrap();
        let raw = decoded.as_raw().unwrap();

        assert_eq!(raw.id(), 1);
        assert_eq!(&raw.payload()[..], &[0xde_u8, 0xad][..]);
        // Shares the input buffer
        assert_eq!(raw.payload().as_ptr(), frame[2..].as_ptr());

        let reframed = codec.encode_raw(raw).unwrap();
        assert_eq!(reframed.to_bytes(), frame);
    }

    #[test]
    fn test_raw_frame_with_empty_payload() {
        let mut registry = Registry::<()>::new();
        registry.register::<Stray>(4).unwrap();
        registry.set_raw_handler(4, |_, _, _| {}).unwrap();
        let codec = Codec::new(Arc::new(registry), ByteOrder::BigEndian);

        let decoded = codec.decode(Bytes::from_static(&[0x00, 0x04])).unwrap();
        assert!(decoded.as_raw().unwrap().payload().is_empty());
    }

    #[test]
    fn test_encode_raw_unknown_id() {
        let codec = codec(ByteOrder::BigEndian);
        let raw = RawMessage::new(42, Bytes::from_static(b"x"));
        assert!(matches!(
            codec.encode_raw(&raw),
            Err(CodecError::UnknownId(42))
        ));
    }
}
