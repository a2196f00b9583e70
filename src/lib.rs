//! msgproc - Message processing core for real-time servers
//!
//! Binds stable 16-bit message IDs to typed schemas, encodes and decodes
//! `[id][payload]` frames, and dispatches decoded messages to local
//! handlers or asynchronous routers.
//!
//! ```ignore
//! let mut builder = Processor::<Session>::builder();
//! builder.register::<Ping>(1)?;
//! builder.set_handler::<Ping, _>(|ping, session| {
//!     let _ = session.reply(Pong { seq: ping.seq, sent_at_us: ping.sent_at_us });
//! })?;
//! let processor = Arc::new(builder.build());
//! ```

pub mod config;
pub mod messages;
pub mod network;
pub mod processor;
pub mod protocol;
pub mod routing;

pub use processor::{Processor, ProcessorBuilder};
pub use protocol::{
    Bincode, ByteOrder, CodecError, Decoded, EncodedFrame, Json, Message, MessageId,
    PayloadFormat, RawMessage, RegistryError, Schema,
};
pub use routing::{ChannelRouter, DispatchError, Router, RouterBuilder};
