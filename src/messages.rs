//! Built-in messages used by the `msgproc` binary and its tests

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::network::Session;
use crate::processor::{Processor, ProcessorBuilder};
use crate::protocol::{Bincode, ByteOrder, Json, RawMessage, RegistryResult, Schema};
use crate::routing::Router;

/// Message IDs of the built-in messages
pub mod ids {
    use crate::protocol::MessageId;

    pub const PING: MessageId = 1;
    pub const PONG: MessageId = 2;
    pub const ECHO: MessageId = 3;
    pub const NOTICE: MessageId = 4;
}

/// Latency probe
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ping {
    pub seq: u32,
    /// Sender clock, microseconds since the Unix epoch
    pub sent_at_us: u64,
}

impl Schema for Ping {
    const TAG: &'static str = "msgproc.Ping";
    type Format = Bincode;
}

/// Answer to a `Ping`, echoing its fields
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pong {
    pub seq: u32,
    pub sent_at_us: u64,
}

impl Schema for Pong {
    const TAG: &'static str = "msgproc.Pong";
    type Format = Bincode;
}

/// Opaque bytes; servers return the payload untouched
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Echo {
    pub data: Vec<u8>,
}

impl Schema for Echo {
    const TAG: &'static str = "msgproc.Echo";
    type Format = Bincode;
}

/// Free-form text announcement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notice {
    pub text: String,
}

impl Schema for Notice {
    const TAG: &'static str = "msgproc.Notice";
    type Format = Json;
}

/// Register every built-in message under its ID
pub fn register_builtin<C>(builder: &mut ProcessorBuilder<C>) -> RegistryResult<()> {
    builder
        .register::<Ping>(ids::PING)?
        .register::<Pong>(ids::PONG)?
        .register::<Echo>(ids::ECHO)?
        .register::<Notice>(ids::NOTICE)?;
    Ok(())
}

/// Processor used by `msgproc serve`.
///
/// - `Ping` is answered with a `Pong` by a local handler
/// - `Echo` frames are sent back verbatim through a raw handler
/// - `Notice` goes to `router`, when one is given
pub fn server_processor(
    byte_order: ByteOrder,
    router: Option<Arc<dyn Router<Session>>>,
) -> RegistryResult<Processor<Session>> {
    let mut builder = Processor::<Session>::builder();
    builder.set_byte_order(byte_order);
    register_builtin(&mut builder)?;

    builder.set_handler::<Ping, _>(|ping, session| {
        let pong = Pong {
            seq: ping.seq,
            sent_at_us: ping.sent_at_us,
        };
        if let Err(e) = session.reply(pong) {
            tracing::debug!("Cannot answer ping from {}: {}", session.addr(), e);
        }
    })?;

    builder.set_raw_handler(ids::ECHO, |id, payload, session| {
        if let Err(e) = session.reply_raw(RawMessage::new(id, payload.clone())) {
            tracing::debug!("Cannot echo to {}: {}", session.addr(), e);
        }
    })?;

    if let Some(router) = router {
        builder.set_router::<Notice>(router)?;
    }

    Ok(builder.build())
}

/// Microseconds since the Unix epoch
pub fn now_us() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::Outbound;
    use crate::protocol::Decoded;
    use tokio::sync::mpsc;

    #[test]
    fn test_builtin_registration() {
        let mut builder = Processor::<()>::builder();
        register_builtin(&mut builder).unwrap();

        let mut seen = Vec::new();
        builder.range(|id, tag| seen.push((id, tag)));
        assert_eq!(
            seen,
            vec![
                (ids::PING, Ping::TAG),
                (ids::PONG, Pong::TAG),
                (ids::ECHO, Echo::TAG),
                (ids::NOTICE, Notice::TAG),
            ]
        );
    }

    #[test]
    fn test_registering_builtins_twice_fails() {
        let mut builder = Processor::<()>::builder();
        register_builtin(&mut builder).unwrap();
        assert!(register_builtin(&mut builder).is_err());
        assert_eq!(builder.registry().len(), 4);
    }

    #[tokio::test]
    async fn test_server_processor_answers_ping() {
        let processor = server_processor(ByteOrder::BigEndian, None).unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let session = Session::new("127.0.0.1:9".parse().unwrap(), tx);

        let ping = Ping {
            seq: 7,
            sent_at_us: 11,
        };
        let frame = processor.encode(&ping).unwrap();
        let decoded = processor.decode(frame.to_bytes()).unwrap();
        processor.route(decoded, session).unwrap();

        match rx.recv().await {
            Some(Outbound::Message(message)) => {
                let pong = message.downcast::<Pong>().unwrap();
                assert_eq!(*pong, Pong { seq: 7, sent_at_us: 11 });
            }
            other => panic!("unexpected outbound: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_server_processor_echoes_raw() {
        let processor = server_processor(ByteOrder::LittleEndian, None).unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let session = Session::new("127.0.0.1:9".parse().unwrap(), tx);

        let echo = Echo {
            data: vec![1, 2, 3],
        };
        let frame = processor.encode(&echo).unwrap().to_bytes();
        let decoded = processor.decode(frame.clone()).unwrap();
        assert!(matches!(decoded, Decoded::Raw(_)));
        processor.route(decoded, session).unwrap();

        match rx.recv().await {
            Some(Outbound::Raw(raw)) => {
                let reframed = processor.encode_raw(&raw).unwrap();
                assert_eq!(reframed.to_bytes(), frame);
            }
            other => panic!("unexpected outbound: {:?}", other),
        }
    }
}
