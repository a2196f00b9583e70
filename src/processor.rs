//! Message processor
//!
//! The processor is configured once at startup through a
//! `ProcessorBuilder`, then frozen with `build()`. The built `Processor` has
//! no mutating methods, so registering schemas or changing the byte order
//! while traffic flows cannot happen: every change has to go through the
//! builder, before the transport starts accepting connections.

use std::sync::Arc;

use bytes::Bytes;

use crate::protocol::{
    ByteOrder, Codec, CodecResult, Decoded, EncodedFrame, Message, MessageId, MessageInfo,
    RawMessage, Registry, RegistryResult, Schema,
};
use crate::routing::{DispatchResult, Dispatcher, Router};

/// Startup-time configuration of a `Processor`
pub struct ProcessorBuilder<C> {
    registry: Registry<C>,
    byte_order: ByteOrder,
}

impl<C> ProcessorBuilder<C> {
    pub fn new() -> Self {
        Self {
            registry: Registry::new(),
            byte_order: ByteOrder::default(),
        }
    }

    /// Bind `id` to schema `T`
    pub fn register<T: Schema>(&mut self, id: MessageId) -> RegistryResult<&mut Self> {
        self.registry.register::<T>(id)?;
        Ok(self)
    }

    pub fn set_byte_order(&mut self, byte_order: ByteOrder) -> &mut Self {
        self.byte_order = byte_order;
        self
    }

    /// Local handler for `T`, run on the thread that routes the message
    pub fn set_handler<T, F>(&mut self, handler: F) -> RegistryResult<&mut Self>
    where
        T: Schema,
        F: Fn(&T, &C) + Send + Sync + 'static,
    {
        self.registry.set_handler::<T, F>(handler)?;
        Ok(self)
    }

    /// Router that receives every routed `T`
    pub fn set_router<T: Schema>(&mut self, router: Arc<dyn Router<C>>) -> RegistryResult<&mut Self> {
        self.registry.set_router::<T>(router)?;
        Ok(self)
    }

    /// Raw handler for `id`; frames with this ID skip deserialization
    pub fn set_raw_handler<F>(&mut self, id: MessageId, handler: F) -> RegistryResult<&mut Self>
    where
        F: Fn(MessageId, &Bytes, &C) + Send + Sync + 'static,
    {
        self.registry.set_raw_handler(id, handler)?;
        Ok(self)
    }

    pub fn range<F>(&self, visit: F)
    where
        F: FnMut(MessageId, &'static str),
    {
        self.registry.range(visit)
    }

    pub fn registry(&self) -> &Registry<C> {
        &self.registry
    }

    /// Freeze the configuration
    pub fn build(self) -> Processor<C> {
        tracing::debug!(
            "Processor built with {} messages, {:?}",
            self.registry.len(),
            self.byte_order
        );

        let registry = Arc::new(self.registry);
        Processor {
            codec: Codec::new(registry.clone(), self.byte_order),
            dispatcher: Dispatcher::new(registry.clone()),
            registry,
        }
    }
}

impl<C> Default for ProcessorBuilder<C> {
    fn default() -> Self {
        Self::new()
    }
}

/// Frozen registry, codec and dispatcher, shared across connections
pub struct Processor<C> {
    registry: Arc<Registry<C>>,
    codec: Codec<C>,
    dispatcher: Dispatcher<C>,
}

impl<C> Processor<C> {
    pub fn builder() -> ProcessorBuilder<C> {
        ProcessorBuilder::new()
    }

    pub fn encode(&self, message: &dyn Message) -> CodecResult<EncodedFrame> {
        self.codec.encode(message)
    }

    pub fn encode_raw(&self, raw: &RawMessage) -> CodecResult<EncodedFrame> {
        self.codec.encode_raw(raw)
    }

    pub fn decode(&self, frame: Bytes) -> CodecResult<Decoded> {
        self.codec.decode(frame)
    }

    pub fn route(&self, decoded: Decoded, context: C) -> DispatchResult<()> {
        self.dispatcher.route(decoded, context)
    }

    pub fn range<F>(&self, visit: F)
    where
        F: FnMut(MessageId, &'static str),
    {
        self.registry.range(visit)
    }

    /// Registry entries in registration order
    pub fn messages(&self) -> impl Iterator<Item = &MessageInfo<C>> + '_ {
        self.registry.iter()
    }

    pub fn registry(&self) -> &Registry<C> {
        &self.registry
    }

    pub fn byte_order(&self) -> ByteOrder {
        self.codec.byte_order()
    }
}

impl<C> std::fmt::Debug for Processor<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Processor")
            .field("registry", &self.registry)
            .field("byte_order", &self.byte_order())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Bincode, CodecError, Json, PayloadFormat, RegistryError};
    use serde::{Deserialize, Serialize};
    use std::sync::Mutex;
    use tokio_test::{assert_err, assert_ok};

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct Ping {
        seq: u32,
    }

    impl Schema for Ping {
        const TAG: &'static str = "Ping";
        type Format = Bincode;
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Chat {
        from: String,
        text: String,
    }

    impl Schema for Chat {
        const TAG: &'static str = "Chat";
        type Format = Json;
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    struct Ctx(u64);

    #[test]
    fn test_ping_scenario() {
        let calls: Arc<Mutex<Vec<(Ping, Ctx)>>> = Arc::default();

        let mut builder = Processor::<Ctx>::builder();
        builder.set_byte_order(ByteOrder::BigEndian);
        builder.register::<Ping>(1).unwrap();
        let seen = calls.clone();
        builder
            .set_handler::<Ping, _>(move |ping, ctx| seen.lock().unwrap().push((ping.clone(), *ctx)))
            .unwrap();
        let processor = builder.build();

        let frame = processor.encode(&Ping { seq: 7 }).unwrap();
        let (header, payload) = frame.clone().into_parts();
        assert_eq!(header, [0x00, 0x01]);
        assert_eq!(&payload[..], Bincode::serialize(&Ping { seq: 7 }).unwrap().as_slice());

        let decoded = processor.decode(frame.to_bytes()).unwrap();
        assert_eq!(decoded.tag(), Some("Ping"));

        processor.route(decoded, Ctx(99)).unwrap();
        assert_eq!(*calls.lock().unwrap(), vec![(Ping { seq: 7 }, Ctx(99))]);
    }

    #[test]
    fn test_roundtrip_every_registered_schema() {
        for byte_order in [ByteOrder::BigEndian, ByteOrder::LittleEndian] {
            let mut builder = Processor::<()>::builder();
            builder.set_byte_order(byte_order);
            builder.register::<Ping>(1).unwrap().register::<Chat>(300).unwrap();
            let processor = builder.build();

            let ping = Ping::default();
            let frame = processor.encode(&ping).unwrap();
            let back = processor.decode(frame.to_bytes()).unwrap();
            assert_eq!(back.into_message::<Ping>(), Some(ping));

            let chat = Chat {
                from: "ann".into(),
                text: "glhf".into(),
            };
            let frame = processor.encode(&chat).unwrap();
            let back = processor.decode(frame.to_bytes()).unwrap();
            assert_eq!(back.into_message::<Chat>(), Some(chat));
        }
    }

    #[test]
    fn test_byte_orders_disagree() {
        let mut big = Processor::<()>::builder();
        big.register::<Chat>(300).unwrap();
        let big = big.build();

        let mut little = Processor::<()>::builder();
        little.set_byte_order(ByteOrder::LittleEndian);
        little.register::<Chat>(300).unwrap();
        let little = little.build();

        let chat = Chat {
            from: "a".into(),
            text: "b".into(),
        };
        let frame = big.encode(&chat).unwrap();
        // 300 = 0x012c, read back as 0x2c01
        let err = assert_err!(little.decode(frame.to_bytes()));
        assert!(matches!(err, CodecError::UnknownId(0x2c01)));
    }

    #[test]
    fn test_configuration_errors_surface_from_builder() {
        let mut builder = Processor::<()>::builder();
        assert_ok!(builder.register::<Ping>(1));
        assert_eq!(
            builder.register::<Chat>(1).err(),
            Some(RegistryError::IdInUse {
                id: 1,
                existing: "Ping",
                tag: "Chat"
            })
        );
        assert_eq!(
            builder.set_raw_handler(2, |_, _, _| {}).err(),
            Some(RegistryError::UnknownId(2))
        );

        let mut ids = Vec::new();
        builder.range(|id, tag| ids.push((id, tag)));
        assert_eq!(ids, vec![(1, "Ping")]);
    }

    #[test]
    fn test_processor_is_shareable() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Processor<Ctx>>();
    }

    #[test]
    fn test_messages_lists_attachments() {
        let mut builder = Processor::<()>::builder();
        builder.register::<Ping>(1).unwrap();
        builder.register::<Chat>(2).unwrap();
        builder.set_raw_handler(2, |_, _, _| {}).unwrap();
        let processor = builder.build();

        let summary: Vec<_> = processor
            .messages()
            .map(|info| (info.id(), info.format(), info.has_raw_handler()))
            .collect();
        assert_eq!(summary, vec![(1, "bincode", false), (2, "json", true)]);
    }
}
