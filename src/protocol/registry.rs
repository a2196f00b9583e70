//! Message registry
//!
//! Binds message IDs to schemas in both directions and carries the optional
//! handler, router and raw handler attached to each schema.
//!
//! Registration is append-only. Entries live in a vector in registration
//! order; a dense table indexed by ID and a tag map both point into it, so
//! decode-side and encode-side lookups are O(1) against a single structure.

use std::any::{type_name, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use thiserror::Error;

use super::format::{FormatResult, PayloadFormat};
use super::message::{Message, MessageId, Schema};
use super::MAX_MESSAGES;
use crate::routing::Router;

/// Registry configuration errors.
///
/// These are programming mistakes found during startup; a server must not
/// start serving with a registry that produced one.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Invalid schema {0}: tag must not be empty")]
    InvalidSchema(&'static str),

    #[error("Message {tag} is already registered with ID {id}")]
    AlreadyRegistered { tag: &'static str, id: MessageId },

    #[error("Message ID {id} is already bound to {existing}, cannot bind {tag}")]
    IdInUse {
        id: MessageId,
        existing: &'static str,
        tag: &'static str,
    },

    /// Unreachable while IDs are unique: once 65536 schemas are registered
    /// every ID is taken and `IdInUse` is returned first.
    #[error("Too many messages (max = {0})")]
    Overflow(usize),

    #[error("Message {0} not registered")]
    UnknownSchema(&'static str),

    #[error("Message ID {0} not registered")]
    UnknownId(MessageId),
}

pub type RegistryResult<T> = Result<T, RegistryError>;

/// Local handler, invoked on the routing thread
pub type Handler<C> = Arc<dyn Fn(&dyn Message, &C) + Send + Sync>;

/// Handler for undecoded payloads
pub type RawHandler<C> = Arc<dyn Fn(MessageId, &Bytes, &C) + Send + Sync>;

type EncodeFn = fn(&dyn Message) -> Option<FormatResult<Vec<u8>>>;
type DecodeFn = fn(&[u8]) -> FormatResult<Box<dyn Message>>;

fn encode_payload<T: Schema>(message: &dyn Message) -> Option<FormatResult<Vec<u8>>> {
    message
        .downcast_ref::<T>()
        .map(|message| T::Format::serialize(message))
}

fn decode_payload<T: Schema>(bytes: &[u8]) -> FormatResult<Box<dyn Message>> {
    let message: T = T::Format::deserialize(bytes)?;
    Ok(Box::new(message))
}

/// Everything the registry knows about one schema
pub struct MessageInfo<C> {
    id: MessageId,
    tag: &'static str,
    type_id: TypeId,
    type_name: &'static str,
    format: &'static str,
    encode: EncodeFn,
    decode: DecodeFn,
    handler: Option<Handler<C>>,
    router: Option<Arc<dyn Router<C>>>,
    raw_handler: Option<RawHandler<C>>,
}

impl<C> MessageInfo<C> {
    fn new<T: Schema>(id: MessageId) -> Self {
        Self {
            id,
            tag: T::TAG,
            type_id: TypeId::of::<T>(),
            type_name: type_name::<T>(),
            format: T::Format::NAME,
            encode: encode_payload::<T>,
            decode: decode_payload::<T>,
            handler: None,
            router: None,
            raw_handler: None,
        }
    }

    pub fn id(&self) -> MessageId {
        self.id
    }

    pub fn tag(&self) -> &'static str {
        self.tag
    }

    /// Rust type name of the bound schema
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Name of the payload format
    pub fn format(&self) -> &'static str {
        self.format
    }

    pub fn has_handler(&self) -> bool {
        self.handler.is_some()
    }

    pub fn has_router(&self) -> bool {
        self.router.is_some()
    }

    pub fn has_raw_handler(&self) -> bool {
        self.raw_handler.is_some()
    }

    /// Check that `message` is an instance of this exact schema
    pub fn matches(&self, message: &dyn Message) -> bool {
        message.as_any().type_id() == self.type_id
    }

    pub(crate) fn handler(&self) -> Option<&Handler<C>> {
        self.handler.as_ref()
    }

    pub(crate) fn router(&self) -> Option<&Arc<dyn Router<C>>> {
        self.router.as_ref()
    }

    pub(crate) fn raw_handler(&self) -> Option<&RawHandler<C>> {
        self.raw_handler.as_ref()
    }

    pub(crate) fn encode_payload(&self, message: &dyn Message) -> Option<FormatResult<Vec<u8>>> {
        (self.encode)(message)
    }

    pub(crate) fn decode_payload(&self, bytes: &[u8]) -> FormatResult<Box<dyn Message>> {
        (self.decode)(bytes)
    }
}

impl<C> fmt::Debug for MessageInfo<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageInfo")
            .field("id", &self.id)
            .field("tag", &self.tag)
            .field("type_name", &self.type_name)
            .field("format", &self.format)
            .field("handler", &self.has_handler())
            .field("router", &self.has_router())
            .field("raw_handler", &self.has_raw_handler())
            .finish()
    }
}

/// Bidirectional ID/schema registry.
///
/// `C` is the context value the transport passes alongside each message.
pub struct Registry<C> {
    entries: Vec<MessageInfo<C>>,
    /// Indexed by message ID, points into `entries`
    by_id: Vec<Option<u16>>,
    by_tag: HashMap<&'static str, u16>,
}

impl<C> Registry<C> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            by_id: Vec::new(),
            by_tag: HashMap::new(),
        }
    }

    /// Number of registered schemas
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Bind `id` to schema `T`.
    ///
    /// Rejects an empty tag, a schema registered twice, and an ID already
    /// bound to another schema. A failed call leaves the registry untouched.
    pub fn register<T: Schema>(&mut self, id: MessageId) -> RegistryResult<()> {
        if T::TAG.is_empty() {
            return Err(RegistryError::InvalidSchema(type_name::<T>()));
        }
        if let Some(existing) = self.by_tag(T::TAG) {
            return Err(RegistryError::AlreadyRegistered {
                tag: T::TAG,
                id: existing.id,
            });
        }
        if let Some(existing) = self.by_id(id) {
            return Err(RegistryError::IdInUse {
                id,
                existing: existing.tag,
                tag: T::TAG,
            });
        }
        if self.entries.len() >= MAX_MESSAGES {
            return Err(RegistryError::Overflow(MAX_MESSAGES));
        }

        let slot = self.entries.len() as u16;
        let index = usize::from(id);
        if self.by_id.len() <= index {
            self.by_id.resize(index + 1, None);
        }
        self.by_id[index] = Some(slot);
        self.by_tag.insert(T::TAG, slot);
        self.entries.push(MessageInfo::new::<T>(id));

        tracing::debug!("Registered message {} with ID {}", T::TAG, id);
        Ok(())
    }

    /// Attach (or replace) the local handler for schema `T`
    pub fn set_handler<T, F>(&mut self, handler: F) -> RegistryResult<()>
    where
        T: Schema,
        F: Fn(&T, &C) + Send + Sync + 'static,
    {
        let info = self.entry_mut::<T>()?;
        info.handler = Some(Arc::new(move |message: &dyn Message, context: &C| {
            if let Some(message) = message.downcast_ref::<T>() {
                handler(message, context);
            }
        }));
        tracing::debug!("Handler set for message {}", T::TAG);
        Ok(())
    }

    /// Attach (or replace) the router that receives schema `T`
    pub fn set_router<T: Schema>(&mut self, router: Arc<dyn Router<C>>) -> RegistryResult<()> {
        let info = self.entry_mut::<T>()?;
        info.router = Some(router);
        tracing::debug!("Router set for message {}", T::TAG);
        Ok(())
    }

    /// Attach (or replace) the raw handler for `id`.
    ///
    /// Frames with this ID are no longer deserialized by the codec.
    pub fn set_raw_handler<F>(&mut self, id: MessageId, handler: F) -> RegistryResult<()>
    where
        F: Fn(MessageId, &Bytes, &C) + Send + Sync + 'static,
    {
        let slot = self.slot_of_id(id).ok_or(RegistryError::UnknownId(id))?;
        self.entries[slot].raw_handler = Some(Arc::new(handler));
        tracing::debug!("Raw handler set for message ID {}", id);
        Ok(())
    }

    /// Look up the entry bound to `id`
    pub fn by_id(&self, id: MessageId) -> Option<&MessageInfo<C>> {
        self.slot_of_id(id).map(|slot| &self.entries[slot])
    }

    /// Look up the entry bound to `tag`
    pub fn by_tag(&self, tag: &str) -> Option<&MessageInfo<C>> {
        self.by_tag
            .get(tag)
            .map(|&slot| &self.entries[usize::from(slot)])
    }

    /// Look up the entry for a message instance.
    ///
    /// The concrete type must match the registered one, so two schemas that
    /// share a tag by mistake never alias each other.
    pub fn lookup(&self, message: &dyn Message) -> Option<&MessageInfo<C>> {
        self.by_tag(message.tag())
            .filter(|info| info.matches(message))
    }

    /// ID bound to schema `T`
    pub fn id_of<T: Schema>(&self) -> Option<MessageId> {
        self.by_tag(T::TAG).map(|info| info.id)
    }

    /// Iterate over all entries in registration order
    pub fn iter(&self) -> impl Iterator<Item = &MessageInfo<C>> + '_ {
        self.entries.iter()
    }

    /// Visit every `(id, tag)` pair in registration order
    pub fn range<F>(&self, mut visit: F)
    where
        F: FnMut(MessageId, &'static str),
    {
        for info in &self.entries {
            visit(info.id, info.tag);
        }
    }

    fn slot_of_id(&self, id: MessageId) -> Option<usize> {
        self.by_id
            .get(usize::from(id))
            .copied()
            .flatten()
            .map(usize::from)
    }

    fn entry_mut<T: Schema>(&mut self) -> RegistryResult<&mut MessageInfo<C>> {
        let slot = *self
            .by_tag
            .get(T::TAG)
            .ok_or(RegistryError::UnknownSchema(T::TAG))?;
        let info = &mut self.entries[usize::from(slot)];
        if info.type_id != TypeId::of::<T>() {
            return Err(RegistryError::UnknownSchema(T::TAG));
        }
        Ok(info)
    }
}

impl<C> Default for Registry<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> fmt::Debug for Registry<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.entries.iter()).finish()
    }
}
