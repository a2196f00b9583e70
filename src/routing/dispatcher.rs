//! Message dispatcher
//!
//! For a typed message the local handler runs first, on the calling thread,
//! then the message is submitted to its router. Raw frames only ever reach
//! their raw handler.

use std::sync::Arc;

use thiserror::Error;

use crate::protocol::{Decoded, MessageId, Registry};

/// Dispatch errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("Message ID {0} not registered")]
    UnknownId(MessageId),

    #[error("Message {0} not registered")]
    NotRegistered(&'static str),
}

pub type DispatchResult<T> = Result<T, DispatchError>;

/// Routes decoded messages using the attachments held by the registry
pub struct Dispatcher<C> {
    registry: Arc<Registry<C>>,
}

impl<C> Dispatcher<C> {
    pub fn new(registry: Arc<Registry<C>>) -> Self {
        Self { registry }
    }

    /// Deliver one decoded message.
    ///
    /// Router submission is fire-and-forget; this returns as soon as the
    /// local handler has run and the submission has been handed over.
    pub fn route(&self, decoded: Decoded, context: C) -> DispatchResult<()> {
        match decoded {
            Decoded::Raw(raw) => {
                let info = self
                    .registry
                    .by_id(raw.id())
                    .ok_or(DispatchError::UnknownId(raw.id()))?;

                if let Some(handler) = info.raw_handler() {
                    tracing::trace!("Routing raw message ID {} to raw handler", raw.id());
                    handler(raw.id(), raw.payload(), &context);
                }
                Ok(())
            }
            Decoded::Message(message) => {
                let info = self
                    .registry
                    .lookup(&*message)
                    .ok_or(DispatchError::NotRegistered(message.tag()))?;

                if let Some(handler) = info.handler() {
                    tracing::trace!("Routing {} to local handler", info.tag());
                    handler(&*message, &context);
                }
                if let Some(router) = info.router() {
                    tracing::trace!("Submitting {} to router", info.tag());
                    router.submit(info.tag(), message, context);
                }
                Ok(())
            }
        }
    }
}

impl<C> std::fmt::Debug for Dispatcher<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("messages", &self.registry.len())
            .finish()
    }
}
