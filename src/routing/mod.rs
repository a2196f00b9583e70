//! Routing module - Delivers decoded messages
//!
//! Provides:
//! - The dispatcher, which runs local handlers and forwards to routers
//! - The `Router` seam and a tokio-backed reference router

mod dispatcher;
mod router;

pub use dispatcher::*;
pub use router::*;
