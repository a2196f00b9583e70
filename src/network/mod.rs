//! Network module - Reference TCP transport for the message processor
//!
//! Provides:
//! - Server for accepting connections and routing their frames
//! - Client for connecting to a server
//! - Length-prefixed connection framing and per-connection sessions

mod client;
mod connection;
mod server;

pub use client::*;
pub use connection::*;
pub use server::*;

use std::net::SocketAddr;

use crate::protocol::{ByteOrder, DEFAULT_PORT};

/// Configuration for network operations
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Address to bind to
    pub bind_address: String,
    /// Port to listen on or connect to
    pub port: u16,
    /// Byte order of length prefixes and ID headers
    pub byte_order: ByteOrder,
    /// Maximum frame size (ID header + payload)
    pub max_frame_size: usize,
    /// Connection timeout in milliseconds
    pub connect_timeout_ms: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            byte_order: ByteOrder::default(),
            max_frame_size: 64 * 1024,
            connect_timeout_ms: 5000,
        }
    }
}

impl NetworkConfig {
    pub fn new(port: u16) -> Self {
        Self {
            port,
            ..Default::default()
        }
    }

    pub fn with_bind_address(mut self, bind_address: impl Into<String>) -> Self {
        self.bind_address = bind_address.into();
        self
    }

    pub fn with_byte_order(mut self, byte_order: ByteOrder) -> Self {
        self.byte_order = byte_order;
        self
    }

    pub fn with_max_frame_size(mut self, max_frame_size: usize) -> Self {
        self.max_frame_size = max_frame_size;
        self
    }
}

/// Resolve a hostname to a socket address
pub async fn resolve_host(host: &str, port: u16) -> std::io::Result<SocketAddr> {
    use tokio::net::lookup_host;

    let addr_string = format!("{}:{}", host, port);
    let mut addrs = lookup_host(&addr_string).await?;

    addrs.next().ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("Could not resolve host: {}", host),
        )
    })
}
