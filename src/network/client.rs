//! Message client
//!
//! Connects to a server and exchanges typed messages through a processor.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;

use super::connection::{Connection, ConnectionError, ConnectionResult};
use super::NetworkConfig;
use crate::processor::Processor;
use crate::protocol::{Decoded, Message};

/// Client side of a connection
pub struct Client<C> {
    conn: Connection,
    processor: Arc<Processor<C>>,
}

impl<C> Client<C> {
    /// Connect to a server, giving up after the configured timeout
    pub async fn connect(
        addr: SocketAddr,
        config: &NetworkConfig,
        processor: Arc<Processor<C>>,
    ) -> ConnectionResult<Self> {
        let timeout = Duration::from_millis(config.connect_timeout_ms);
        let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| ConnectionError::Timeout)??;
        stream.set_nodelay(true)?;

        tracing::info!("Connected to {}", addr);
        Ok(Self {
            conn: Connection::new(stream, addr, config),
            processor,
        })
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.conn.remote_addr()
    }

    /// Underlying framed connection, for statistics
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Encode and send a typed message
    pub async fn send(&mut self, message: &dyn Message) -> ConnectionResult<()> {
        let frame = self.processor.encode(message)?;
        self.conn.send(&frame).await
    }

    /// Receive and decode the next frame (None when the server closed)
    pub async fn recv(&mut self) -> ConnectionResult<Option<Decoded>> {
        match self.conn.recv().await? {
            Some(frame) => Ok(Some(self.processor.decode(frame)?)),
            None => Ok(None),
        }
    }

    /// Receive with a timeout
    pub async fn recv_timeout(&mut self, timeout: Duration) -> ConnectionResult<Option<Decoded>> {
        match tokio::time::timeout(timeout, self.recv()).await {
            Ok(result) => result,
            Err(_) => Err(ConnectionError::Timeout),
        }
    }

    /// Close the connection
    pub async fn close(mut self) -> ConnectionResult<()> {
        self.conn.shutdown().await
    }
}
