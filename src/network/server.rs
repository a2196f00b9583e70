//! Message server
//!
//! Accepts connections and feeds every inbound frame through the processor,
//! using a `Session` as the routing context.

use bytes::Bytes;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use super::connection::{Connection, Outbound, Session};
use super::NetworkConfig;
use crate::processor::Processor;

/// Server errors
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Bind failed: {0}")]
    BindFailed(String),
}

pub type ServerResult<T> = Result<T, ServerError>;

/// TCP server driving a shared `Processor`
pub struct Server {
    /// Server configuration
    config: NetworkConfig,
    /// Bound listener
    listener: TcpListener,
}

impl Server {
    /// Bind the listening socket
    pub async fn bind(config: NetworkConfig) -> ServerResult<Self> {
        let bind_addr = format!("{}:{}", config.bind_address, config.port);
        let listener = TcpListener::bind(&bind_addr).await.map_err(|e| {
            ServerError::BindFailed(format!("Failed to bind to {}: {}", bind_addr, e))
        })?;

        tracing::info!("Server listening on {}", listener.local_addr()?);
        Ok(Self { config, listener })
    }

    pub fn local_addr(&self) -> ServerResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until `shutdown` resolves.
    ///
    /// Open connections are aborted once the accept loop stops.
    pub async fn serve<F>(self, processor: Arc<Processor<Session>>, shutdown: F) -> ServerResult<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                result = self.listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            tracing::info!("New connection from {}", addr);
                            let processor = processor.clone();
                            let config = self.config.clone();
                            connections.spawn(handle_client(stream, addr, processor, config));
                        }
                        Err(e) => {
                            tracing::error!("Accept error: {}", e);
                        }
                    }
                }
                Some(result) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(e) = result {
                        tracing::error!("Client handler error: {}", e);
                    }
                }
                _ = &mut shutdown => {
                    tracing::info!("Server shutdown requested");
                    break;
                }
            }
        }

        connections.shutdown().await;
        tracing::info!("Server stopped");
        Ok(())
    }
}

/// Handle a client connection
async fn handle_client(
    stream: TcpStream,
    addr: SocketAddr,
    processor: Arc<Processor<Session>>,
    config: NetworkConfig,
) {
    let mut conn = Connection::new(stream, addr, &config);

    let (tx, mut outbound_rx) = mpsc::unbounded_channel::<Outbound>();
    let session = Session::new(addr, tx);
    tracing::debug!("Session {} started for {}", session.id(), addr);

    let disconnect_reason = loop {
        tokio::select! {
            result = conn.recv() => {
                match result {
                    Ok(Some(frame)) => dispatch(&processor, frame, &session),
                    Ok(None) => break "Connection closed".to_string(),
                    Err(e) => break format!("Error: {}", e),
                }
            }

            Some(outbound) = outbound_rx.recv() => {
                let frame = match &outbound {
                    Outbound::Message(message) => processor.encode(&**message),
                    Outbound::Raw(raw) => processor.encode_raw(raw),
                };
                match frame {
                    Ok(frame) => {
                        if let Err(e) = conn.send(&frame).await {
                            break format!("Send error: {}", e);
                        }
                    }
                    Err(e) => tracing::warn!("Dropping outbound message to {}: {}", addr, e),
                }
            }
        }
    };

    session.mark_disconnected();
    tracing::info!(
        "Session {} ({}) ended: {} [{} frames in, {} frames out]",
        session.id(),
        addr,
        disconnect_reason,
        conn.stats().frames_received,
        conn.stats().frames_sent
    );

    let _ = conn.shutdown().await;
}

/// Decode and route one inbound frame; failures drop the frame only
fn dispatch(processor: &Processor<Session>, frame: Bytes, session: &Session) {
    let decoded = match processor.decode(frame) {
        Ok(decoded) => decoded,
        Err(e) => {
            tracing::warn!("Dropping frame from {}: {}", session.addr(), e);
            return;
        }
    };

    if let Err(e) = processor.route(decoded, session.clone()) {
        tracing::warn!("Failed to route frame from {}: {}", session.addr(), e);
    }
}
