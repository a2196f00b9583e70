//! Connection handling
//!
//! Manages individual peer connections, including:
//! - Length-prefixed framing of codec frames
//! - Per-connection statistics
//! - The session handle passed to handlers as routing context

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::NetworkConfig;
use crate::protocol::{ByteOrder, CodecError, EncodedFrame, Message, RawMessage, Schema};

/// Size of the length prefix in front of every frame
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Connection errors
#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Frame too large: {0} bytes (max: {1})")]
    FrameTooLarge(usize, usize),

    #[error("Connection closed")]
    Closed,

    #[error("Connection timeout")]
    Timeout,

    #[error("Send channel closed")]
    SendChannelClosed,
}

pub type ConnectionResult<T> = Result<T, ConnectionError>;

/// Splits a byte stream into length-prefixed frames.
///
/// The prefix counts the ID header and payload, and is written in the same
/// byte order as the ID header.
#[derive(Debug)]
pub struct FrameCodec {
    byte_order: ByteOrder,
    max_frame_size: usize,
    state: DecodeState,
}

#[derive(Debug, Default)]
enum DecodeState {
    #[default]
    Length,
    Frame {
        length: usize,
    },
}

impl FrameCodec {
    /// `max_frame_size` is capped at what the `u32` prefix can describe
    pub fn new(byte_order: ByteOrder, max_frame_size: usize) -> Self {
        Self {
            byte_order,
            max_frame_size: max_frame_size.min(u32::MAX as usize),
            state: DecodeState::Length,
        }
    }

    /// Append one length-prefixed frame to `buf`
    pub fn encode(&self, frame: &EncodedFrame, buf: &mut BytesMut) -> ConnectionResult<()> {
        if frame.len() > self.max_frame_size {
            return Err(ConnectionError::FrameTooLarge(frame.len(), self.max_frame_size));
        }

        buf.reserve(LENGTH_PREFIX_SIZE + frame.len());
        buf.put_slice(&self.byte_order.encode_u32(frame.len() as u32));
        frame.write_to(buf);
        Ok(())
    }

    /// Attempt to take one frame off the front of `buf`.
    /// Returns Ok(None) if more data is needed.
    pub fn decode(&mut self, buf: &mut BytesMut) -> ConnectionResult<Option<Bytes>> {
        loop {
            match self.state {
                DecodeState::Length => {
                    if buf.len() < LENGTH_PREFIX_SIZE {
                        return Ok(None);
                    }

                    let length = self
                        .byte_order
                        .decode_u32([buf[0], buf[1], buf[2], buf[3]]) as usize;
                    if length > self.max_frame_size {
                        return Err(ConnectionError::FrameTooLarge(length, self.max_frame_size));
                    }

                    buf.advance(LENGTH_PREFIX_SIZE);
                    self.state = DecodeState::Frame { length };
                }
                DecodeState::Frame { length } => {
                    if buf.len() < length {
                        return Ok(None);
                    }

                    let frame = buf.split_to(length).freeze();
                    self.state = DecodeState::Length;
                    return Ok(Some(frame));
                }
            }
        }
    }
}

/// Connection statistics
#[derive(Debug, Default, Clone)]
pub struct ConnectionStats {
    /// Frames sent
    pub frames_sent: u64,
    /// Frames received
    pub frames_received: u64,
    /// Bytes sent
    pub bytes_sent: u64,
    /// Bytes received
    pub bytes_received: u64,
}

/// A framed connection to a remote peer
pub struct Connection {
    /// Remote peer address
    remote_addr: SocketAddr,
    /// The TCP stream
    stream: TcpStream,
    /// Length-prefix framing
    framing: FrameCodec,
    /// Read buffer
    read_buf: BytesMut,
    /// Write buffer
    write_buf: BytesMut,
    /// Statistics
    stats: ConnectionStats,
}

impl Connection {
    /// Create a new connection from an established TCP stream
    pub fn new(stream: TcpStream, remote_addr: SocketAddr, config: &NetworkConfig) -> Self {
        Self {
            remote_addr,
            stream,
            framing: FrameCodec::new(config.byte_order, config.max_frame_size),
            read_buf: BytesMut::with_capacity(4096),
            write_buf: BytesMut::with_capacity(4096),
            stats: ConnectionStats::default(),
        }
    }

    /// Get the remote address
    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// Get connection statistics
    pub fn stats(&self) -> &ConnectionStats {
        &self.stats
    }

    /// Send one frame
    pub async fn send(&mut self, frame: &EncodedFrame) -> ConnectionResult<()> {
        self.write_buf.clear();
        self.framing.encode(frame, &mut self.write_buf)?;

        self.stream.write_all(&self.write_buf).await?;
        self.stream.flush().await?;

        self.stats.frames_sent += 1;
        self.stats.bytes_sent += self.write_buf.len() as u64;

        Ok(())
    }

    /// Receive one frame (returns None when the peer closed cleanly)
    pub async fn recv(&mut self) -> ConnectionResult<Option<Bytes>> {
        loop {
            if let Some(frame) = self.framing.decode(&mut self.read_buf)? {
                self.stats.frames_received += 1;
                return Ok(Some(frame));
            }

            let mut buf = [0u8; 4096];
            let n = self.stream.read(&mut buf).await?;

            if n == 0 {
                if self.read_buf.is_empty() {
                    return Ok(None);
                } else {
                    return Err(ConnectionError::Closed);
                }
            }

            self.read_buf.extend_from_slice(&buf[..n]);
            self.stats.bytes_received += n as u64;
        }
    }

    /// Try to receive a frame with a timeout
    pub async fn recv_timeout(&mut self, timeout: Duration) -> ConnectionResult<Option<Bytes>> {
        match tokio::time::timeout(timeout, self.recv()).await {
            Ok(result) => result,
            Err(_) => Err(ConnectionError::Timeout),
        }
    }

    /// Close the write half
    pub async fn shutdown(&mut self) -> ConnectionResult<()> {
        self.stream.shutdown().await?;
        Ok(())
    }
}

/// Outbound item queued by a session
#[derive(Debug)]
pub enum Outbound {
    Message(Box<dyn Message>),
    Raw(RawMessage),
}

/// Routing context for a served connection.
///
/// Cloned into every routed message; replies are queued and written by the
/// connection task.
#[derive(Clone, Debug)]
pub struct Session {
    id: Uuid,
    addr: SocketAddr,
    sender: mpsc::UnboundedSender<Outbound>,
    connected: Arc<AtomicBool>,
}

impl Session {
    pub fn new(addr: SocketAddr, sender: mpsc::UnboundedSender<Outbound>) -> Self {
        Self {
            id: Uuid::new_v4(),
            addr,
            sender,
            connected: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Queue a typed message for this peer
    pub fn reply<T: Schema>(&self, message: T) -> ConnectionResult<()> {
        self.send(Outbound::Message(Box::new(message)))
    }

    /// Queue an undecoded payload for this peer, framed under its own ID
    pub fn reply_raw(&self, raw: RawMessage) -> ConnectionResult<()> {
        self.send(Outbound::Raw(raw))
    }

    fn send(&self, outbound: Outbound) -> ConnectionResult<()> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(ConnectionError::Closed);
        }

        self.sender
            .send(outbound)
            .map_err(|_| ConnectionError::SendChannelClosed)
    }

    /// Check if the connection is still active
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Mark the connection as disconnected
    pub fn mark_disconnected(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Bincode, Registry};
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Serialize, Deserialize)]
    struct Move {
        x: i16,
    }

    impl Schema for Move {
        const TAG: &'static str = "test.Move";
        type Format = Bincode;
    }

    fn encoded(byte_order: ByteOrder) -> EncodedFrame {
        let mut registry = Registry::<()>::new();
        registry.register::<Move>(5).unwrap();
        crate::protocol::Codec::new(Arc::new(registry), byte_order)
            .encode(&Move { x: -1 })
            .unwrap()
    }

    #[test]
    fn test_length_prefix_layout() {
        let frame = encoded(ByteOrder::BigEndian);
        let framing = FrameCodec::new(ByteOrder::BigEndian, 1024);
        let mut buf = BytesMut::new();
        framing.encode(&frame, &mut buf).unwrap();

        assert_eq!(&buf[..4], &[0, 0, 0, 4]);
        assert_eq!(&buf[4..6], &[0, 5]);
        assert_eq!(buf.len(), 8);
    }

    #[test]
    fn test_partial_frames_wait_for_more_data() {
        let frame = encoded(ByteOrder::LittleEndian);
        let mut framing = FrameCodec::new(ByteOrder::LittleEndian, 1024);
        let mut wire = BytesMut::new();
        framing.encode(&frame, &mut wire).unwrap();
        framing.encode(&frame, &mut wire).unwrap();

        let mut buf = BytesMut::new();
        buf.extend_from_slice(&wire[..3]);
        assert!(framing.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(&wire[3..7]);
        assert!(framing.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(&wire[7..]);

        assert_eq!(framing.decode(&mut buf).unwrap(), Some(frame.to_bytes()));
        assert_eq!(framing.decode(&mut buf).unwrap(), Some(frame.to_bytes()));
        assert!(framing.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_oversized_frames_are_rejected() {
        let mut framing = FrameCodec::new(ByteOrder::BigEndian, 16);
        let mut buf = BytesMut::from(&[0u8, 0, 1, 0][..]);
        assert!(matches!(
            framing.decode(&mut buf),
            Err(ConnectionError::FrameTooLarge(256, 16))
        ));

        let framing = FrameCodec::new(ByteOrder::BigEndian, 2);
        let mut out = BytesMut::new();
        assert!(matches!(
            framing.encode(&encoded(ByteOrder::BigEndian), &mut out),
            Err(ConnectionError::FrameTooLarge(4, 2))
        ));
    }

    #[test]
    fn test_max_frame_size_fits_length_prefix() {
        let framing = FrameCodec::new(ByteOrder::BigEndian, usize::MAX);
        assert_eq!(framing.max_frame_size, u32::MAX as usize);

        let framing = FrameCodec::new(ByteOrder::BigEndian, 1024);
        assert_eq!(framing.max_frame_size, 1024);
    }

    #[tokio::test]
    async fn test_session_reply_after_disconnect() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let session = Session::new("127.0.0.1:1".parse().unwrap(), tx);

        session.reply(Move { x: 3 }).unwrap();
        assert!(matches!(rx.recv().await, Some(Outbound::Message(_))));
        assert!(session.is_connected());

        session.mark_disconnected();
        assert!(!session.is_connected());
        assert!(matches!(
            session.reply(Move { x: 4 }),
            Err(ConnectionError::Closed)
        ));
    }
}
