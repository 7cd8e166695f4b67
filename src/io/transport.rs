//! Transport layer - Pure I/O abstraction for message exchange
//!
//! This module provides the core transport abstraction that handles
//! bidirectional exchange of raw text chunks without knowledge of message
//! framing. The same transport carries the front-end protocol (stdio or a
//! TCP client) and the debuggee wire protocol (TCP).

use async_trait::async_trait;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{error, trace};

// ============================================================================
// Constants
// ============================================================================

/// Size of the read buffer for stream reading operations
const READ_BUFFER_SIZE: usize = 4096;

/// Default capacity for UTF-8 accumulation buffer
const UTF8_ACCUMULATION_BUFFER_CAPACITY: usize = 8192;

/// Error types shared by all transports
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Transport is disconnected")]
    Disconnected,

    #[error("Channel error: {0}")]
    Channel(String),
}

/// Core transport trait for bidirectional message exchange
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a chunk of text
    async fn send(&mut self, message: &str) -> Result<(), TransportError>;

    /// Receive the next chunk of text as it arrived from the peer
    async fn receive(&mut self) -> Result<String, TransportError>;

    /// Close the transport
    async fn close(&mut self) -> Result<(), TransportError>;

    /// Check if transport is still active
    fn is_connected(&self) -> bool;
}

/// Type-erased transport used where the concrete stream is chosen at runtime
pub type BoxedTransport = Box<dyn Transport>;

#[async_trait]
impl<T: Transport + ?Sized> Transport for Box<T> {
    async fn send(&mut self, message: &str) -> Result<(), TransportError> {
        (**self).send(message).await
    }

    async fn receive(&mut self) -> Result<String, TransportError> {
        (**self).receive().await
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        (**self).close().await
    }

    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }
}

// ============================================================================
// Stream Transport Implementation
// ============================================================================

/// Transport implementation over any pair of async byte streams
#[derive(Debug)]
pub struct StreamTransport {
    /// Channel feeding the writer task
    outbound: Option<mpsc::UnboundedSender<String>>,

    /// Channel fed by the reader task
    inbound: Option<mpsc::UnboundedReceiver<String>>,

    /// Connection status
    connected: bool,
}

/// Accumulates raw bytes and releases them only on UTF-8 character boundaries
pub(crate) struct Utf8Accumulator {
    /// Buffer for accumulating raw bytes before UTF-8 conversion
    byte_buffer: Vec<u8>,

    /// Buffer capacity to avoid frequent reallocations
    buffer_capacity: usize,
}

impl Utf8Accumulator {
    pub(crate) fn new() -> Self {
        Self {
            byte_buffer: Vec::with_capacity(UTF8_ACCUMULATION_BUFFER_CAPACITY),
            buffer_capacity: UTF8_ACCUMULATION_BUFFER_CAPACITY,
        }
    }

    pub(crate) fn add_bytes(&mut self, bytes: &[u8]) {
        self.byte_buffer.extend_from_slice(bytes);
    }

    /// Take the longest valid UTF-8 prefix, keeping an incomplete trailing
    /// sequence for the next read
    pub(crate) fn extract_valid_utf8(&mut self) -> Option<String> {
        if self.byte_buffer.is_empty() {
            return None;
        }

        let valid_end = match std::str::from_utf8(&self.byte_buffer) {
            Ok(_) => self.byte_buffer.len(),
            Err(e) if e.error_len().is_some() => {
                // Genuinely invalid bytes; replace them rather than stalling forever
                let lossy = String::from_utf8_lossy(&self.byte_buffer).into_owned();
                self.byte_buffer.clear();
                return Some(lossy);
            }
            Err(e) => e.valid_up_to(),
        };

        if valid_end == 0 {
            return None;
        }

        let bytes: Vec<u8> = self.byte_buffer.drain(..valid_end).collect();
        String::from_utf8(bytes).ok()
    }

    fn compact(&mut self) {
        if self.byte_buffer.capacity() > self.buffer_capacity * 2 {
            self.byte_buffer.shrink_to(self.buffer_capacity);
        }
    }

    fn pending_bytes(&self) -> usize {
        self.byte_buffer.len()
    }
}

impl StreamTransport {
    /// Create a transport from a reader and a writer, spawning one task for each
    pub fn new<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (outbound_sender, outbound_receiver) = mpsc::unbounded_channel();
        let (inbound_sender, inbound_receiver) = mpsc::unbounded_channel();

        tokio::spawn(Self::writer_task(writer, outbound_receiver));
        tokio::spawn(Self::reader_task(reader, inbound_sender));

        Self {
            outbound: Some(outbound_sender),
            inbound: Some(inbound_receiver),
            connected: true,
        }
    }

    /// Transport over an established TCP connection
    pub fn from_tcp(stream: TcpStream) -> Self {
        if let Err(e) = stream.set_nodelay(true) {
            trace!("StreamTransport: could not set TCP_NODELAY: {}", e);
        }
        let (reader, writer) = stream.into_split();
        Self::new(reader, writer)
    }

    /// Transport over this process's own stdin/stdout
    pub fn stdio() -> Self {
        Self::new(tokio::io::stdin(), tokio::io::stdout())
    }

    async fn writer_task<W>(mut writer: W, mut receiver: mpsc::UnboundedReceiver<String>)
    where
        W: AsyncWrite + Unpin,
    {
        while let Some(message) = receiver.recv().await {
            trace!(
                "StreamTransport: Writing message (length: {})",
                message.len()
            );

            if let Err(e) = writer.write_all(message.as_bytes()).await {
                error!("Failed to write to stream: {}", e);
                break;
            }

            if let Err(e) = writer.flush().await {
                error!("Failed to flush stream: {}", e);
                break;
            }
        }

        let _ = writer.shutdown().await;
        trace!("StreamTransport: writer task finished");
    }

    async fn reader_task<R>(reader: R, sender: mpsc::UnboundedSender<String>)
    where
        R: AsyncRead + Unpin,
    {
        let mut reader = BufReader::new(reader);
        let mut state = Utf8Accumulator::new();
        let mut read_buffer = Box::new([0u8; READ_BUFFER_SIZE]);

        loop {
            match reader.read(read_buffer.as_mut()).await {
                Ok(0) => {
                    trace!("StreamTransport: reader reached EOF");
                    if let Some(rest) = state.extract_valid_utf8() {
                        let _ = sender.send(rest);
                    }
                    if state.pending_bytes() > 0 {
                        error!(
                            "StreamTransport: {} incomplete bytes remaining at EOF",
                            state.pending_bytes()
                        );
                    }
                    break;
                }
                Ok(n) => {
                    state.add_bytes(&read_buffer[..n]);

                    while let Some(data) = state.extract_valid_utf8() {
                        if sender.send(data).is_err() {
                            trace!("StreamTransport: receiver dropped, stopping reader");
                            return;
                        }
                    }

                    state.compact();
                }
                Err(e) => {
                    error!("Failed to read from stream: {}", e);
                    break;
                }
            }
        }

        trace!("StreamTransport: reader task finished");
    }
}

#[async_trait]
impl Transport for StreamTransport {
    async fn send(&mut self, message: &str) -> Result<(), TransportError> {
        if !self.connected {
            return Err(TransportError::Disconnected);
        }

        let sender = self
            .outbound
            .as_ref()
            .ok_or(TransportError::Disconnected)?;

        sender
            .send(message.to_string())
            .map_err(|e| TransportError::Channel(e.to_string()))
    }

    async fn receive(&mut self) -> Result<String, TransportError> {
        if !self.connected {
            return Err(TransportError::Disconnected);
        }

        let receiver = self
            .inbound
            .as_mut()
            .ok_or(TransportError::Disconnected)?;

        match receiver.recv().await {
            Some(data) => Ok(data),
            None => {
                self.connected = false;
                Err(TransportError::Disconnected)
            }
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.connected = false;
        self.outbound.take();
        self.inbound.take();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

// ============================================================================
// Mock Transport Implementation
// ============================================================================

#[cfg(test)]
/// In-memory transport for tests; the other end is a [`MockPeer`]
pub struct MockTransport {
    inbound: mpsc::UnboundedReceiver<String>,
    outbound: mpsc::UnboundedSender<String>,
    connected: bool,
}

#[cfg(test)]
/// Test-side handle of a [`MockTransport`]
pub struct MockPeer {
    inbound: Option<mpsc::UnboundedSender<String>>,
    outbound: mpsc::UnboundedReceiver<String>,
}

#[cfg(test)]
impl MockTransport {
    /// Create a connected transport/peer pair
    pub fn pair() -> (Self, MockPeer) {
        let (inbound_sender, inbound_receiver) = mpsc::unbounded_channel();
        let (outbound_sender, outbound_receiver) = mpsc::unbounded_channel();
        (
            Self {
                inbound: inbound_receiver,
                outbound: outbound_sender,
                connected: true,
            },
            MockPeer {
                inbound: Some(inbound_sender),
                outbound: outbound_receiver,
            },
        )
    }
}

#[cfg(test)]
impl MockPeer {
    /// Deliver a chunk to the transport's `receive`
    pub fn push(&self, chunk: impl Into<String>) {
        if let Some(sender) = &self.inbound {
            let _ = sender.send(chunk.into());
        }
    }

    /// Next chunk written through the transport's `send`
    pub async fn next_sent(&mut self) -> Option<String> {
        self.outbound.recv().await
    }

    /// Simulate the remote end hanging up
    pub fn hang_up(&mut self) {
        self.inbound.take();
    }
}

#[cfg(test)]
#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, message: &str) -> Result<(), TransportError> {
        if !self.connected {
            return Err(TransportError::Disconnected);
        }
        self.outbound
            .send(message.to_string())
            .map_err(|e| TransportError::Channel(e.to_string()))
    }

    async fn receive(&mut self) -> Result<String, TransportError> {
        if !self.connected {
            return Err(TransportError::Disconnected);
        }
        match self.inbound.recv().await {
            Some(chunk) => Ok(chunk),
            None => {
                self.connected = false;
                Err(TransportError::Disconnected)
            }
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.connected = false;
        self.inbound.close();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_stream_transport_tcp_echo() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 64];
            let n = socket.read(&mut buf).await.unwrap();
            socket.write_all(&buf[..n]).await.unwrap();
        });

        let stream = TcpStream::connect(addr).await.unwrap();
        let mut transport = StreamTransport::from_tcp(stream);
        transport.send("hello world").await.unwrap();

        let mut received = String::new();
        while received.len() < "hello world".len() {
            received.push_str(&transport.receive().await.unwrap());
        }
        assert_eq!(received, "hello world");
        assert!(transport.is_connected());

        server.await.unwrap();
        // Server side dropped the socket
        assert!(transport.receive().await.is_err());
        assert!(!transport.is_connected());
    }

    #[tokio::test]
    async fn test_mock_transport_send_receive() {
        let (mut transport, mut peer) = MockTransport::pair();

        peer.push("response1");
        peer.push("response2");
        transport.send("message1").await.unwrap();

        assert_eq!(transport.receive().await.unwrap(), "response1");
        assert_eq!(transport.receive().await.unwrap(), "response2");
        assert_eq!(peer.next_sent().await.unwrap(), "message1");

        peer.hang_up();
        assert!(transport.receive().await.is_err());
        assert!(!transport.is_connected());
    }

    #[tokio::test]
    async fn test_mock_transport_disconnect() {
        let (mut transport, _peer) = MockTransport::pair();

        assert!(transport.is_connected());
        transport.close().await.unwrap();

        assert!(!transport.is_connected());
        assert!(transport.send("test").await.is_err());
        assert!(transport.receive().await.is_err());
    }

    #[test]
    fn test_utf8_accumulator_partial_sequence() {
        let mut state = Utf8Accumulator::new();

        state.add_bytes(&[0xE4, 0xB8]); // First 2 bytes of "世"
        assert!(state.extract_valid_utf8().is_none());

        state.add_bytes(&[0x96]);
        assert_eq!(state.extract_valid_utf8().unwrap(), "世");
        assert!(state.extract_valid_utf8().is_none());
        assert_eq!(state.pending_bytes(), 0);
    }

    #[test]
    fn test_utf8_accumulator_mixed_boundaries() {
        let mut state = Utf8Accumulator::new();

        state.add_bytes("Hello ".as_bytes());
        assert_eq!(state.extract_valid_utf8().unwrap(), "Hello ");

        state.add_bytes(&[0xE4, 0xB8]);
        assert!(state.extract_valid_utf8().is_none());

        state.add_bytes(&[0x96, 0xE7, 0x95]); // Complete "世" + partial "界"
        assert_eq!(state.extract_valid_utf8().unwrap(), "世");

        state.add_bytes(&[0x8C, 0x20]);
        assert_eq!(state.extract_valid_utf8().unwrap(), "界 ");
        assert_eq!(state.pending_bytes(), 0);
    }

    #[test]
    fn test_utf8_accumulator_invalid_bytes_are_replaced() {
        let mut state = Utf8Accumulator::new();
        state.add_bytes(&[b'a', 0xFF, b'b']);
        assert_eq!(state.extract_valid_utf8().unwrap(), "a\u{FFFD}b");
    }
}
