//! Message framing layer
//!
//! Wraps a raw chunk [`Transport`] and turns it into a transport of whole
//! messages. The frame layout is supplied by a [`FrameFormat`]: the
//! front-end protocol uses `Content-Length` headers, the debuggee wire
//! protocol uses a `length=<N><MAGIC>` prefix.

use crate::io::transport::{Transport, TransportError};
use async_trait::async_trait;
use std::marker::PhantomData;
use tracing::trace;

/// Error types for message framing
#[derive(Debug, thiserror::Error)]
pub enum FramingError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Invalid message format: {0}")]
    InvalidFormat(String),

    #[error("Invalid content length: {0}")]
    InvalidContentLength(String),

    #[error("Message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },
}

impl FramingError {
    /// Whether the underlying connection is gone, as opposed to one bad frame
    pub fn is_disconnect(&self) -> bool {
        matches!(self, FramingError::Transport(_))
    }
}

/// Maximum message size to prevent memory exhaustion
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024; // 16MB

/// A frame layout: how to wrap one payload and how to cut one payload off
/// the front of an accumulation buffer
pub trait FrameFormat: Send + Sync + 'static {
    /// Wrap a payload into a frame
    fn encode(payload: &str) -> String;

    /// Remove and return the first complete payload from `buffer`
    ///
    /// Returns `Ok(None)` when more data is needed. On `Err` the offending
    /// bytes must already have been removed so that the next call can make
    /// progress.
    fn decode(buffer: &mut String) -> Result<Option<String>, FramingError>;
}

/// Framing wrapper around any transport
pub struct Framed<T: Transport, F: FrameFormat> {
    /// Underlying transport
    transport: T,

    /// Buffer for accumulating partial messages
    receive_buffer: String,

    _format: PhantomData<F>,
}

impl<T: Transport, F: FrameFormat> Framed<T, F> {
    /// Create a new framing wrapper around a transport
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            receive_buffer: String::new(),
            _format: PhantomData,
        }
    }
}

#[async_trait]
impl<T: Transport, F: FrameFormat> Transport for Framed<T, F> {
    async fn send(&mut self, message: &str) -> Result<(), TransportError> {
        trace!("Framed: Sending framed message ({} bytes content)", message.len());
        self.transport.send(&F::encode(message)).await
    }

    async fn receive(&mut self) -> Result<String, TransportError> {
        self.receive_message().await.map_err(|e| match e {
            FramingError::Transport(inner) => inner,
            other => TransportError::Channel(other.to_string()),
        })
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.transport.close().await
    }

    fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }
}

impl<T: Transport, F: FrameFormat> Framed<T, F> {
    /// Receive the next whole message, keeping framing errors distinguishable
    /// from transport errors
    ///
    /// Every complete message already buffered is returned before the
    /// transport is read again. Cancel-safe: data is only moved into the
    /// buffer after the underlying read has completed.
    pub async fn receive_message(&mut self) -> Result<String, FramingError> {
        loop {
            if let Some(message) = F::decode(&mut self.receive_buffer)? {
                trace!("Framed: Parsed complete message ({} bytes)", message.len());
                return Ok(message);
            }
            let new_data = self.transport.receive().await?;
            self.receive_buffer.push_str(&new_data);
        }
    }
}
