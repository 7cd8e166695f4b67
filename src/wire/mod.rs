//! Debuggee side: the ikp3db length-framed JSON protocol over TCP
//!
//! - **framing**: `length=<N><MAGIC><json>` frames
//! - **message**: command vocabulary and inbound messages/events
//! - **pending**: request id → continuation table
//! - **client**: connection, retry policy and reply correlation

pub mod client;
pub mod error;
pub mod framing;
pub mod message;
pub mod pending;

pub use client::{ClientEvent, DebuggeeClient, Endpoint, RetryPolicy};
pub use error::WireError;
