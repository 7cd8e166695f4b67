//! I/O layer - Generic abstractions for process management and transport
//!
//! - **Transport**: Pure I/O layer for bidirectional exchange of text chunks
//! - **Framing**: Whole-message transport on top of a chunk transport
//! - **Process**: Debuggee interpreter lifecycle with output forwarding
//!
//! Nothing here knows about either debugging protocol.

pub mod framing;
pub mod process;
pub mod transport;

pub use process::{DebuggeeProcess, ProcessError, ProcessEvent, ProcessSpec};
pub use transport::{StreamTransport, Transport};
