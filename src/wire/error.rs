use std::io;

use crate::io::transport::TransportError;

/// Errors of the debuggee connection
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("Could not connect to debuggee at {endpoint} after {attempts} attempt(s): {source}")]
    Connect {
        endpoint: String,
        attempts: u32,
        #[source]
        source: io::Error,
    },

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("JSON serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Connection attempt cancelled")]
    Cancelled,
}
