use std::io;
use std::path::PathBuf;

use crate::dap::protocol::RequestError;
use crate::io::ProcessError;
use crate::session::handles::UnsupportedContainer;

/// Errors that fail a single front-end request
///
/// The display text becomes the `message` of the failed response.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Not connected to the debuggee")]
    NotConnected,

    #[error("Unknown variables reference {0}")]
    UnknownVariablesReference(i64),

    #[error("Unknown source reference {0}")]
    UnknownSourceReference(i64),

    /// The debuggee answered with an error status; holds its joined messages
    #[error("{0}")]
    CommandFailed(String),

    #[error("Request aborted: the debuggee connection closed")]
    Aborted,

    #[error(transparent)]
    InvalidRequest(#[from] RequestError),

    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("Could not read {}: {source}", path.display())]
    ReadSource {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error(transparent)]
    UnsupportedContainer(#[from] UnsupportedContainer),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
