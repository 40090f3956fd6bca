//! Error types for the frame server and the MJPEG reader.

use std::io::ErrorKind;
use std::net::SocketAddr;

/// Errors produced while serving or reading MJPEG streams.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("connection lost: {0}")]
    ConnectionLost(#[source] std::io::Error),

    #[error("unsupported content type: {0}")]
    ProtocolMismatch(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("timed out")]
    Timeout,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StreamError {
    /// Returns `true` when the peer went away (reset, broken pipe, EOF).
    ///
    /// Disconnects are the normal way a viewer ends a stream and are logged
    /// at a lower level than other connection errors.
    pub fn is_disconnect(&self) -> bool {
        match self {
            StreamError::ConnectionLost(_) => true,
            StreamError::Io(e) => matches!(
                e.kind(),
                ErrorKind::BrokenPipe
                    | ErrorKind::ConnectionReset
                    | ErrorKind::ConnectionAborted
                    | ErrorKind::UnexpectedEof
            ),
            _ => false,
        }
    }
}
