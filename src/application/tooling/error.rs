use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport for server '{server}' is not connected")]
    NotConnected { server: String },
    #[error("failed to spawn server '{server}': {source}")]
    Spawn {
        server: String,
        #[source]
        source: std::io::Error,
    },
    #[error("timed out after {timeout:?} waiting for server '{server}'")]
    Timeout { server: String, timeout: Duration },
    #[error("server '{server}' process died")]
    ServerDied { server: String },
    #[error("server '{server}' closed its output stream")]
    ConnectionClosed { server: String },
    #[error("server '{server}' returned a malformed response: {source}")]
    MalformedResponse {
        server: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("i/o error talking to server '{server}': {source}")]
    Io {
        server: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum RemoteToolError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("server '{server}' rejected initialization: {message}")]
    Handshake { server: String, message: String },
}
