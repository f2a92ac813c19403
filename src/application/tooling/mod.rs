mod client;
mod error;
mod transport;

pub use client::{RemoteToolClient, RemoteToolSchema, PROTOCOL_VERSION};
pub use error::{RemoteToolError, TransportError};
pub use transport::StdioTransport;
