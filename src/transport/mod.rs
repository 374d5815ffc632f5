//! Transport module - connections that carry encoded messages.
//!
//! Provides:
//! - [`Transport`] - opens outbound, inbound or duplex connections
//! - [`OutConnection`] / [`InConnection`] - one encoded message at a time
//! - DIME connection halves over any `AsyncRead`/`AsyncWrite` ([`dime`])
//! - TCP client and listener ([`tcp`]), in-memory pipes ([`memory`])
//!
//! # Message layout
//!
//! Each logical message is one DIME message:
//!
//! ```text
//! ┌────────────────────────────────┐
//! │ part id="wire:properties"      │  optional, application/json
//! │ {"accept":..,"action":..,..}   │
//! ├────────────────────────────────┤
//! │ part type=<content type>       │  optional, the encoded body
//! └────────────────────────────────┘
//! ```

pub mod dime;
pub mod memory;
pub mod tcp;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::dime::DEFAULT_BUFFER_SIZE;
use crate::error::Result;
use crate::media::MediaType;

pub use dime::{DimeInConnection, DimeOutConnection};
pub use memory::{memory_transport, pipe, MemoryListener, MemoryTransport};
pub use tcp::{TcpServer, TcpTransport};

/// Id of the DIME part carrying [`MessageProperties`].
pub const PROPERTIES_ID: &str = "wire:properties";

/// Media type of the property part.
pub const PROPERTIES_TYPE: &str = "application/json";

/// HTTP-style status for a server-side processing failure.
pub const STATUS_INTERNAL_SERVER_ERROR: u16 = 500;

/// HTTP-style status for an unknown endpoint.
pub const STATUS_NOT_FOUND: u16 = 404;

/// Per-connection framing settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionProperties {
    /// Maximum data bytes per DIME record written.
    pub buffer_size: usize,
    /// Bytes pulled per read call.
    pub read_size: usize,
}

impl Default for ConnectionProperties {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            read_size: DEFAULT_BUFFER_SIZE,
        }
    }
}

/// Properties sent ahead of a message body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageProperties {
    /// `Accept` list of the sender.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accept: Option<String>,
    /// SOAP action.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    /// Error status set by a server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

impl MessageProperties {
    /// Check if nothing is set (the property part is then omitted).
    pub fn is_empty(&self) -> bool {
        self.accept.is_none() && self.action.is_none() && self.status.is_none()
    }

    /// Description of an error status, e.g. `404 Not Found`.
    pub fn status_text(&self) -> Option<String> {
        let status = self.status.filter(|s| *s >= 400)?;
        let reason = match status {
            STATUS_NOT_FOUND => "Not Found",
            STATUS_INTERNAL_SERVER_ERROR => "Internal Server Error",
            400..=499 => "Client Error",
            _ => "Server Error",
        };
        Some(format!("{} {}", status, reason))
    }
}

/// Sending half of a connection.
#[async_trait]
pub trait OutConnection: Send {
    /// Send one encoded message. An empty `body` sends no body part.
    async fn send(
        &mut self,
        content_type: &MediaType,
        properties: MessageProperties,
        body: Bytes,
    ) -> Result<()>;

    /// Signal that the current message is complete and flush it.
    async fn output_complete(&mut self) -> Result<()>;

    /// Release per-message resources. The connection stays usable.
    async fn close(&mut self) -> Result<()>;

    /// Mark the next message sent as a server error.
    fn set_internal_server_error(&mut self);

    /// Answer with a bodiless not-found message.
    async fn send_not_found_error(&mut self) -> Result<()>;

    /// Shut down the underlying stream.
    async fn shutdown(&mut self) -> Result<()>;
}

/// Receiving half of a connection.
#[async_trait]
pub trait InConnection: Send {
    /// Start reading the next message.
    ///
    /// Returns `false` at a clean end of stream.
    async fn init(&mut self) -> Result<bool>;

    /// Content type of the current message body.
    fn content_type(&self) -> Option<&MediaType>;

    /// Properties of the current message.
    fn properties(&self) -> &MessageProperties;

    /// Error reported by the peer's transport layer (an error status with
    /// no body), if any.
    fn transport_error(&self) -> Option<String>;

    /// Read the body of the current message. Empty if there is none.
    async fn receive(&mut self) -> Result<Bytes>;

    /// Finish the current message, skipping anything left unread.
    async fn input_complete(&mut self) -> Result<()>;
}

/// Both halves of one connection.
pub struct Duplex {
    /// Sending half.
    pub out: Box<dyn OutConnection>,
    /// Receiving half.
    pub inbound: Box<dyn InConnection>,
}

impl Duplex {
    /// Pair two halves.
    pub fn new(out: Box<dyn OutConnection>, inbound: Box<dyn InConnection>) -> Self {
        Self { out, inbound }
    }
}

impl std::fmt::Debug for Duplex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Duplex").finish_non_exhaustive()
    }
}

/// Opens connections to a peer.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a connection for sending only.
    async fn open_outbound(&self, properties: &ConnectionProperties)
        -> Result<Box<dyn OutConnection>>;

    /// Open a connection for receiving only.
    async fn open_inbound(&self, properties: &ConnectionProperties)
        -> Result<Box<dyn InConnection>>;

    /// Open a connection for request/response exchanges.
    async fn open_duplex(&self, properties: &ConnectionProperties) -> Result<Duplex>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_properties_empty_by_default() {
        let props = MessageProperties::default();
        assert!(props.is_empty());
        assert_eq!(serde_json::to_string(&props).unwrap(), "{}");
    }

    #[test]
    fn test_properties_json_skips_unset() {
        let props = MessageProperties {
            action: Some("urn:echo".into()),
            ..Default::default()
        };
        assert_eq!(
            serde_json::to_string(&props).unwrap(),
            r#"{"action":"urn:echo"}"#
        );
        let back: MessageProperties = serde_json::from_str(r#"{"status":404}"#).unwrap();
        assert_eq!(back.status, Some(404));
        assert!(back.accept.is_none());
    }

    #[test]
    fn test_status_text() {
        let mut props = MessageProperties::default();
        assert_eq!(props.status_text(), None);

        props.status = Some(200);
        assert_eq!(props.status_text(), None);

        props.status = Some(STATUS_NOT_FOUND);
        assert_eq!(props.status_text().as_deref(), Some("404 Not Found"));

        props.status = Some(STATUS_INTERNAL_SERVER_ERROR);
        assert_eq!(
            props.status_text().as_deref(),
            Some("500 Internal Server Error")
        );
    }

    #[test]
    fn test_connection_properties_default() {
        let props = ConnectionProperties::default();
        assert_eq!(props.buffer_size, DEFAULT_BUFFER_SIZE);
        assert_eq!(props.read_size, DEFAULT_BUFFER_SIZE);
    }
}
