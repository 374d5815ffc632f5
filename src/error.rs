//! Error types for soapwire.

use thiserror::Error;

use crate::soap::SoapFault;
use crate::xml::QName;

/// Main error type for all soapwire operations.
#[derive(Debug, Error)]
pub enum WireError {
    /// I/O error during socket operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error (config and property parts).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// MsgPack serialization error.
    #[error("MsgPack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    /// MsgPack deserialization error.
    #[error("MsgPack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),

    /// Configuration error: bad media type, missing handler, unknown protocol,
    /// invalid fault code. Never retried.
    #[error("Configuration error: {0}")]
    Config(String),

    /// DIME framing violation. Fatal to the connection.
    #[error("Framing error: {0}")]
    Framing(String),

    /// The transport reported an error (as opposed to a SOAP fault).
    #[error("Transport error: {0}")]
    Transport(String),

    /// Malformed XML or envelope structure.
    #[error("Parse error: {0}")]
    Parse(String),

    /// Exchange sequencing misuse (programmer error).
    #[error("Invalid exchange state: {0}")]
    State(String),

    /// A header marked must-understand was not consumed by any handler.
    #[error("Header not understood: {0}")]
    NotUnderstood(QName),

    /// A SOAP fault raised by a service operation or received by a client.
    #[error("SOAP fault: {0}")]
    Fault(Box<SoapFault>),

    /// Connection closed unexpectedly.
    #[error("Connection closed")]
    ConnectionClosed,
}

impl WireError {
    /// Shorthand for a configuration error.
    pub(crate) fn config(message: impl Into<String>) -> Self {
        WireError::Config(message.into())
    }

    /// Shorthand for a framing error.
    pub(crate) fn framing(message: impl Into<String>) -> Self {
        WireError::Framing(message.into())
    }

    /// Shorthand for an XML/envelope parse error.
    pub(crate) fn parse(message: impl Into<String>) -> Self {
        WireError::Parse(message.into())
    }

    /// True for errors after which the connection must be closed.
    pub fn is_fatal_to_connection(&self) -> bool {
        matches!(
            self,
            WireError::Framing(_) | WireError::Io(_) | WireError::ConnectionClosed
        )
    }
}

impl From<SoapFault> for WireError {
    fn from(fault: SoapFault) -> Self {
        WireError::Fault(Box::new(fault))
    }
}

/// Result type alias using WireError.
pub type Result<T> = std::result::Result<T, WireError>;
