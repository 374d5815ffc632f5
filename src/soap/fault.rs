//! SOAP 1.1 fault model.
//!
//! A [`SoapFault`] is first-class data: services return it (wrapped in
//! [`WireError::Fault`]) to send a fault, and inbound fault messages are
//! parsed into it. Detail entries are written by [`DetailWriter`]s in
//! registration order; on the read side the claimed detail is kept as an
//! opaque payload.

use std::any::Any;
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use crate::error::{Result, WireError};
use crate::exchange::Payload;
use crate::xml::{QName, TokenSink};

/// SOAP 1.1 envelope namespace.
pub const SOAP_ENV_NS: &str = "http://schemas.xmlsoap.org/soap/envelope/";

/// Prefix used for the envelope namespace on output.
pub const SOAP_ENV_PREFIX: &str = "SOAP";

/// Standard SOAP 1.1 fault codes.
pub const STANDARD_CODES: [&str; 4] = ["VersionMismatch", "MustUnderstand", "Client", "Server"];

/// Qualified fault code.
///
/// Always carries a namespace URI. A prefix is required unless the code is
/// one of the standard envelope codes (or a dotted refinement of one, such
/// as `Client.Authentication`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FaultCode {
    name: QName,
}

impl FaultCode {
    /// Create a fault code, validating namespace and prefix.
    ///
    /// # Example
    ///
    /// ```
    /// use soapwire::soap::{FaultCode, SOAP_ENV_NS};
    ///
    /// assert!(FaultCode::new(Some(SOAP_ENV_NS), None, "Server").is_ok());
    /// assert!(FaultCode::new(Some("urn:app"), Some("app"), "Quota").is_ok());
    /// assert!(FaultCode::new(Some("urn:app"), None, "Quota").is_err());
    /// ```
    pub fn new(uri: Option<&str>, prefix: Option<&str>, local: &str) -> Result<Self> {
        let uri = uri.ok_or_else(|| WireError::config("faultCode URI must be non-null"))?;
        if local.is_empty() {
            return Err(WireError::config("faultCode local name must be non-empty"));
        }
        let standard = is_standard(uri, local);
        if prefix.is_none() && !standard {
            return Err(WireError::config(
                "faultCode prefix must be non-null for custom URIs",
            ));
        }
        Ok(Self {
            name: QName {
                namespace: Some(uri.to_string()),
                prefix: prefix.map(str::to_string),
                local: local.to_string(),
            },
        })
    }

    fn standard(local: &str) -> Self {
        Self {
            name: QName::prefixed(SOAP_ENV_NS, SOAP_ENV_PREFIX, local),
        }
    }

    /// `Server`: the receiver failed to process a valid message.
    pub fn server() -> Self {
        Self::standard("Server")
    }

    /// `Client`: the message was malformed or lacked information.
    pub fn client() -> Self {
        Self::standard("Client")
    }

    /// `MustUnderstand`: a mandatory header was not understood.
    pub fn must_understand() -> Self {
        Self::standard("MustUnderstand")
    }

    /// `VersionMismatch`: the envelope namespace was not SOAP 1.1.
    pub fn version_mismatch() -> Self {
        Self::standard("VersionMismatch")
    }

    /// Namespace URI.
    pub fn namespace(&self) -> &str {
        self.name.namespace.as_deref().unwrap_or_default()
    }

    /// Prefix, if one was given.
    pub fn prefix(&self) -> Option<&str> {
        self.name.prefix.as_deref()
    }

    /// Local part, e.g. `Server`.
    pub fn local(&self) -> &str {
        &self.name.local
    }

    /// Full qualified name.
    pub fn qname(&self) -> &QName {
        &self.name
    }

    /// Check if this is a standard envelope code.
    pub fn is_standard(&self) -> bool {
        is_standard(self.namespace(), self.local())
    }

    /// Prefix to write on the wire. Standard codes without a prefix use the
    /// envelope prefix.
    pub fn wire_prefix(&self) -> &str {
        self.prefix().unwrap_or(SOAP_ENV_PREFIX)
    }
}

impl fmt::Display for FaultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.wire_prefix(), self.local())
    }
}

fn is_standard(uri: &str, local: &str) -> bool {
    let head = local.split('.').next().unwrap_or(local);
    uri == SOAP_ENV_NS && STANDARD_CODES.contains(&head)
}

/// Writes one fault detail entry.
pub trait DetailWriter: Send + Sync {
    /// Write the entry's tokens.
    fn write_detail(&self, sink: &mut dyn TokenSink) -> Result<()>;
}

impl<F> DetailWriter for F
where
    F: Fn(&mut dyn TokenSink) -> Result<()> + Send + Sync,
{
    fn write_detail(&self, sink: &mut dyn TokenSink) -> Result<()> {
        self(sink)
    }
}

/// Detail entry consisting of a single text element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextDetail {
    name: QName,
    text: String,
}

impl TextDetail {
    /// `<name>text</name>`.
    pub fn new(name: QName, text: impl Into<String>) -> Self {
        Self {
            name,
            text: text.into(),
        }
    }
}

impl DetailWriter for TextDetail {
    fn write_detail(&self, sink: &mut dyn TokenSink) -> Result<()> {
        sink.text_element(self.name.clone(), &self.text)
    }
}

/// A SOAP fault, sent or received.
pub struct SoapFault {
    code: FaultCode,
    message: String,
    actor: Option<String>,
    detail_writers: Vec<Arc<dyn DetailWriter>>,
    detail: Option<Payload>,
}

impl SoapFault {
    /// Create a fault with a code and fault string.
    pub fn new(code: FaultCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            actor: None,
            detail_writers: Vec::new(),
            detail: None,
        }
    }

    /// `Server` fault.
    pub fn server(message: impl Into<String>) -> Self {
        Self::new(FaultCode::server(), message)
    }

    /// `Client` fault.
    pub fn client(message: impl Into<String>) -> Self {
        Self::new(FaultCode::client(), message)
    }

    /// `MustUnderstand` fault.
    pub fn must_understand(message: impl Into<String>) -> Self {
        Self::new(FaultCode::must_understand(), message)
    }

    /// Set the actor URI.
    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    /// Append a detail writer. Entries are written in the order added.
    pub fn with_detail_writer<D: DetailWriter + 'static>(mut self, writer: D) -> Self {
        self.detail_writers.push(Arc::new(writer));
        self
    }

    /// Append a shared detail writer.
    pub fn add_detail_writer(&mut self, writer: Arc<dyn DetailWriter>) {
        self.detail_writers.push(writer);
    }

    /// Fault code.
    pub fn code(&self) -> &FaultCode {
        &self.code
    }

    /// Fault string.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Actor URI.
    pub fn actor(&self) -> Option<&str> {
        self.actor.as_deref()
    }

    /// Detail writers, in registration order.
    pub fn detail_writers(&self) -> &[Arc<dyn DetailWriter>] {
        &self.detail_writers
    }

    /// Detail payload claimed by a fault handler while reading.
    pub fn detail(&self) -> Option<&(dyn Any + Send + Sync)> {
        self.detail.as_deref()
    }

    /// Detail payload downcast to `T`.
    pub fn detail_as<T: Any>(&self) -> Option<&T> {
        self.detail.as_ref().and_then(|d| d.downcast_ref::<T>())
    }

    /// Set the claimed detail payload.
    pub fn set_detail(&mut self, detail: Payload) {
        self.detail = Some(detail);
    }

    /// Take the claimed detail payload.
    pub fn take_detail(&mut self) -> Option<Payload> {
        self.detail.take()
    }

    /// Check if the fault carries any detail, written or read.
    pub fn has_details(&self) -> bool {
        !self.detail_writers.is_empty() || self.detail.is_some()
    }
}

impl fmt::Debug for SoapFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SoapFault")
            .field("code", &self.code)
            .field("message", &self.message)
            .field("actor", &self.actor)
            .field("detail_writers", &self.detail_writers.len())
            .field("has_detail", &self.detail.is_some())
            .finish()
    }
}

impl fmt::Display for SoapFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)?;
        if let Some(actor) = &self.actor {
            write!(f, " (actor {})", actor)?;
        }
        Ok(())
    }
}

/// Convert an error raised while handling a request into the fault to send.
///
/// A fault passes through unchanged and an unconsumed must-understand header
/// becomes a `MustUnderstand` fault. Anything else becomes a `Server` fault,
/// carrying the error chain as a `stackTrace` detail when
/// `include_stack_trace` is set. Logged here, once.
pub fn fault_from_error(error: WireError, include_stack_trace: bool) -> SoapFault {
    match error {
        WireError::Fault(fault) => {
            tracing::debug!("Sending fault raised by service: {}", fault);
            *fault
        }
        WireError::NotUnderstood(header) => {
            tracing::warn!("Mandatory header {} was not understood", header);
            SoapFault::must_understand(format!(
                "SOAP header {} was not understood",
                header.qualified()
            ))
        }
        other => {
            tracing::error!("Request processing failed: {}", other);
            let mut fault = SoapFault::server(other.to_string());
            if include_stack_trace {
                fault = fault.with_detail_writer(TextDetail::new(
                    QName::local("stackTrace"),
                    error_chain(&other),
                ));
            }
            fault
        }
    }
}

fn error_chain(error: &WireError) -> String {
    let mut text = format!("{:?}", error);
    let mut source = error.source();
    while let Some(cause) = source {
        text.push_str("\ncaused by: ");
        text.push_str(&cause.to_string());
        source = cause.source();
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xml::{Token, TokenBuffer};

    #[test]
    fn test_custom_code_requires_prefix() {
        let err = FaultCode::new(Some("urn:app"), None, "Quota").unwrap_err();
        assert!(matches!(err, WireError::Config(_)));
        assert_eq!(
            err.to_string(),
            "Configuration error: faultCode prefix must be non-null for custom URIs"
        );
    }

    #[test]
    fn test_code_requires_uri() {
        let err = FaultCode::new(None, Some("app"), "Quota").unwrap_err();
        assert!(err.to_string().contains("faultCode URI must be non-null"));
        // URI is checked even for standard local names.
        assert!(FaultCode::new(None, None, "Server").is_err());
    }

    #[test]
    fn test_standard_codes_bypass_prefix() {
        for local in STANDARD_CODES {
            let code = FaultCode::new(Some(SOAP_ENV_NS), None, local).unwrap();
            assert!(code.is_standard());
            assert_eq!(code.wire_prefix(), SOAP_ENV_PREFIX);
        }
        let refined = FaultCode::new(Some(SOAP_ENV_NS), None, "Client.Authentication").unwrap();
        assert!(refined.is_standard());
        assert_eq!(refined.to_string(), "SOAP:Client.Authentication");
    }

    #[test]
    fn test_custom_code_display() {
        let code = FaultCode::new(Some("urn:app"), Some("app"), "Quota").unwrap();
        assert!(!code.is_standard());
        assert_eq!(code.to_string(), "app:Quota");
        assert_eq!(code.namespace(), "urn:app");
    }

    #[test]
    fn test_fault_builder() {
        let fault = SoapFault::client("Invalid message format")
            .with_actor("http://example.org/someactor")
            .with_detail_writer(TextDetail::new(QName::local("ErrorMessage"), "text"));
        assert_eq!(fault.code(), &FaultCode::client());
        assert_eq!(fault.message(), "Invalid message format");
        assert_eq!(fault.actor(), Some("http://example.org/someactor"));
        assert_eq!(fault.detail_writers().len(), 1);
        assert!(fault.has_details());
        assert_eq!(
            fault.to_string(),
            "SOAP:Client: Invalid message format (actor http://example.org/someactor)"
        );
    }

    #[test]
    fn test_fault_passes_through() {
        let fault = fault_from_error(SoapFault::client("bad").into(), true);
        assert_eq!(fault.code(), &FaultCode::client());
        assert!(!fault.has_details());
    }

    #[test]
    fn test_not_understood_becomes_must_understand() {
        let header = QName::prefixed("urn:sec", "s", "Security");
        let fault = fault_from_error(WireError::NotUnderstood(header), false);
        assert_eq!(fault.code(), &FaultCode::must_understand());
        assert!(fault.message().contains("s:Security"));
    }

    #[test]
    fn test_other_errors_become_server_faults() {
        let fault = fault_from_error(WireError::config("no handler"), false);
        assert_eq!(fault.code(), &FaultCode::server());
        assert_eq!(fault.message(), "Configuration error: no handler");
        assert!(!fault.has_details());
    }

    #[test]
    fn test_stack_trace_detail() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk gone");
        let fault = fault_from_error(WireError::Io(io), true);
        assert_eq!(fault.detail_writers().len(), 1);

        let mut sink = TokenBuffer::new();
        fault.detail_writers()[0].write_detail(&mut sink).unwrap();
        let tokens = sink.into_tokens();
        assert!(matches!(&tokens[0], Token::Start(el) if el.name.local == "stackTrace"));
        assert!(matches!(&tokens[1], Token::Text(t) if t.contains("disk gone")));
    }
}
