//! Message protocols and the protocol directory.
//!
//! A [`MessageProtocol`] wraps handler output into the message structure
//! (SOAP envelope, or nothing at all for plain XML) and dispatches inbound
//! content back to the handlers.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::envelope::SoapProtocol;
use crate::error::{Result, WireError};
use crate::exchange::{first_claim, MessageContext, Phase};
use crate::xml::{skip_whitespace, Token, TokenBuffer, TokenSink, TokenSource};

/// Structure of messages on the wire.
pub trait MessageProtocol: Send + Sync + fmt::Debug {
    /// Canonical protocol name.
    fn name(&self) -> &'static str;

    /// Write the whole message for an outbound context.
    ///
    /// Writing nothing means the message has no body.
    fn build(&self, ctx: &MessageContext, sink: &mut dyn TokenSink) -> Result<()>;

    /// Read a whole inbound message, filling the context's body, headers or
    /// fault through its handlers.
    fn parse(&self, ctx: &mut MessageContext, source: &mut dyn TokenSource) -> Result<()>;

    /// Check if faults travel inside messages of this protocol.
    fn carries_faults(&self) -> bool {
        true
    }
}

/// Plain XML ("POX"): the body handler output is the whole message.
///
/// Faults cannot be represented; the processor sends a fault message
/// without a body and the transport reports the failure instead.
#[derive(Debug, Clone, Copy, Default)]
pub struct PoxProtocol;

impl PoxProtocol {
    /// Create the protocol.
    pub fn new() -> Self {
        PoxProtocol
    }
}

impl MessageProtocol for PoxProtocol {
    fn name(&self) -> &'static str {
        "pox"
    }

    fn build(&self, ctx: &MessageContext, sink: &mut dyn TokenSink) -> Result<()> {
        for handler in ctx.out_handlers(Phase::Body) {
            handler.invoke(ctx, sink)?;
        }
        Ok(())
    }

    fn parse(&self, ctx: &mut MessageContext, source: &mut dyn TokenSource) -> Result<()> {
        let mut content = TokenBuffer::new();
        skip_whitespace(source)?;
        while let Some(token) = source.next_token()? {
            content.write_token(token)?;
        }
        if content.iter().all(Token::is_whitespace) {
            return Ok(());
        }
        let handlers = ctx.in_handlers(Phase::Body);
        if let Some(payload) = first_claim(&handlers, ctx, &content)? {
            ctx.set_body(payload);
        }
        Ok(())
    }

    fn carries_faults(&self) -> bool {
        false
    }
}

/// Maps protocol names to implementations. Built once, then shared.
#[derive(Clone)]
pub struct ProtocolDirectory {
    protocols: HashMap<String, Arc<dyn MessageProtocol>>,
}

impl ProtocolDirectory {
    /// Create an empty directory.
    pub fn new() -> Self {
        Self {
            protocols: HashMap::new(),
        }
    }

    /// Directory with `soap`/`soap11` (SOAP 1.1) and `pox` (plain XML).
    pub fn with_defaults() -> Self {
        let soap: Arc<dyn MessageProtocol> = Arc::new(SoapProtocol::new());
        let mut directory = Self::new();
        directory.register("soap", soap.clone());
        directory.register("soap11", soap);
        directory.register("pox", Arc::new(PoxProtocol::new()));
        directory
    }

    /// Register a protocol under a (case-insensitive) name.
    pub fn register(&mut self, name: &str, protocol: Arc<dyn MessageProtocol>) {
        self.protocols.insert(name.to_ascii_lowercase(), protocol);
    }

    /// Look up a protocol by name.
    pub fn lookup(&self, name: &str) -> Result<Arc<dyn MessageProtocol>> {
        self.protocols
            .get(&name.to_ascii_lowercase())
            .cloned()
            .ok_or_else(|| WireError::config(format!("Unknown protocol name: {}", name)))
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.protocols.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl Default for ProtocolDirectory {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl fmt::Debug for ProtocolDirectory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProtocolDirectory")
            .field("names", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::{Handler, Payload};
    use crate::xml::{read_text, start_element, QName};

    #[test]
    fn test_directory_defaults() {
        let directory = ProtocolDirectory::with_defaults();
        assert_eq!(directory.names(), vec!["pox", "soap", "soap11"]);
        assert_eq!(directory.lookup("SOAP").unwrap().name(), "soap11");
        assert_eq!(directory.lookup("pox").unwrap().name(), "pox");
    }

    #[test]
    fn test_unknown_protocol() {
        let err = ProtocolDirectory::with_defaults()
            .lookup("soap12")
            .unwrap_err();
        assert!(matches!(err, WireError::Config(_)));
        assert_eq!(
            err.to_string(),
            "Configuration error: Unknown protocol name: soap12"
        );
    }

    #[test]
    fn test_pox_roundtrip_through_handlers() {
        let writer = Handler::out(|ctx: &MessageContext, sink: &mut dyn TokenSink| -> Result<()> {
            let n = ctx.body_as::<u32>().copied().unwrap_or_default();
            sink.text_element(QName::local("n"), &n.to_string())
        });
        let reader = Handler::inbound(
            |_ctx: &mut MessageContext, source: &mut dyn TokenSource| -> Result<Option<Payload>> {
                match start_element(source)? {
                    Some(_) => {
                        let n: u32 = read_text(source)?
                            .parse()
                            .map_err(|_| WireError::parse("not a number"))?;
                        Ok(Some(Box::new(n)))
                    }
                    None => Ok(None),
                }
            },
        );

        let mut out = MessageContext::outbound()
            .with_handler(Phase::Body, writer)
            .unwrap();
        out.set_body(Box::new(7u32));
        let mut tokens = TokenBuffer::new();
        PoxProtocol.build(&out, &mut tokens).unwrap();
        assert_eq!(tokens.len(), 3);

        let mut inbound = MessageContext::inbound()
            .with_handler(Phase::Body, reader)
            .unwrap();
        PoxProtocol.parse(&mut inbound, &mut tokens).unwrap();
        assert_eq!(inbound.body_as::<u32>(), Some(&7));
    }

    #[test]
    fn test_only_soap_carries_faults() {
        let directory = ProtocolDirectory::with_defaults();
        assert!(!directory.lookup("pox").unwrap().carries_faults());
        assert!(directory.lookup("soap").unwrap().carries_faults());
    }

    #[test]
    fn test_pox_empty_message() {
        let mut ctx = MessageContext::inbound();
        PoxProtocol
            .parse(&mut ctx, &mut TokenBuffer::new())
            .unwrap();
        assert!(!ctx.has_body());
    }
}
