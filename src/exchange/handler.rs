//! Pluggable message handlers.
//!
//! Handlers are the marshalling boundary: an [`OutHandler`] writes tokens
//! for a payload (header entry, body, fault detail) and an [`InHandler`]
//! reads tokens back into a payload. Handlers of one phase form an ordered
//! chain; inbound chains stop at the first handler that claims the content.
//!
//! # Example
//!
//! ```
//! use soapwire::exchange::{Handler, MessageContext, Payload};
//! use soapwire::xml::{read_text, start_element, QName, TokenSink, TokenSource};
//! use soapwire::Result;
//!
//! let writer = Handler::out(|ctx: &MessageContext, sink: &mut dyn TokenSink| -> Result<()> {
//!     let text = ctx.body_as::<String>().cloned().unwrap_or_default();
//!     sink.text_element(QName::local("echo"), &text)
//! });
//!
//! let reader = Handler::inbound(
//!     |_ctx: &mut MessageContext, source: &mut dyn TokenSource| -> Result<Option<Payload>> {
//!         match start_element(source)? {
//!             Some(el) if el.name.local == "echo" => Ok(Some(Box::new(read_text(source)?))),
//!             _ => Ok(None),
//!         }
//!     },
//! );
//! # let _ = (writer, reader);
//! ```

use std::fmt;
use std::sync::Arc;

use super::context::{Direction, MessageContext, Payload};
use crate::error::Result;
use crate::xml::{TokenBuffer, TokenSink, TokenSource};

/// Writes a payload as tokens.
pub trait OutHandler: Send + Sync {
    /// Write this handler's content for `ctx` to `sink`.
    fn invoke(&self, ctx: &MessageContext, sink: &mut dyn TokenSink) -> Result<()>;
}

/// Reads tokens into a payload.
pub trait InHandler: Send + Sync {
    /// Try to read the content at the front of `source`.
    ///
    /// Returns `Some(payload)` when the handler claims the content and
    /// `None` when it does not recognize it.
    fn invoke(
        &self,
        ctx: &mut MessageContext,
        source: &mut dyn TokenSource,
    ) -> Result<Option<Payload>>;
}

impl<F> OutHandler for F
where
    F: Fn(&MessageContext, &mut dyn TokenSink) -> Result<()> + Send + Sync,
{
    fn invoke(&self, ctx: &MessageContext, sink: &mut dyn TokenSink) -> Result<()> {
        self(ctx, sink)
    }
}

impl<F> InHandler for F
where
    F: Fn(&mut MessageContext, &mut dyn TokenSource) -> Result<Option<Payload>> + Send + Sync,
{
    fn invoke(
        &self,
        ctx: &mut MessageContext,
        source: &mut dyn TokenSource,
    ) -> Result<Option<Payload>> {
        self(ctx, source)
    }
}

/// A handler bound to a message phase.
#[derive(Clone)]
pub enum Handler {
    /// Writes content into an outbound message.
    Out(Arc<dyn OutHandler>),
    /// Reads content from an inbound message.
    In(Arc<dyn InHandler>),
}

impl Handler {
    /// Wrap an outbound handler.
    pub fn out<H: OutHandler + 'static>(handler: H) -> Self {
        Handler::Out(Arc::new(handler))
    }

    /// Wrap an inbound handler.
    pub fn inbound<H: InHandler + 'static>(handler: H) -> Self {
        Handler::In(Arc::new(handler))
    }

    /// Message direction this handler serves.
    pub fn direction(&self) -> Direction {
        match self {
            Handler::Out(_) => Direction::Out,
            Handler::In(_) => Direction::In,
        }
    }

    /// The outbound handler, if this is one.
    pub fn as_out(&self) -> Option<&Arc<dyn OutHandler>> {
        match self {
            Handler::Out(h) => Some(h),
            Handler::In(_) => None,
        }
    }

    /// The inbound handler, if this is one.
    pub fn as_in(&self) -> Option<&Arc<dyn InHandler>> {
        match self {
            Handler::In(h) => Some(h),
            Handler::Out(_) => None,
        }
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Handler::Out(_) => f.write_str("Handler::Out"),
            Handler::In(_) => f.write_str("Handler::In"),
        }
    }
}

/// Offer `content` to each handler in order; the first claim wins.
///
/// Every handler reads its own copy of `content`, so a handler that
/// declines leaves nothing consumed for the next one.
pub fn first_claim(
    handlers: &[Arc<dyn InHandler>],
    ctx: &mut MessageContext,
    content: &TokenBuffer,
) -> Result<Option<Payload>> {
    for handler in handlers {
        let mut source = content.clone();
        if let Some(payload) = handler.invoke(ctx, &mut source)? {
            return Ok(Some(payload));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xml::{read_text, start_element, QName, Token};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn named(local: &'static str) -> Arc<dyn InHandler> {
        Arc::new(
            move |_ctx: &mut MessageContext,
                  source: &mut dyn TokenSource|
                  -> Result<Option<Payload>> {
                match start_element(source)? {
                    Some(el) if el.name.local == local => Ok(Some(Box::new(read_text(source)?))),
                    _ => Ok(None),
                }
            },
        )
    }

    fn content(local: &str, text: &str) -> TokenBuffer {
        let mut buffer = TokenBuffer::new();
        buffer.text_element(QName::local(local), text).unwrap();
        buffer
    }

    #[test]
    fn test_first_claim_wins() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let never: Arc<dyn InHandler> = Arc::new(
            move |_ctx: &mut MessageContext,
                  _source: &mut dyn TokenSource|
                  -> Result<Option<Payload>> {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(Some(Box::new(())))
            },
        );
        let handlers = vec![named("a"), named("b"), never];
        let mut ctx = MessageContext::inbound();

        let claimed = first_claim(&handlers, &mut ctx, &content("b", "hello"))
            .unwrap()
            .unwrap();
        assert_eq!(claimed.downcast_ref::<String>().unwrap(), "hello");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_no_claim() {
        let handlers = vec![named("a")];
        let mut ctx = MessageContext::inbound();
        assert!(first_claim(&handlers, &mut ctx, &content("z", ""))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_handler_errors_propagate() {
        let failing: Arc<dyn InHandler> = Arc::new(
            |_ctx: &mut MessageContext, _source: &mut dyn TokenSource| -> Result<Option<Payload>> {
                Err(crate::WireError::parse("bad detail"))
            },
        );
        let mut ctx = MessageContext::inbound();
        assert!(first_claim(&[failing], &mut ctx, &content("a", "x")).is_err());
    }

    #[test]
    fn test_out_handler_closure() {
        let handler = Handler::out(|_ctx: &MessageContext, sink: &mut dyn TokenSink| -> Result<()> {
            sink.text_element(QName::local("x"), "1")
        });
        assert_eq!(handler.direction(), Direction::Out);

        let mut sink = TokenBuffer::new();
        handler
            .as_out()
            .unwrap()
            .invoke(&MessageContext::outbound(), &mut sink)
            .unwrap();
        assert_eq!(sink.len(), 3);
        assert!(matches!(sink.iter().nth(1), Some(Token::Text(t)) if t == "1"));
    }
}
