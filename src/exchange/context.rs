//! Message and exchange contexts.
//!
//! A [`MessageContext`] is one logical message of an exchange: its
//! direction, the handlers bound to each processing phase, the body payload
//! slot, a free-form attribute map and (after a fault) the [`SoapFault`].
//!
//! An [`ExchangeContext`] orders the message contexts of one exchange and
//! keeps a cursor on the current one:
//!
//! ```text
//! AwaitingCurrent ──begin_processing──► Processing ──switch──► Advanced
//!        ▲                                                        │
//!        └──────────────── next context exists ◄─────────────────┘
//! ```

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::handler::{Handler, InHandler, OutHandler};
use crate::error::{Result, WireError};
use crate::soap::SoapFault;
use crate::xml::QName;

/// Opaque payload produced by body readers and consumed by body writers.
pub type Payload = Box<dyn Any + Send + Sync>;

/// Opaque attribute value shared between handlers and the transport layer.
pub type Attribute = Arc<dyn Any + Send + Sync>;

/// Attribute key: [`MediaType`](crate::media::MediaType) used for the message.
pub const ATTR_CONTENT_TYPE: &str = "soapwire.content-type";
/// Attribute key: `String` accept list sent with or received on a message.
pub const ATTR_ACCEPT: &str = "soapwire.accept";
/// Attribute key: `String` SOAP action.
pub const ATTR_ACTION: &str = "soapwire.action";

/// Direction of a message relative to this endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Written to an outbound connection.
    Out,
    /// Read from an inbound connection.
    In,
}

/// Processing phase a handler is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// SOAP header entries.
    Header,
    /// Message body payload.
    Body,
    /// Detail entries of a SOAP fault.
    BodyFault,
}

/// One logical message of an exchange.
pub struct MessageContext {
    direction: Direction,
    handlers: Vec<(Phase, Handler)>,
    body: Option<Payload>,
    attributes: HashMap<String, Attribute>,
    fault: Option<SoapFault>,
    headers: Vec<(QName, Payload)>,
}

impl MessageContext {
    /// Create a context with no handlers.
    pub fn new(direction: Direction) -> Self {
        Self {
            direction,
            handlers: Vec::new(),
            body: None,
            attributes: HashMap::new(),
            fault: None,
            headers: Vec::new(),
        }
    }

    /// Create an outbound context.
    pub fn outbound() -> Self {
        Self::new(Direction::Out)
    }

    /// Create an inbound context.
    pub fn inbound() -> Self {
        Self::new(Direction::In)
    }

    /// Direction of this message.
    #[inline]
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Check if this message is written rather than read.
    #[inline]
    pub fn is_outbound(&self) -> bool {
        self.direction == Direction::Out
    }

    /// Bind a handler to a phase. Handlers of one phase run in binding order.
    ///
    /// Fails if the handler's direction does not match the message.
    pub fn add_handler(&mut self, phase: Phase, handler: Handler) -> Result<()> {
        if handler.direction() != self.direction {
            return Err(WireError::config(format!(
                "{:?} handler bound to an {:?} message",
                handler.direction(),
                self.direction
            )));
        }
        self.handlers.push((phase, handler));
        Ok(())
    }

    /// Builder form of [`add_handler`](Self::add_handler).
    pub fn with_handler(mut self, phase: Phase, handler: Handler) -> Result<Self> {
        self.add_handler(phase, handler)?;
        Ok(self)
    }

    /// Check if any handler is bound to `phase`.
    pub fn has_handlers(&self, phase: Phase) -> bool {
        self.handlers.iter().any(|(p, _)| *p == phase)
    }

    /// Outbound handlers bound to `phase`, in binding order.
    pub fn out_handlers(&self, phase: Phase) -> Vec<Arc<dyn OutHandler>> {
        self.handlers
            .iter()
            .filter(|(p, _)| *p == phase)
            .filter_map(|(_, h)| h.as_out().cloned())
            .collect()
    }

    /// Inbound handlers bound to `phase`, in binding order.
    pub fn in_handlers(&self, phase: Phase) -> Vec<Arc<dyn InHandler>> {
        self.handlers
            .iter()
            .filter(|(p, _)| *p == phase)
            .filter_map(|(_, h)| h.as_in().cloned())
            .collect()
    }

    /// Body payload, if set.
    pub fn body(&self) -> Option<&(dyn Any + Send + Sync)> {
        self.body.as_deref()
    }

    /// Body payload downcast to `T`.
    pub fn body_as<T: Any>(&self) -> Option<&T> {
        self.body.as_ref().and_then(|b| b.downcast_ref::<T>())
    }

    /// Set the body payload.
    pub fn set_body(&mut self, body: Payload) {
        self.body = Some(body);
    }

    /// Take the body payload out of the context.
    pub fn take_body(&mut self) -> Option<Payload> {
        self.body.take()
    }

    /// Check if a body payload is present.
    pub fn has_body(&self) -> bool {
        self.body.is_some()
    }

    /// Set an attribute, returning the previous value.
    pub fn set_attribute<T: Any + Send + Sync>(&mut self, key: &str, value: T) -> Option<Attribute> {
        self.attributes.insert(key.to_string(), Arc::new(value))
    }

    /// Get an attribute.
    pub fn attribute(&self, key: &str) -> Option<&Attribute> {
        self.attributes.get(key)
    }

    /// Get an attribute downcast to `T`.
    pub fn attribute_as<T: Any>(&self, key: &str) -> Option<&T> {
        self.attributes.get(key).and_then(|v| v.downcast_ref::<T>())
    }

    /// Remove an attribute.
    pub fn remove_attribute(&mut self, key: &str) -> Option<Attribute> {
        self.attributes.remove(key)
    }

    /// Fault being sent or received.
    pub fn fault(&self) -> Option<&SoapFault> {
        self.fault.as_ref()
    }

    /// Set the fault to send instead of the body.
    pub fn set_fault(&mut self, fault: SoapFault) {
        self.fault = Some(fault);
    }

    /// Take the fault out of the context.
    pub fn take_fault(&mut self) -> Option<SoapFault> {
        self.fault.take()
    }

    /// Header entries claimed by header handlers while reading.
    pub fn headers(&self) -> &[(QName, Payload)] {
        &self.headers
    }

    /// Record a claimed header entry.
    pub fn push_header(&mut self, name: QName, value: Payload) {
        self.headers.push((name, value));
    }

    /// Take all claimed header entries.
    pub fn take_headers(&mut self) -> Vec<(QName, Payload)> {
        std::mem::take(&mut self.headers)
    }

    /// Clear everything set while processing. Direction and handlers stay.
    pub fn reset(&mut self) {
        self.body = None;
        self.fault = None;
        self.attributes.clear();
        self.headers.clear();
    }
}

impl fmt::Debug for MessageContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageContext")
            .field("direction", &self.direction)
            .field(
                "handlers",
                &self.handlers.iter().map(|(p, _)| p).collect::<Vec<_>>(),
            )
            .field("has_body", &self.body.is_some())
            .field("attributes", &self.attributes.keys().collect::<Vec<_>>())
            .field("fault", &self.fault)
            .finish()
    }
}

/// Where the exchange cursor stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeState {
    /// Cursor points at a context not yet processed.
    AwaitingCurrent,
    /// The current context is being sent or received.
    Processing,
    /// Cursor moved on, to the next context or past the end.
    Advanced,
}

/// Ordered message contexts of one exchange.
#[derive(Debug)]
pub struct ExchangeContext {
    contexts: Vec<MessageContext>,
    cursor: usize,
    state: ExchangeState,
}

impl ExchangeContext {
    /// Create an exchange over the given contexts, cursor at the first.
    pub fn new(contexts: Vec<MessageContext>) -> Self {
        Self {
            contexts,
            cursor: 0,
            state: ExchangeState::AwaitingCurrent,
        }
    }

    /// Client exchange: send `request`, then receive `response`.
    pub fn request_response(request: MessageContext, response: MessageContext) -> Self {
        Self::new(vec![request, response])
    }

    /// Append a context at the end of the sequence.
    pub fn push(&mut self, context: MessageContext) {
        self.contexts.push(context);
    }

    /// Current cursor state.
    #[inline]
    pub fn state(&self) -> ExchangeState {
        self.state
    }

    /// Index of the current context.
    #[inline]
    pub fn position(&self) -> usize {
        self.cursor
    }

    /// Check if every context has been processed.
    #[inline]
    pub fn is_complete(&self) -> bool {
        self.cursor >= self.contexts.len()
    }

    /// Current context, `None` once the sequence is exhausted.
    pub fn current(&self) -> Option<&MessageContext> {
        self.contexts.get(self.cursor)
    }

    /// Mutable current context.
    pub fn current_mut(&mut self) -> Option<&mut MessageContext> {
        self.contexts.get_mut(self.cursor)
    }

    /// Mark the current context as being processed.
    pub fn begin_processing(&mut self) -> Result<&mut MessageContext> {
        let context = self
            .contexts
            .get_mut(self.cursor)
            .ok_or_else(|| WireError::State("no current message context".into()))?;
        self.state = ExchangeState::Processing;
        Ok(context)
    }

    /// Advance to the next context. Idempotent once exhausted.
    pub fn switch_message_context(&mut self) {
        if self.cursor < self.contexts.len() {
            self.cursor += 1;
            tracing::trace!(position = self.cursor, "Switched message context");
        }
        self.state = ExchangeState::Advanced;
    }

    /// Rewind the cursor and reset every context for reuse.
    pub fn reset(&mut self) {
        for context in &mut self.contexts {
            context.reset();
        }
        self.cursor = 0;
        self.state = ExchangeState::AwaitingCurrent;
    }

    /// All contexts in order.
    pub fn contexts(&self) -> &[MessageContext] {
        &self.contexts
    }

    /// Context at `index`.
    pub fn context(&self, index: usize) -> Option<&MessageContext> {
        self.contexts.get(index)
    }

    /// Mutable context at `index`.
    pub fn context_mut(&mut self, index: usize) -> Option<&mut MessageContext> {
        self.contexts.get_mut(index)
    }

    /// Last context of the sequence (the response of a request/response).
    pub fn last_mut(&mut self) -> Option<&mut MessageContext> {
        self.contexts.last_mut()
    }

    /// Consume the exchange.
    pub fn into_contexts(self) -> Vec<MessageContext> {
        self.contexts
    }
}
