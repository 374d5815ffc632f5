//! Server side: answer inbound requests with an operation.
//!
//! For every inbound message a [`Service`] runs an in-then-out exchange:
//! 1. Receive and parse the request through the request handlers
//! 2. Run the [`Operation`] on the request body
//! 3. Negotiate the response media type from the request's `Accept` list
//! 4. Send the result, or the fault an error converts to
//!
//! # Example
//!
//! ```
//! use soapwire::exchange::{MessageContext, Payload};
//! use soapwire::service::Service;
//! use soapwire::xml::{read_text, start_element, QName, TokenSink, TokenSource};
//! use soapwire::Result;
//!
//! let service = Service::builder()
//!     .request_reader(
//!         |_ctx: &mut MessageContext, source: &mut dyn TokenSource| -> Result<Option<Payload>> {
//!             match start_element(source)? {
//!                 Some(el) if el.name.local == "echo" => Ok(Some(Box::new(read_text(source)?))),
//!                 _ => Ok(None),
//!             }
//!         },
//!     )
//!     .response_writer(|ctx: &MessageContext, sink: &mut dyn TokenSink| -> Result<()> {
//!         let text = ctx.body_as::<String>().cloned().unwrap_or_default();
//!         sink.text_element(QName::local("echo"), &text)
//!     })
//!     .typed_operation(|text: String| async move {
//!         Ok::<_, soapwire::WireError>(text.to_uppercase())
//!     })
//!     .build()
//!     .unwrap();
//! # let _ = service;
//! ```

use std::any::{type_name, Any};
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;

use crate::codec::CodecDirectory;
use crate::config::EngineConfig;
use crate::error::{Result, WireError};
use crate::exchange::{
    ExchangeContext, Handler, InHandler, MessageContext, OutHandler, Payload, Phase, Processor,
    ATTR_ACCEPT, ATTR_ACTION, ATTR_CONTENT_TYPE,
};
use crate::media::MediaType;
use crate::soap::{fault_from_error, ProtocolDirectory, SoapFault};
use crate::transport::{Duplex, OutConnection};
use crate::xml::QName;

/// Boxed future for operation results.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

// ============================================================================
// Request
// ============================================================================

/// A parsed inbound request.
pub struct Request {
    body: Payload,
    headers: Vec<(QName, Payload)>,
    action: Option<String>,
    content_type: Option<MediaType>,
}

impl Request {
    /// Request body.
    pub fn body(&self) -> &(dyn Any + Send + Sync) {
        self.body.as_ref()
    }

    /// Request body as `T`.
    pub fn body_as<T: Any>(&self) -> Option<&T> {
        self.body.downcast_ref()
    }

    /// Take the body.
    pub fn into_body(self) -> Payload {
        self.body
    }

    /// Header entries claimed by header readers, in document order.
    pub fn headers(&self) -> &[(QName, Payload)] {
        &self.headers
    }

    /// First header entry named `name`, as `T`.
    pub fn header_as<T: Any>(&self, namespace: Option<&str>, local: &str) -> Option<&T> {
        self.headers
            .iter()
            .find(|(name, _)| name.matches(namespace, local))
            .and_then(|(_, value)| value.downcast_ref())
    }

    /// SOAP action sent with the request.
    pub fn action(&self) -> Option<&str> {
        self.action.as_deref()
    }

    /// Content type the request arrived with.
    pub fn content_type(&self) -> Option<&MediaType> {
        self.content_type.as_ref()
    }
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Request")
            .field(
                "headers",
                &self.headers.iter().map(|(n, _)| n).collect::<Vec<_>>(),
            )
            .field("action", &self.action)
            .field("content_type", &self.content_type)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Operations
// ============================================================================

/// Service logic run for each request.
pub trait Operation: Send + Sync + 'static {
    /// Produce the response body, or an error to be sent as a fault.
    fn call(&self, request: Request) -> BoxFuture<'static, Result<Payload>>;
}

/// Operation over the whole [`Request`].
pub struct FnOperation<F, Fut> {
    handler: F,
    _phantom: PhantomData<fn() -> Fut>,
}

impl<F, Fut> FnOperation<F, Fut>
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Payload>> + Send + 'static,
{
    /// Wrap a closure.
    pub fn new(handler: F) -> Self {
        Self {
            handler,
            _phantom: PhantomData,
        }
    }
}

impl<F, Fut> Operation for FnOperation<F, Fut>
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Payload>> + Send + 'static,
{
    fn call(&self, request: Request) -> BoxFuture<'static, Result<Payload>> {
        Box::pin((self.handler)(request))
    }
}

/// Operation that downcasts the request body to `T` and boxes its `R`.
pub struct TypedOperation<F, T, R, Fut>
where
    F: Fn(T) -> Fut + Send + Sync + 'static,
    T: Any + Send,
    R: Any + Send + Sync,
    Fut: Future<Output = Result<R>> + Send + 'static,
{
    handler: F,
    _phantom: PhantomData<fn(T) -> (R, Fut)>,
}

impl<F, T, R, Fut> TypedOperation<F, T, R, Fut>
where
    F: Fn(T) -> Fut + Send + Sync + 'static,
    T: Any + Send,
    R: Any + Send + Sync,
    Fut: Future<Output = Result<R>> + Send + 'static,
{
    /// Create a new typed operation.
    pub fn new(handler: F) -> Self {
        Self {
            handler,
            _phantom: PhantomData,
        }
    }
}

impl<F, T, R, Fut> Operation for TypedOperation<F, T, R, Fut>
where
    F: Fn(T) -> Fut + Send + Sync + 'static,
    T: Any + Send,
    R: Any + Send + Sync,
    Fut: Future<Output = Result<R>> + Send + 'static,
{
    fn call(&self, request: Request) -> BoxFuture<'static, Result<Payload>> {
        let body = match request.into_body().downcast::<T>() {
            Ok(body) => *body,
            Err(_) => {
                let message = format!("Request body is not a {}", type_name::<T>());
                return Box::pin(async move { Err::<Payload, _>(WireError::Config(message)) });
            }
        };

        let fut = (self.handler)(body);
        Box::pin(async move {
            let response = fut.await?;
            Ok::<Payload, WireError>(Box::new(response))
        })
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Builder for a [`Service`].
pub struct ServiceBuilder {
    config: EngineConfig,
    protocols: ProtocolDirectory,
    codecs: CodecDirectory,
    request_handlers: Vec<(Phase, Handler)>,
    response_handlers: Vec<(Phase, Handler)>,
    operation: Option<Arc<dyn Operation>>,
}

impl ServiceBuilder {
    /// Create a builder with the default configuration and directories.
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
            protocols: ProtocolDirectory::with_defaults(),
            codecs: CodecDirectory::with_defaults(),
            request_handlers: Vec::new(),
            response_handlers: Vec::new(),
            operation: None,
        }
    }

    /// Use a configuration snapshot.
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Use a protocol directory.
    pub fn protocols(mut self, protocols: ProtocolDirectory) -> Self {
        self.protocols = protocols;
        self
    }

    /// Use a codec directory; it also decides which response types can be
    /// negotiated.
    pub fn codecs(mut self, codecs: CodecDirectory) -> Self {
        self.codecs = codecs;
        self
    }

    /// Add a reader for the request body. Readers are tried in order.
    pub fn request_reader<H: InHandler + 'static>(mut self, handler: H) -> Self {
        self.request_handlers
            .push((Phase::Body, Handler::inbound(handler)));
        self
    }

    /// Add a reader for request header entries.
    pub fn header_reader<H: InHandler + 'static>(mut self, handler: H) -> Self {
        self.request_handlers
            .push((Phase::Header, Handler::inbound(handler)));
        self
    }

    /// Add a writer for the response body.
    pub fn response_writer<H: OutHandler + 'static>(mut self, handler: H) -> Self {
        self.response_handlers
            .push((Phase::Body, Handler::out(handler)));
        self
    }

    /// Add a writer for a response header entry.
    pub fn header_writer<H: OutHandler + 'static>(mut self, handler: H) -> Self {
        self.response_handlers
            .push((Phase::Header, Handler::out(handler)));
        self
    }

    /// Set the operation.
    pub fn operation<O: Operation>(mut self, operation: O) -> Self {
        self.operation = Some(Arc::new(operation));
        self
    }

    /// Set the operation from a closure over the whole [`Request`].
    pub fn handle<F, Fut>(self, handler: F) -> Self
    where
        F: Fn(Request) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Payload>> + Send + 'static,
    {
        self.operation(FnOperation::new(handler))
    }

    /// Set the operation from a closure over the typed request body.
    pub fn typed_operation<F, T, R, Fut>(self, handler: F) -> Self
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        T: Any + Send,
        R: Any + Send + Sync,
        Fut: Future<Output = Result<R>> + Send + 'static,
    {
        self.operation(TypedOperation::new(handler))
    }

    /// Build the service.
    pub fn build(self) -> Result<Service> {
        let operation = self
            .operation
            .ok_or_else(|| WireError::config("Service has no operation"))?;
        let processor = Processor::new(
            Arc::new(self.config),
            &self.protocols,
            Arc::new(self.codecs),
        )?;
        let service = Service {
            processor,
            request_handlers: self.request_handlers,
            response_handlers: self.response_handlers,
            operation,
        };
        service.exchange()?;
        Ok(service)
    }
}

impl Default for ServiceBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Service
// ============================================================================

/// Answers requests arriving on connections.
pub struct Service {
    processor: Processor,
    request_handlers: Vec<(Phase, Handler)>,
    response_handlers: Vec<(Phase, Handler)>,
    operation: Arc<dyn Operation>,
}

impl Service {
    /// Create a builder.
    pub fn builder() -> ServiceBuilder {
        ServiceBuilder::new()
    }

    /// Configuration snapshot in use.
    pub fn config(&self) -> &EngineConfig {
        self.processor.config()
    }

    /// Serve requests on one connection until the peer closes it.
    ///
    /// Errors while handling a request are answered with a fault. Framing
    /// and I/O errors end the connection and are returned.
    pub async fn serve_connection(&self, mut connection: Duplex) -> Result<()> {
        let mut exchange = self.exchange()?;
        let mut served = 0u64;
        loop {
            exchange.reset();
            let received = self
                .processor
                .receive_message(&mut exchange, connection.inbound.as_mut())
                .await;
            let (accept, request_type) = negotiation_inputs(exchange.current());
            let outcome = match received {
                Ok(()) => self.dispatch(&mut exchange).await,
                Err(WireError::ConnectionClosed) => break,
                Err(e) if e.is_fatal_to_connection() => return Err(e),
                Err(e) => Err(e),
            };
            exchange.switch_message_context();

            self.respond(
                &mut exchange,
                accept,
                request_type,
                outcome,
                connection.out.as_mut(),
            )
            .await?;
            exchange.switch_message_context();
            served += 1;
        }
        tracing::debug!("Connection finished after {} request(s)", served);
        Ok(())
    }

    /// Fresh in-then-out exchange with this service's handlers.
    fn exchange(&self) -> Result<ExchangeContext> {
        let mut request = MessageContext::inbound();
        for (phase, handler) in &self.request_handlers {
            request.add_handler(*phase, handler.clone())?;
        }
        let mut response = MessageContext::outbound();
        for (phase, handler) in &self.response_handlers {
            response.add_handler(*phase, handler.clone())?;
        }
        Ok(ExchangeContext::new(vec![request, response]))
    }

    async fn dispatch(&self, exchange: &mut ExchangeContext) -> Result<Payload> {
        let ctx = exchange
            .current_mut()
            .ok_or_else(|| WireError::State("no request context".into()))?;
        if let Some(fault) = ctx.take_fault() {
            return Err(SoapFault::client(format!("Request carries a fault: {}", fault)).into());
        }
        let body = ctx
            .take_body()
            .ok_or_else(|| WireError::config("Request has no body"))?;
        let request = Request {
            body,
            headers: ctx.take_headers(),
            action: ctx.attribute_as::<String>(ATTR_ACTION).cloned(),
            content_type: ctx.attribute_as::<MediaType>(ATTR_CONTENT_TYPE).cloned(),
        };
        tracing::debug!(action = ?request.action(), "Dispatching request");
        self.operation.call(request).await
    }

    async fn respond(
        &self,
        exchange: &mut ExchangeContext,
        accept: Option<String>,
        request_type: Option<MediaType>,
        outcome: Result<Payload>,
        out: &mut dyn OutConnection,
    ) -> Result<()> {
        let codecs = self.processor.codecs();
        let negotiated = codecs.negotiate(accept.as_deref(), request_type.as_ref());
        let response = exchange
            .current_mut()
            .ok_or_else(|| WireError::State("no response context".into()))?;

        let outcome = match negotiated {
            Ok(negotiated) => {
                response.set_attribute(ATTR_CONTENT_TYPE, negotiated.media_type);
                outcome
            }
            Err(e) => {
                if let Some(t) = request_type.filter(|t| codecs.lookup(t).is_some()) {
                    response.set_attribute(ATTR_CONTENT_TYPE, t.without_parameters());
                }
                outcome.and(Err(e))
            }
        };
        match outcome {
            Ok(body) => response.set_body(body),
            Err(e) => {
                let include_stack_trace = self.processor.config().include_stack_trace();
                response.set_fault(fault_from_error(e, include_stack_trace));
            }
        }
        self.processor.send_message(exchange, out).await
    }
}

impl std::fmt::Debug for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Service")
            .field("processor", &self.processor)
            .field("request_handlers", &self.request_handlers.len())
            .field("response_handlers", &self.response_handlers.len())
            .finish_non_exhaustive()
    }
}

fn negotiation_inputs(request: Option<&MessageContext>) -> (Option<String>, Option<MediaType>) {
    match request {
        Some(ctx) => (
            ctx.attribute_as::<String>(ATTR_ACCEPT).cloned(),
            ctx.attribute_as::<MediaType>(ATTR_CONTENT_TYPE).cloned(),
        ),
        None => (None, None),
    }
}
