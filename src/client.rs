//! Client builder and request/response calls.
//!
//! The [`ClientBuilder`] collects handlers and the configuration snapshot;
//! the [`Client`] runs one out-then-in exchange per [`call`](Client::call):
//! 1. Open a duplex connection (lazily, kept between calls)
//! 2. Write the request through the request and header writers
//! 3. Read the response through the response, header and fault readers
//! 4. Return the body, or the received fault as [`WireError::Fault`]
//!
//! Changing the configuration rebuilds the processor from the new snapshot.
//!
//! # Example
//!
//! ```ignore
//! use soapwire::{Client, EngineConfig};
//! use soapwire::transport::TcpTransport;
//!
//! let mut client = Client::builder(Arc::new(TcpTransport::new("127.0.0.1:8080")))
//!     .request_writer(write_echo)
//!     .response_reader(read_echo)
//!     .build()?;
//!
//! let answer: String = client.call_typed("hello".to_string()).await?;
//! ```

use std::any::{type_name, Any};
use std::sync::Arc;

use crate::codec::CodecDirectory;
use crate::config::EngineConfig;
use crate::error::{Result, WireError};
use crate::exchange::{
    ExchangeContext, Handler, InHandler, MessageContext, OutHandler, Payload, Phase, Processor,
    ATTR_ACCEPT, ATTR_ACTION,
};
use crate::soap::ProtocolDirectory;
use crate::transport::{Duplex, Transport};

/// Builder for configuring and creating a [`Client`].
pub struct ClientBuilder {
    transport: Arc<dyn Transport>,
    config: EngineConfig,
    protocols: ProtocolDirectory,
    codecs: CodecDirectory,
    request_handlers: Vec<(Phase, Handler)>,
    response_handlers: Vec<(Phase, Handler)>,
}

impl ClientBuilder {
    /// Create a builder using `transport`.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            config: EngineConfig::default(),
            protocols: ProtocolDirectory::with_defaults(),
            codecs: CodecDirectory::with_defaults(),
            request_handlers: Vec::new(),
            response_handlers: Vec::new(),
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

    /// Use a codec directory.
    pub fn codecs(mut self, codecs: CodecDirectory) -> Self {
        self.codecs = codecs;
        self
    }

    /// Add a writer for the request body.
    pub fn request_writer<H: OutHandler + 'static>(mut self, handler: H) -> Self {
        self.request_handlers
            .push((Phase::Body, Handler::out(handler)));
        self
    }

    /// Add a writer for a request header entry.
    pub fn header_writer<H: OutHandler + 'static>(mut self, handler: H) -> Self {
        self.request_handlers
            .push((Phase::Header, Handler::out(handler)));
        self
    }

    /// Add a reader for the response body. Readers are tried in order.
    pub fn response_reader<H: InHandler + 'static>(mut self, handler: H) -> Self {
        self.response_handlers
            .push((Phase::Body, Handler::inbound(handler)));
        self
    }

    /// Add a reader for response header entries.
    pub fn header_reader<H: InHandler + 'static>(mut self, handler: H) -> Self {
        self.response_handlers
            .push((Phase::Header, Handler::inbound(handler)));
        self
    }

    /// Add a reader for fault detail entries.
    pub fn fault_reader<H: InHandler + 'static>(mut self, handler: H) -> Self {
        self.response_handlers
            .push((Phase::BodyFault, Handler::inbound(handler)));
        self
    }

    /// Build the client. No connection is opened yet.
    pub fn build(self) -> Result<Client> {
        let mut request = MessageContext::outbound();
        for (phase, handler) in self.request_handlers {
            request.add_handler(phase, handler)?;
        }
        let mut response = MessageContext::inbound();
        for (phase, handler) in self.response_handlers {
            response.add_handler(phase, handler)?;
        }

        let codecs = Arc::new(self.codecs);
        let config = Arc::new(self.config);
        let processor = Processor::new(Arc::clone(&config), &self.protocols, Arc::clone(&codecs))?;
        Ok(Client {
            transport: self.transport,
            protocols: self.protocols,
            codecs,
            config,
            processor,
            exchange: ExchangeContext::request_response(request, response),
            connection: None,
        })
    }
}

/// Sends requests and returns responses.
pub struct Client {
    transport: Arc<dyn Transport>,
    protocols: ProtocolDirectory,
    codecs: Arc<CodecDirectory>,
    config: Arc<EngineConfig>,
    processor: Processor,
    exchange: ExchangeContext,
    connection: Option<Duplex>,
}

impl Client {
    /// Create a builder.
    pub fn builder(transport: Arc<dyn Transport>) -> ClientBuilder {
        ClientBuilder::new(transport)
    }

    /// Configuration snapshot in use.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Check if a connection is currently open.
    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    /// Replace the configuration and rebuild the processor.
    ///
    /// On error the previous configuration stays in effect. The open
    /// connection is dropped if its framing settings changed.
    pub fn set_config(&mut self, config: EngineConfig) -> Result<()> {
        let config = Arc::new(config);
        let processor = Processor::new(Arc::clone(&config), &self.protocols, Arc::clone(&self.codecs))?;
        if config.connection_properties() != self.config.connection_properties() {
            self.connection = None;
        }
        tracing::debug!(protocol = config.protocol(), "Client configuration replaced");
        self.config = config;
        self.processor = processor;
        Ok(())
    }

    /// Send `body` and wait for the response body.
    ///
    /// A SOAP fault in the response is returned as [`WireError::Fault`].
    pub async fn call(&mut self, body: Payload) -> Result<Payload> {
        self.exchange.reset();
        let request = self
            .exchange
            .context_mut(0)
            .ok_or_else(|| WireError::State("no request context".into()))?;
        request.set_body(body);
        if let Some(accept) = self.config.accept() {
            request.set_attribute(ATTR_ACCEPT, accept.to_string());
        }
        if let Some(action) = self.config.soap_action() {
            request.set_attribute(ATTR_ACTION, action.to_string());
        }

        if self.connection.is_none() {
            let properties = self.config.connection_properties();
            self.connection = Some(self.transport.open_duplex(&properties).await?);
        }
        let connection = self.connection.as_mut().ok_or(WireError::ConnectionClosed)?;

        let result = self
            .processor
            .invoke(
                &mut self.exchange,
                connection.out.as_mut(),
                connection.inbound.as_mut(),
            )
            .await;
        if let Err(e) = &result {
            if e.is_fatal_to_connection() {
                tracing::warn!("Dropping connection after error: {}", e);
                self.connection = None;
            }
        }
        result?;

        let response = self
            .exchange
            .last_mut()
            .ok_or_else(|| WireError::State("no response context".into()))?;
        if let Some(fault) = response.take_fault() {
            return Err(fault.into());
        }
        response
            .take_body()
            .ok_or_else(|| WireError::config("No handler consumed the message body"))
    }

    /// Typed form of [`call`](Self::call).
    pub async fn call_typed<T, R>(&mut self, body: T) -> Result<R>
    where
        T: Any + Send + Sync,
        R: Any,
    {
        let response = self.call(Box::new(body)).await?;
        match response.downcast::<R>() {
            Ok(value) => Ok(*value),
            Err(_) => Err(WireError::config(format!(
                "Response body is not a {}",
                type_name::<R>()
            ))),
        }
    }

    /// Shut down the open connection, if any.
    pub async fn close(&mut self) -> Result<()> {
        if let Some(mut connection) = self.connection.take() {
            connection.out.shutdown().await?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("config", &self.config)
            .field("connected", &self.connection.is_some())
            .finish_non_exhaustive()
    }
}
