//! Drives an exchange over a connection.
//!
//! The [`Processor`] walks the contexts of an [`ExchangeContext`] in order:
//! outbound contexts are built by the message protocol, encoded by the
//! codec for their content type and sent; inbound contexts are received,
//! decoded and parsed back through their handlers.
//!
//! Cleanup runs on every exit path: a send always ends with
//! `output_complete` and `close`, a receive always ends with
//! `input_complete`.

use std::sync::Arc;

use bytes::Bytes;

use super::context::{ExchangeContext, MessageContext, ATTR_ACCEPT, ATTR_ACTION, ATTR_CONTENT_TYPE};
use crate::codec::{Codec, CodecDirectory};
use crate::config::EngineConfig;
use crate::error::{Result, WireError};
use crate::media::MediaType;
use crate::soap::{MessageProtocol, ProtocolDirectory};
use crate::transport::{InConnection, MessageProperties, OutConnection};
use crate::xml::TokenBuffer;

/// Sends and receives the messages of an exchange.
///
/// Built from one configuration snapshot; a new snapshot means a new
/// processor.
#[derive(Debug)]
pub struct Processor {
    config: Arc<EngineConfig>,
    protocol: Arc<dyn MessageProtocol>,
    codecs: Arc<CodecDirectory>,
}

impl Processor {
    /// Create a processor, resolving the configured protocol and checking
    /// that a codec serves the configured media type.
    pub fn new(
        config: Arc<EngineConfig>,
        protocols: &ProtocolDirectory,
        codecs: Arc<CodecDirectory>,
    ) -> Result<Self> {
        let protocol = protocols.lookup(config.protocol())?;
        if codecs.lookup(config.media_type()).is_none() {
            return Err(WireError::config(format!(
                "No codec registered for media type {}",
                config.media_type()
            )));
        }
        tracing::debug!(
            protocol = protocol.name(),
            media_type = %config.media_type(),
            "Processor built"
        );
        Ok(Self {
            config,
            protocol,
            codecs,
        })
    }

    /// Configuration snapshot in use.
    pub fn config(&self) -> &Arc<EngineConfig> {
        &self.config
    }

    /// Message protocol in use.
    pub fn protocol(&self) -> &dyn MessageProtocol {
        self.protocol.as_ref()
    }

    /// Codec directory in use.
    pub fn codecs(&self) -> &CodecDirectory {
        &self.codecs
    }

    /// Process every remaining context of `exchange` in order.
    pub async fn invoke(
        &self,
        exchange: &mut ExchangeContext,
        out: &mut dyn OutConnection,
        inbound: &mut dyn InConnection,
    ) -> Result<()> {
        loop {
            let outbound = match exchange.current() {
                Some(ctx) => ctx.is_outbound(),
                None => break,
            };
            if outbound {
                self.send_message(exchange, out).await?;
            } else {
                self.receive_message(exchange, inbound).await?;
            }
            exchange.switch_message_context();
        }
        Ok(())
    }

    /// Send the current context, which must be outbound.
    pub async fn send_message(
        &self,
        exchange: &mut ExchangeContext,
        out: &mut dyn OutConnection,
    ) -> Result<()> {
        match exchange.current() {
            None => return Err(WireError::State("no current message context to send".into())),
            Some(ctx) if !ctx.is_outbound() => {
                return Err(WireError::State(
                    "current message context is not outbound".into(),
                ))
            }
            Some(_) => {}
        }
        let ctx = exchange.begin_processing()?;

        let result = self.write_message(ctx, out).await;
        let completed = out.output_complete().await;
        let closed = out.close().await;
        result.and(completed).and(closed)
    }

    /// Receive into the current context, which must be inbound.
    ///
    /// Fails with [`WireError::ConnectionClosed`] at a clean end of stream.
    pub async fn receive_message(
        &self,
        exchange: &mut ExchangeContext,
        inbound: &mut dyn InConnection,
    ) -> Result<()> {
        match exchange.current() {
            None => {
                return Err(WireError::State(
                    "no current message context to receive".into(),
                ))
            }
            Some(ctx) if ctx.is_outbound() => {
                return Err(WireError::State("current message context is not inbound".into()))
            }
            Some(_) => {}
        }
        let ctx = exchange.begin_processing()?;

        let result = self.read_message(ctx, inbound).await;
        let completed = inbound.input_complete().await;
        result.and(completed)
    }

    fn codec_for(&self, content_type: &MediaType) -> Result<Arc<dyn Codec>> {
        self.codecs.lookup(content_type).ok_or_else(|| {
            WireError::config(format!(
                "No codec registered for media type {}",
                content_type
            ))
        })
    }

    async fn write_message(&self, ctx: &MessageContext, out: &mut dyn OutConnection) -> Result<()> {
        let content_type = ctx
            .attribute_as::<MediaType>(ATTR_CONTENT_TYPE)
            .cloned()
            .unwrap_or_else(|| self.config.media_type().clone());
        let codec = self.codec_for(&content_type)?;

        let mut tokens = TokenBuffer::new();
        if ctx.fault().is_some() && !self.protocol.carries_faults() {
            tracing::debug!(
                protocol = self.protocol.name(),
                "Fault sent as a bodiless server error"
            );
        } else {
            self.protocol.build(ctx, &mut tokens)?;
        }
        let body = if tokens.is_empty() {
            Bytes::new()
        } else {
            codec.encode(&tokens, &content_type)?
        };

        if ctx.fault().is_some() {
            out.set_internal_server_error();
        }
        let properties = MessageProperties {
            accept: ctx.attribute_as::<String>(ATTR_ACCEPT).cloned(),
            action: ctx.attribute_as::<String>(ATTR_ACTION).cloned(),
            status: None,
        };
        out.send(&content_type, properties, body).await
    }

    async fn read_message(
        &self,
        ctx: &mut MessageContext,
        inbound: &mut dyn InConnection,
    ) -> Result<()> {
        if !inbound.init().await? {
            return Err(WireError::ConnectionClosed);
        }
        if let Some(error) = inbound.transport_error() {
            return Err(WireError::Transport(error));
        }

        let properties = inbound.properties().clone();
        if let Some(accept) = properties.accept {
            ctx.set_attribute(ATTR_ACCEPT, accept);
        }
        if let Some(action) = properties.action {
            ctx.set_attribute(ATTR_ACTION, action);
        }
        let content_type = inbound
            .content_type()
            .cloned()
            .unwrap_or_else(|| self.config.media_type().clone());
        ctx.set_attribute(ATTR_CONTENT_TYPE, content_type.clone());

        let body = inbound.receive().await?;
        if body.is_empty() {
            return Err(WireError::config("Received message has no body"));
        }
        let codec = self.codec_for(&content_type)?;
        let mut tokens = codec.decode(&body, &content_type)?;
        self.protocol.parse(ctx, &mut tokens)?;

        if !ctx.has_body() && ctx.fault().is_none() {
            return Err(WireError::config("No handler consumed the message body"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::exchange::{Handler, Payload, Phase};
    use crate::pool::BufferPool;
    use crate::soap::SoapFault;
    use crate::transport::{pipe, ConnectionProperties, DimeOutConnection, Duplex};
    use crate::xml::{read_text, start_element, QName, TokenSink, TokenSource};

    /// Counts the connection calls a processor makes.
    #[derive(Debug, Default)]
    struct Calls {
        sent: usize,
        output_complete: usize,
        closed: usize,
        input_complete: usize,
    }

    struct RecordingOut(Arc<Mutex<Calls>>);

    #[async_trait]
    impl OutConnection for RecordingOut {
        async fn send(&mut self, _: &MediaType, _: MessageProperties, _: Bytes) -> Result<()> {
            self.0.lock().unwrap().sent += 1;
            Ok(())
        }

        async fn output_complete(&mut self) -> Result<()> {
            self.0.lock().unwrap().output_complete += 1;
            Ok(())
        }

        async fn close(&mut self) -> Result<()> {
            self.0.lock().unwrap().closed += 1;
            Ok(())
        }

        fn set_internal_server_error(&mut self) {}

        async fn send_not_found_error(&mut self) -> Result<()> {
            Ok(())
        }

        async fn shutdown(&mut self) -> Result<()> {
            Ok(())
        }
    }

    struct RecordingIn {
        calls: Arc<Mutex<Calls>>,
        content_type: MediaType,
        properties: MessageProperties,
        body: Bytes,
    }

    impl RecordingIn {
        fn new(calls: &Arc<Mutex<Calls>>, body: &'static str) -> Self {
            Self {
                calls: Arc::clone(calls),
                content_type: MediaType::parse("text/xml").unwrap(),
                properties: MessageProperties::default(),
                body: Bytes::from_static(body.as_bytes()),
            }
        }
    }

    #[async_trait]
    impl InConnection for RecordingIn {
        async fn init(&mut self) -> Result<bool> {
            Ok(true)
        }

        fn content_type(&self) -> Option<&MediaType> {
            Some(&self.content_type)
        }

        fn properties(&self) -> &MessageProperties {
            &self.properties
        }

        fn transport_error(&self) -> Option<String> {
            None
        }

        async fn receive(&mut self) -> Result<Bytes> {
            Ok(self.body.clone())
        }

        async fn input_complete(&mut self) -> Result<()> {
            self.calls.lock().unwrap().input_complete += 1;
            Ok(())
        }
    }

    fn failing_writer() -> Handler {
        Handler::out(|_ctx: &MessageContext, _sink: &mut dyn TokenSink| -> Result<()> {
            Err(WireError::config("body writer failed"))
        })
    }

    fn processor(protocol: &str) -> Processor {
        let config = EngineConfig::new().with_protocol(protocol);
        Processor::new(
            Arc::new(config),
            &ProtocolDirectory::with_defaults(),
            Arc::new(CodecDirectory::with_defaults()),
        )
        .unwrap()
    }

    fn echo_writer() -> Handler {
        Handler::out(|ctx: &MessageContext, sink: &mut dyn TokenSink| -> Result<()> {
            let text = ctx.body_as::<String>().cloned().unwrap_or_default();
            sink.text_element(QName::local("echo"), &text)
        })
    }

    fn echo_reader() -> Handler {
        Handler::inbound(
            |_ctx: &mut MessageContext, source: &mut dyn TokenSource| -> Result<Option<Payload>> {
                match start_element(source)? {
                    Some(el) if el.name.local == "echo" => Ok(Some(Box::new(read_text(source)?))),
                    _ => Ok(None),
                }
            },
        )
    }

    fn outbound(body: &str) -> MessageContext {
        let mut ctx = MessageContext::outbound()
            .with_handler(Phase::Body, echo_writer())
            .unwrap();
        ctx.set_body(Box::new(body.to_string()));
        ctx
    }

    fn inbound() -> MessageContext {
        MessageContext::inbound()
            .with_handler(Phase::Body, echo_reader())
            .unwrap()
    }

    fn connections() -> (Duplex, Duplex) {
        pipe(&ConnectionProperties::default())
    }

    #[test]
    fn test_unknown_protocol_is_config_error() {
        let config = EngineConfig::new().with_protocol("corba");
        let result = Processor::new(
            Arc::new(config),
            &ProtocolDirectory::with_defaults(),
            Arc::new(CodecDirectory::with_defaults()),
        );
        match result {
            Err(WireError::Config(msg)) => assert_eq!(msg, "Unknown protocol name: corba"),
            other => panic!("expected config error, got {:?}", other),
        }
    }

    #[test]
    fn test_media_type_without_codec_is_config_error() {
        let config = EngineConfig::new()
            .with_media_type("application/x-unknown")
            .unwrap();
        let result = Processor::new(
            Arc::new(config),
            &ProtocolDirectory::with_defaults(),
            Arc::new(CodecDirectory::with_defaults()),
        );
        assert!(matches!(result, Err(WireError::Config(_))));
    }

    #[tokio::test]
    async fn test_send_then_receive() {
        let processor = processor("soap");
        let (mut left, mut right) = connections();

        let mut sending = ExchangeContext::new(vec![outbound("hello")]);
        processor
            .invoke(&mut sending, left.out.as_mut(), left.inbound.as_mut())
            .await
            .unwrap();
        assert!(sending.is_complete());

        let mut receiving = ExchangeContext::new(vec![inbound()]);
        processor
            .invoke(&mut receiving, right.out.as_mut(), right.inbound.as_mut())
            .await
            .unwrap();
        let ctx = receiving.context(0).unwrap();
        assert_eq!(ctx.body_as::<String>().map(String::as_str), Some("hello"));
        assert_eq!(
            ctx.attribute_as::<MediaType>(ATTR_CONTENT_TYPE)
                .map(MediaType::base)
                .as_deref(),
            Some("text/xml")
        );
    }

    #[tokio::test]
    async fn test_send_requires_outbound_context() {
        let processor = processor("soap");
        let (mut left, _right) = connections();

        let mut exchange = ExchangeContext::new(vec![inbound()]);
        let result = processor.send_message(&mut exchange, left.out.as_mut()).await;
        assert!(matches!(result, Err(WireError::State(_))));

        let mut empty = ExchangeContext::new(Vec::new());
        let result = processor.send_message(&mut empty, left.out.as_mut()).await;
        assert!(matches!(result, Err(WireError::State(_))));
    }

    #[tokio::test]
    async fn test_receive_requires_inbound_context() {
        let processor = processor("soap");
        let (mut left, _right) = connections();

        let mut exchange = ExchangeContext::new(vec![outbound("x")]);
        let result = processor
            .receive_message(&mut exchange, left.inbound.as_mut())
            .await;
        assert!(matches!(result, Err(WireError::State(_))));
    }

    #[tokio::test]
    async fn test_receive_at_end_of_stream() {
        let processor = processor("soap");
        let (left, mut right) = connections();
        drop(left);

        let mut exchange = ExchangeContext::new(vec![inbound()]);
        let result = processor
            .receive_message(&mut exchange, right.inbound.as_mut())
            .await;
        assert!(matches!(result, Err(WireError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_unclaimed_body_is_config_error() {
        let processor = processor("soap");
        let (mut left, mut right) = connections();

        let mut sending = ExchangeContext::new(vec![outbound("hello")]);
        processor
            .invoke(&mut sending, left.out.as_mut(), left.inbound.as_mut())
            .await
            .unwrap();

        let mut receiving = ExchangeContext::new(vec![MessageContext::inbound()]);
        let result = processor
            .invoke(&mut receiving, right.out.as_mut(), right.inbound.as_mut())
            .await;
        match result {
            Err(WireError::Config(msg)) => assert_eq!(msg, "No handler consumed the message body"),
            other => panic!("expected config error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_fault_is_received_as_data() {
        let processor = processor("soap");
        let (mut left, mut right) = connections();

        let mut ctx = MessageContext::outbound();
        ctx.set_fault(SoapFault::client("Invalid message format"));
        let mut sending = ExchangeContext::new(vec![ctx]);
        processor
            .invoke(&mut sending, left.out.as_mut(), left.inbound.as_mut())
            .await
            .unwrap();

        let mut receiving = ExchangeContext::new(vec![inbound()]);
        processor
            .invoke(&mut receiving, right.out.as_mut(), right.inbound.as_mut())
            .await
            .unwrap();
        let fault = receiving.context(0).and_then(MessageContext::fault).unwrap();
        assert_eq!(fault.code().local(), "Client");
        assert_eq!(fault.message(), "Invalid message format");
    }

    #[tokio::test]
    async fn test_pox_fault_becomes_transport_error() {
        let processor = processor("pox");
        let (mut left, mut right) = connections();

        let mut ctx = MessageContext::outbound();
        ctx.set_fault(SoapFault::server("boom"));
        let mut sending = ExchangeContext::new(vec![ctx]);
        processor
            .invoke(&mut sending, left.out.as_mut(), left.inbound.as_mut())
            .await
            .unwrap();

        let mut receiving = ExchangeContext::new(vec![inbound()]);
        let result = processor
            .invoke(&mut receiving, right.out.as_mut(), right.inbound.as_mut())
            .await;
        match result {
            Err(WireError::Transport(msg)) => assert_eq!(msg, "500 Internal Server Error"),
            other => panic!("expected transport error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_attributes_travel_as_properties() {
        let processor = processor("soap");
        let (mut left, mut right) = connections();

        let mut ctx = outbound("hi");
        ctx.set_attribute(ATTR_ACTION, "urn:echo".to_string());
        ctx.set_attribute(ATTR_ACCEPT, "application/x-msgpack-xml".to_string());
        ctx.set_attribute(
            ATTR_CONTENT_TYPE,
            MediaType::parse("application/x-msgpack-xml").unwrap(),
        );
        let mut sending = ExchangeContext::new(vec![ctx]);
        processor
            .invoke(&mut sending, left.out.as_mut(), left.inbound.as_mut())
            .await
            .unwrap();

        let mut receiving = ExchangeContext::new(vec![inbound()]);
        processor
            .invoke(&mut receiving, right.out.as_mut(), right.inbound.as_mut())
            .await
            .unwrap();
        let ctx = receiving.context(0).unwrap();
        assert_eq!(
            ctx.attribute_as::<String>(ATTR_ACTION).map(String::as_str),
            Some("urn:echo")
        );
        assert_eq!(
            ctx.attribute_as::<String>(ATTR_ACCEPT).map(String::as_str),
            Some("application/x-msgpack-xml")
        );
        assert_eq!(ctx.body_as::<String>().map(String::as_str), Some("hi"));
    }

    #[tokio::test]
    async fn test_exchange_reuse_after_reset() {
        let processor = processor("pox");
        let (mut left, mut right) = connections();

        let mut sending = ExchangeContext::new(vec![outbound("one")]);
        let mut receiving = ExchangeContext::new(vec![inbound()]);
        for text in ["one", "two"] {
            sending.reset();
            sending
                .current_mut()
                .unwrap()
                .set_body(Box::new(text.to_string()));
            processor
                .invoke(&mut sending, left.out.as_mut(), left.inbound.as_mut())
                .await
                .unwrap();

            receiving.reset();
            processor
                .invoke(&mut receiving, right.out.as_mut(), right.inbound.as_mut())
                .await
                .unwrap();
            assert_eq!(
                receiving.context(0).and_then(|c| c.body_as::<String>()).map(String::as_str),
                Some(text)
            );
        }
    }

    #[tokio::test]
    async fn test_send_cleans_up_when_body_writer_fails() {
        let processor = processor("soap");
        let calls = Arc::new(Mutex::new(Calls::default()));
        let mut out = RecordingOut(Arc::clone(&calls));

        let ctx = MessageContext::outbound()
            .with_handler(Phase::Body, failing_writer())
            .unwrap();
        let mut exchange = ExchangeContext::new(vec![ctx]);
        let result = processor.send_message(&mut exchange, &mut out).await;

        assert!(matches!(result, Err(WireError::Config(_))));
        let calls = calls.lock().unwrap();
        assert_eq!(calls.sent, 0);
        assert_eq!(calls.output_complete, 1);
        assert_eq!(calls.closed, 1);
    }

    #[tokio::test]
    async fn test_send_cleans_up_when_codec_is_missing() {
        let processor = processor("soap");
        let calls = Arc::new(Mutex::new(Calls::default()));
        let mut out = RecordingOut(Arc::clone(&calls));

        let mut ctx = outbound("hello");
        ctx.set_attribute(
            ATTR_CONTENT_TYPE,
            MediaType::parse("application/x-unknown").unwrap(),
        );
        let mut exchange = ExchangeContext::new(vec![ctx]);
        let result = processor.send_message(&mut exchange, &mut out).await;

        assert!(matches!(result, Err(WireError::Config(_))));
        let calls = calls.lock().unwrap();
        assert_eq!(calls.sent, 0);
        assert_eq!((calls.output_complete, calls.closed), (1, 1));
    }

    #[tokio::test]
    async fn test_receive_cleans_up_when_reading_fails() {
        let processor = processor("pox");
        let calls = Arc::new(Mutex::new(Calls::default()));

        // Malformed XML, then a well-formed body nobody claims.
        for body in ["<echo>unterminated", "<other>x</other>"] {
            let mut inbound_conn = RecordingIn::new(&calls, body);
            let mut exchange = ExchangeContext::new(vec![inbound()]);
            let result = processor
                .receive_message(&mut exchange, &mut inbound_conn)
                .await;
            assert!(result.is_err(), "{body}");
        }
        assert_eq!(calls.lock().unwrap().input_complete, 2);
    }

    #[tokio::test]
    async fn test_failed_send_returns_pooled_buffer() {
        let processor = processor("soap");
        let pool = BufferPool::new(64);
        let mut out =
            DimeOutConnection::new(Vec::new(), pool.clone(), &ConnectionProperties::default());
        assert!(out.holds_buffer());
        assert_eq!(pool.available(), 0);

        let ctx = MessageContext::outbound()
            .with_handler(Phase::Body, failing_writer())
            .unwrap();
        let mut exchange = ExchangeContext::new(vec![ctx]);
        let result = processor.send_message(&mut exchange, &mut out).await;

        assert!(result.is_err());
        assert!(!out.holds_buffer());
        assert_eq!(pool.available(), 1);
    }

    #[tokio::test]
    async fn test_pox_fault_skips_body_writers() {
        let processor = processor("pox");
        let calls = Arc::new(Mutex::new(Calls::default()));
        let mut out = RecordingOut(Arc::clone(&calls));

        // The body writer would fail if the protocol asked it to run.
        let mut ctx = MessageContext::outbound()
            .with_handler(Phase::Body, failing_writer())
            .unwrap();
        ctx.set_fault(SoapFault::server("boom"));
        let mut exchange = ExchangeContext::new(vec![ctx]);
        processor.send_message(&mut exchange, &mut out).await.unwrap();
        assert_eq!(calls.lock().unwrap().sent, 1);
    }
}
