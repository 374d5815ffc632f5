//! Integration tests for soapwire.
//!
//! These tests run client and service against each other over the
//! in-memory and TCP transports.

use std::sync::Arc;

use soapwire::codec::{CodecDirectory, MsgPackCodec};
use soapwire::exchange::{MessageContext, Payload, ATTR_CONTENT_TYPE};
use soapwire::media::MediaType;
use soapwire::service::Request;
use soapwire::soap::{SoapFault, TextDetail, SOAP_ENV_NS};
use soapwire::transport::{memory_transport, MemoryTransport, TcpServer, TcpTransport, Transport};
use soapwire::xml::{read_text, start_element, Element, QName, TokenSink, TokenSource};
use soapwire::{Client, ClientBuilder, EngineConfig, Result, Service, ServiceBuilder, WireError};

// ============================================================================
// Handlers
// ============================================================================

fn write_echo(ctx: &MessageContext, sink: &mut dyn TokenSink) -> Result<()> {
    let text = ctx.body_as::<String>().cloned().unwrap_or_default();
    sink.text_element(QName::namespaced("urn:echo", "echo"), &text)
}

fn read_echo(_ctx: &mut MessageContext, source: &mut dyn TokenSource) -> Result<Option<Payload>> {
    match start_element(source)? {
        Some(el) if el.name.matches(Some("urn:echo"), "echo") => {
            Ok(Some(Box::new(read_text(source)?)))
        }
        _ => Ok(None),
    }
}

/// Reads the echo body together with the content type it arrived in.
fn read_echo_with_type(
    ctx: &mut MessageContext,
    source: &mut dyn TokenSource,
) -> Result<Option<Payload>> {
    let content_type = ctx
        .attribute_as::<MediaType>(ATTR_CONTENT_TYPE)
        .map(MediaType::base)
        .unwrap_or_default();
    match start_element(source)? {
        Some(el) if el.name.local == "echo" => {
            Ok(Some(Box::new((read_text(source)?, content_type))))
        }
        _ => Ok(None),
    }
}

fn write_transaction(ctx: &MessageContext, sink: &mut dyn TokenSink) -> Result<()> {
    let id = ctx.attribute_as::<u32>("test.transaction").copied().unwrap_or(0);
    sink.start(
        Element::new(QName::prefixed("urn:tx", "t", "transaction"))
            .with_namespace(Some("t"), "urn:tx")
            .with_attribute(QName::prefixed(SOAP_ENV_NS, "SOAP", "mustUnderstand"), "1"),
    )?;
    sink.text(&id.to_string())?;
    sink.end()
}

fn read_transaction(
    _ctx: &mut MessageContext,
    source: &mut dyn TokenSource,
) -> Result<Option<Payload>> {
    match start_element(source)? {
        Some(el) if el.name.matches(Some("urn:tx"), "transaction") => {
            let text = read_text(source)?;
            let id: u32 = text
                .trim()
                .parse()
                .map_err(|_| WireError::Config(format!("bad transaction id {}", text)))?;
            Ok(Some(Box::new(id)))
        }
        _ => Ok(None),
    }
}

fn read_error_message(
    _ctx: &mut MessageContext,
    source: &mut dyn TokenSource,
) -> Result<Option<Payload>> {
    match start_element(source)? {
        Some(el) if el.name.local == "ErrorMessage" => Ok(Some(Box::new(read_text(source)?))),
        _ => Ok(None),
    }
}

fn read_stack_trace(
    _ctx: &mut MessageContext,
    source: &mut dyn TokenSource,
) -> Result<Option<Payload>> {
    match start_element(source)? {
        Some(el) if el.name.local == "stackTrace" => Ok(Some(Box::new(read_text(source)?))),
        _ => Ok(None),
    }
}

// ============================================================================
// Setup
// ============================================================================

/// Echo service: upper-cases the text, answers "fail" with a client fault
/// carrying two details and "crash" with a plain error.
fn echo_service() -> ServiceBuilder {
    Service::builder()
        .request_reader(read_echo)
        .response_writer(write_echo)
        .typed_operation(|text: String| async move {
            match text.as_str() {
                "fail" => Err(WireError::from(
                    SoapFault::client("Invalid message format")
                        .with_actor("http://example.org/someactor")
                        .with_detail_writer(TextDetail::new(QName::local("ErrorMessage"), "text"))
                        .with_detail_writer(TextDetail::new(QName::local("ErrorType"), "Severe")),
                )),
                "crash" => Err(WireError::Config("echo backend unavailable".into())),
                _ => Ok(text.to_uppercase()),
            }
        })
}

fn spawn_memory_service(service: Service) -> MemoryTransport {
    let (transport, mut listener) = memory_transport();
    let service = Arc::new(service);
    tokio::spawn(async move {
        while let Some(connection) = listener.accept().await {
            let service = Arc::clone(&service);
            tokio::spawn(async move {
                let _ = service.serve_connection(connection).await;
            });
        }
    });
    transport
}

fn client_for(transport: impl Transport + 'static) -> ClientBuilder {
    Client::builder(Arc::new(transport))
        .request_writer(write_echo)
        .response_reader(read_echo)
}

// ============================================================================
// Exchanges
// ============================================================================

/// Test a SOAP request/response over the in-memory transport.
#[tokio::test]
async fn test_echo_over_memory() {
    let transport = spawn_memory_service(echo_service().build().unwrap());
    let mut client = client_for(transport).build().unwrap();

    let answer: String = client.call_typed("hello, world".to_string()).await.unwrap();
    assert_eq!(answer, "HELLO, WORLD");

    let again: String = client.call_typed("again".to_string()).await.unwrap();
    assert_eq!(again, "AGAIN");
}

/// Test a SOAP request/response over TCP.
#[tokio::test]
async fn test_echo_over_tcp() {
    let server = TcpServer::bind("127.0.0.1:0").await.unwrap();
    let addr = server.local_addr().unwrap();
    let service = Arc::new(echo_service().build().unwrap());
    tokio::spawn(server.serve(service));

    let mut client = client_for(TcpTransport::new(addr.to_string())).build().unwrap();
    for text in ["one", "two", "three"] {
        let answer: String = client.call_typed(text.to_string()).await.unwrap();
        assert_eq!(answer, text.to_uppercase());
    }
    client.close().await.unwrap();
}

/// Test that a large body survives chunking into many DIME records.
#[tokio::test]
async fn test_large_body_with_small_records() {
    let transport = spawn_memory_service(echo_service().build().unwrap());
    let config = EngineConfig::new()
        .with_buffer_size(64)
        .unwrap()
        .with_read_size(13)
        .unwrap();
    let mut client = client_for(transport).config(config).build().unwrap();

    let text = "abc".repeat(5000);
    let answer: String = client.call_typed(text.clone()).await.unwrap();
    assert_eq!(answer, text.to_uppercase());
}

/// Test that a connect failure is a transport error.
#[tokio::test]
async fn test_connect_failure_is_transport_error() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let mut client = client_for(TcpTransport::new(addr.to_string())).build().unwrap();
    let result = client.call_typed::<String, String>("x".to_string()).await;
    assert!(matches!(result, Err(WireError::Transport(_))));
}

// ============================================================================
// Faults
// ============================================================================

/// Test that a fault raised by the operation reaches the client with its
/// code, string, actor and the first claimed detail.
#[tokio::test]
async fn test_fault_with_details_reaches_client() {
    let transport = spawn_memory_service(echo_service().build().unwrap());
    let mut client = client_for(transport)
        .fault_reader(read_error_message)
        .build()
        .unwrap();

    let err = client
        .call_typed::<String, String>("fail".to_string())
        .await
        .unwrap_err();
    match err {
        WireError::Fault(fault) => {
            assert_eq!(fault.code().local(), "Client");
            assert_eq!(fault.message(), "Invalid message format");
            assert_eq!(fault.actor(), Some("http://example.org/someactor"));
            assert_eq!(fault.detail_as::<String>().map(String::as_str), Some("text"));
        }
        other => panic!("expected fault, got {:?}", other),
    }

    // The connection stays usable after a fault.
    let answer: String = client.call_typed("ok".to_string()).await.unwrap();
    assert_eq!(answer, "OK");
}

/// Test that a fault without a matching detail handler has no details.
#[tokio::test]
async fn test_fault_without_detail_handler() {
    let transport = spawn_memory_service(echo_service().build().unwrap());
    let mut client = client_for(transport).build().unwrap();

    match client.call_typed::<String, String>("fail".to_string()).await {
        Err(WireError::Fault(fault)) => {
            assert!(!fault.has_details());
            assert_eq!(fault.code().local(), "Client");
            assert_eq!(fault.message(), "Invalid message format");
            assert_eq!(fault.actor(), Some("http://example.org/someactor"));
        }
        other => panic!("expected fault, got {:?}", other),
    }
}

/// Test that a plain error becomes a Server fault, with the error chain as
/// detail when stack traces are enabled.
#[tokio::test]
async fn test_error_becomes_server_fault_with_stack_trace() {
    let service = echo_service()
        .config(EngineConfig::new().with_stack_trace(true))
        .build()
        .unwrap();
    let transport = spawn_memory_service(service);
    let mut client = client_for(transport)
        .fault_reader(read_stack_trace)
        .build()
        .unwrap();

    match client.call_typed::<String, String>("crash".to_string()).await {
        Err(WireError::Fault(fault)) => {
            assert_eq!(fault.code().local(), "Server");
            assert!(fault.message().contains("echo backend unavailable"));
            let trace = fault.detail_as::<String>().unwrap();
            assert!(trace.contains("Config"), "{}", trace);
        }
        other => panic!("expected fault, got {:?}", other),
    }
}

/// Test that a plain-XML service reports failures through the transport.
#[tokio::test]
async fn test_pox_failure_is_transport_error() {
    let pox = EngineConfig::new().with_protocol("pox");
    let transport = spawn_memory_service(echo_service().config(pox.clone()).build().unwrap());
    let mut client = client_for(transport).config(pox).build().unwrap();

    let answer: String = client.call_typed("plain".to_string()).await.unwrap();
    assert_eq!(answer, "PLAIN");

    match client.call_typed::<String, String>("crash".to_string()).await {
        Err(WireError::Transport(msg)) => assert_eq!(msg, "500 Internal Server Error"),
        other => panic!("expected transport error, got {:?}", other),
    }
}

// ============================================================================
// Headers and negotiation
// ============================================================================

/// Test that a must-understand header is claimed by the service's header
/// reader, and refused when the service has none.
#[tokio::test]
async fn test_header_round_trip() {
    let service = Service::builder()
        .request_reader(read_echo)
        .header_reader(read_transaction)
        .response_writer(write_echo)
        .handle(|request: Request| async move {
            let id = request.header_as::<u32>(Some("urn:tx"), "transaction").copied();
            let text = request.body_as::<String>().cloned().unwrap_or_default();
            Ok::<Payload, WireError>(Box::new(format!("{}#{}", text, id.unwrap_or(0))))
        })
        .build()
        .unwrap();
    let transport = spawn_memory_service(service);

    let mut client = client_for(transport)
        .header_writer(write_transaction)
        .build()
        .unwrap();
    let answer: String = client.call_typed("tx".to_string()).await.unwrap();
    assert_eq!(answer, "tx#0");

    let plain = spawn_memory_service(echo_service().build().unwrap());
    let mut client = client_for(plain).header_writer(write_transaction).build().unwrap();
    match client.call_typed::<String, String>("tx".to_string()).await {
        Err(WireError::Fault(fault)) => {
            assert_eq!(fault.code().local(), "MustUnderstand");
            assert_eq!(fault.message(), "SOAP header t:transaction was not understood");
        }
        other => panic!("expected fault, got {:?}", other),
    }
}

/// Test that the most preferred acceptable type is chosen for the response.
#[tokio::test]
async fn test_negotiation_prefers_first_accepted_type() {
    let xbis = MediaType::parse("application/x-xbis").unwrap();
    let codecs = || {
        CodecDirectory::with_defaults().with_codec(Arc::new(MsgPackCodec::with_media_type(
            MediaType::parse("application/x-xbis").unwrap(),
        )))
    };
    let negotiated = codecs()
        .negotiate(Some("application/x-xbis, text/xml;q=0.5"), None)
        .unwrap();
    assert_eq!(negotiated.media_type.base(), xbis.base());

    let transport = spawn_memory_service(echo_service().codecs(codecs()).build().unwrap());

    let config = EngineConfig::new()
        .with_accept(Some("application/x-xbis, text/xml;q=0.5"))
        .unwrap();
    let mut client = Client::builder(Arc::new(transport))
        .codecs(codecs())
        .config(config)
        .request_writer(write_echo)
        .response_reader(read_echo_with_type)
        .build()
        .unwrap();

    let (text, content_type): (String, String) = client.call_typed("hi".to_string()).await.unwrap();
    assert_eq!(text, "HI");
    assert_eq!(content_type, xbis.base());
}

/// Test a binary request with the response negotiated back to XML.
#[tokio::test]
async fn test_msgpack_request() {
    let transport = spawn_memory_service(echo_service().build().unwrap());
    let config = EngineConfig::new()
        .with_media_type("application/x-msgpack-xml")
        .unwrap()
        .with_accept(Some("text/xml"))
        .unwrap();
    let mut client = Client::builder(Arc::new(transport))
        .config(config)
        .request_writer(write_echo)
        .response_reader(read_echo_with_type)
        .build()
        .unwrap();

    let (text, content_type): (String, String) = client.call_typed("bin".to_string()).await.unwrap();
    assert_eq!(text, "BIN");
    assert_eq!(content_type, "text/xml");
}

/// Test that replacing the configuration switches protocol for later calls.
#[tokio::test]
async fn test_set_config_rebuilds_processor() {
    let transport = spawn_memory_service(
        echo_service()
            .config(EngineConfig::new().with_protocol("pox"))
            .build()
            .unwrap(),
    );
    let mut client = client_for(transport).build().unwrap();

    // A SOAP envelope is not a body the plain-XML service can read.
    let result = client.call_typed::<String, String>("x".to_string()).await;
    assert!(result.is_err());

    client
        .set_config(EngineConfig::new().with_protocol("pox"))
        .unwrap();
    let answer: String = client.call_typed("x".to_string()).await.unwrap();
    assert_eq!(answer, "X");
}
