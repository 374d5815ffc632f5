//! Echo service - SOAP request/response over TCP.
//!
//! Starts a [`TcpServer`] on a local port, then calls it with a client:
//! a few successful echoes, and one request the service answers with a
//! fault.
//!
//! ```text
//! RUST_LOG=soapwire=debug cargo run --example echo
//! ```

use std::sync::Arc;

use soapwire::exchange::{MessageContext, Payload};
use soapwire::soap::TextDetail;
use soapwire::transport::{TcpServer, TcpTransport};
use soapwire::xml::{read_text, start_element, QName, TokenSink, TokenSource};
use soapwire::{Client, EngineConfig, Result, Service, SoapFault, WireError};
use tracing_subscriber::EnvFilter;

const ECHO_NS: &str = "urn:soapwire:echo";

fn write_echo(ctx: &MessageContext, sink: &mut dyn TokenSink) -> Result<()> {
    let text = ctx.body_as::<String>().cloned().unwrap_or_default();
    sink.text_element(QName::prefixed(ECHO_NS, "e", "echo"), &text)
}

fn read_echo(_ctx: &mut MessageContext, source: &mut dyn TokenSource) -> Result<Option<Payload>> {
    match start_element(source)? {
        Some(el) if el.name.matches(Some(ECHO_NS), "echo") => {
            Ok(Some(Box::new(read_text(source)?)))
        }
        _ => Ok(None),
    }
}

fn read_reason(_ctx: &mut MessageContext, source: &mut dyn TokenSource) -> Result<Option<Payload>> {
    match start_element(source)? {
        Some(el) if el.name.local == "reason" => Ok(Some(Box::new(read_text(source)?))),
        _ => Ok(None),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let service = Service::builder()
        .request_reader(read_echo)
        .response_writer(write_echo)
        .typed_operation(|text: String| async move {
            if text.is_empty() {
                return Err(WireError::from(
                    SoapFault::client("Nothing to echo")
                        .with_detail_writer(TextDetail::new(QName::local("reason"), "empty text")),
                ));
            }
            Ok(text.chars().rev().collect::<String>())
        })
        .build()?;

    let server = TcpServer::bind("127.0.0.1:0").await?;
    let addr = server.local_addr()?;
    tokio::spawn(server.serve(Arc::new(service)));
    println!("Echo service listening on {}", addr);

    let config = EngineConfig::new().with_soap_action(Some("urn:soapwire:echo#reverse"));
    let mut client = Client::builder(Arc::new(TcpTransport::new(addr.to_string())))
        .config(config)
        .request_writer(write_echo)
        .response_reader(read_echo)
        .fault_reader(read_reason)
        .build()?;

    for text in ["hello", "soapwire", ""] {
        match client.call_typed::<String, String>(text.to_string()).await {
            Ok(answer) => println!("{:?} -> {:?}", text, answer),
            Err(WireError::Fault(fault)) => println!(
                "{:?} -> fault {} ({})",
                text,
                fault,
                fault.detail_as::<String>().map(String::as_str).unwrap_or("no detail")
            ),
            Err(e) => return Err(e),
        }
    }

    client.close().await
}
