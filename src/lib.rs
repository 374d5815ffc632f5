//! # soapwire
//!
//! Transport-agnostic engine for SOAP and plain-XML message exchanges.
//!
//! ## Architecture
//!
//! - **Exchange**: ordered message contexts driven by a [`Processor`](exchange::Processor);
//!   pluggable header, body and fault-detail handlers read and write payloads
//! - **Protocols**: SOAP 1.1 envelopes and faults, or plain XML
//! - **Codecs**: token stream to bytes (`text/xml`, MessagePack), chosen by
//!   `Accept` negotiation
//! - **Framing**: DIME records over any async byte stream (TCP, in-memory)
//!
//! ## Example
//!
//! ```ignore
//! use soapwire::{Client, Service};
//! use soapwire::transport::{memory_transport, MemoryTransport};
//!
//! #[tokio::main]
//! async fn main() -> soapwire::Result<()> {
//!     let (transport, mut listener) = memory_transport();
//!     let service = Service::builder()
//!         .request_reader(read_echo)
//!         .response_writer(write_echo)
//!         .typed_operation(|text: String| async move { Ok(text.to_uppercase()) })
//!         .build()?;
//!     tokio::spawn(async move {
//!         while let Some(connection) = listener.accept().await {
//!             let _ = service.serve_connection(connection).await;
//!         }
//!     });
//!
//!     let mut client = Client::builder(Arc::new(transport))
//!         .request_writer(write_echo)
//!         .response_reader(read_echo)
//!         .build()?;
//!     let answer: String = client.call_typed("hello".to_string()).await?;
//!     assert_eq!(answer, "HELLO");
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod config;
pub mod dime;
pub mod error;
pub mod exchange;
pub mod media;
pub mod pool;
pub mod service;
pub mod soap;
pub mod transport;
pub mod xml;

mod client;

pub use client::{Client, ClientBuilder};
pub use config::EngineConfig;
pub use error::{Result, WireError};
pub use service::{Service, ServiceBuilder};
pub use soap::SoapFault;
