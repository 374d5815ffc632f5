//! TCP transport.
//!
//! [`TcpTransport`] connects to a peer; [`TcpServer`] accepts connections and
//! hands each one to a [`Service`] on its own task.
//!
//! # Example
//!
//! ```ignore
//! use soapwire::transport::{TcpServer, TcpTransport};
//!
//! let server = TcpServer::bind("127.0.0.1:0").await?;
//! let addr = server.local_addr()?;
//! tokio::spawn(server.serve(service));
//!
//! let client = ClientBuilder::new(Arc::new(TcpTransport::new(addr.to_string()))).build()?;
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::{TcpListener, TcpStream};

use super::{
    ConnectionProperties, DimeInConnection, DimeOutConnection, Duplex, InConnection,
    OutConnection, Transport,
};
use crate::dime::DEFAULT_BUFFER_SIZE;
use crate::error::{Result, WireError};
use crate::pool::BufferPool;
use crate::service::Service;

/// Build both DIME halves over a TCP stream.
fn duplex(stream: TcpStream, pool: &BufferPool, properties: &ConnectionProperties) -> Duplex {
    let (read, write) = stream.into_split();
    Duplex::new(
        Box::new(DimeOutConnection::new(write, pool.clone(), properties)),
        Box::new(DimeInConnection::new(read, properties)),
    )
}

// ============================================================================
// Client side
// ============================================================================

/// Opens TCP connections to one address.
#[derive(Debug, Clone)]
pub struct TcpTransport {
    addr: String,
    pool: BufferPool,
}

impl TcpTransport {
    /// Create a transport for `addr` (`host:port`).
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            pool: BufferPool::new(DEFAULT_BUFFER_SIZE),
        }
    }

    /// Peer address.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Framing buffer pool shared by the connections opened.
    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    async fn connect(&self) -> Result<TcpStream> {
        let stream = TcpStream::connect(&self.addr)
            .await
            .map_err(|e| WireError::Transport(format!("connect to {} failed: {}", self.addr, e)))?;
        stream.set_nodelay(true)?;
        tracing::debug!("Connected to {}", self.addr);
        Ok(stream)
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn open_outbound(
        &self,
        properties: &ConnectionProperties,
    ) -> Result<Box<dyn OutConnection>> {
        let (_, write) = self.connect().await?.into_split();
        Ok(Box::new(DimeOutConnection::new(
            write,
            self.pool.clone(),
            properties,
        )))
    }

    async fn open_inbound(
        &self,
        properties: &ConnectionProperties,
    ) -> Result<Box<dyn InConnection>> {
        let (read, _) = self.connect().await?.into_split();
        Ok(Box::new(DimeInConnection::new(read, properties)))
    }

    async fn open_duplex(&self, properties: &ConnectionProperties) -> Result<Duplex> {
        let stream = self.connect().await?;
        Ok(duplex(stream, &self.pool, properties))
    }
}

// ============================================================================
// Server side
// ============================================================================

/// Accepts TCP connections.
#[derive(Debug)]
pub struct TcpServer {
    listener: TcpListener,
    pool: BufferPool,
    properties: ConnectionProperties,
}

impl TcpServer {
    /// Bind to `addr` with default connection properties.
    pub async fn bind(addr: &str) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        tracing::debug!("Listening on {}", listener.local_addr()?);
        Ok(Self {
            listener,
            pool: BufferPool::new(DEFAULT_BUFFER_SIZE),
            properties: ConnectionProperties::default(),
        })
    }

    /// Use `properties` for accepted connections.
    pub fn with_properties(mut self, properties: ConnectionProperties) -> Self {
        self.properties = properties;
        self
    }

    /// Bound address.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept one connection.
    pub async fn accept(&self) -> Result<(Duplex, SocketAddr)> {
        let (stream, peer) = self.listener.accept().await?;
        stream.set_nodelay(true)?;
        tracing::debug!("Accepted connection from {}", peer);
        Ok((duplex(stream, &self.pool, &self.properties), peer))
    }

    /// Accept connections forever, serving each on its own task.
    ///
    /// Returns only if accepting fails.
    pub async fn serve(self, service: Arc<Service>) -> Result<()> {
        loop {
            let (connection, peer) = self.accept().await?;
            let service = Arc::clone(&service);
            tokio::spawn(async move {
                match service.serve_connection(connection).await {
                    Ok(()) => tracing::debug!("Connection from {} closed", peer),
                    Err(e) => tracing::warn!("Connection from {} failed: {}", peer, e),
                }
            });
        }
    }
}
