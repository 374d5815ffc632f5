//! In-memory transport for tests and demos.
//!
//! [`pipe`] returns two connected [`Duplex`] ends. [`memory_transport`]
//! pairs a [`Transport`] with a [`MemoryListener`] receiving the server end
//! of every connection the transport opens.

use async_trait::async_trait;
use tokio::io::{duplex, split};
use tokio::sync::mpsc;

use super::{
    ConnectionProperties, DimeInConnection, DimeOutConnection, Duplex, InConnection,
    OutConnection, Transport,
};
use crate::dime::DEFAULT_BUFFER_SIZE;
use crate::error::{Result, WireError};
use crate::pool::BufferPool;

/// Bytes buffered in each direction of a pipe before writes wait.
const PIPE_CAPACITY: usize = 64 * 1024;

fn pipe_with_pool(properties: &ConnectionProperties, pool: &BufferPool) -> (Duplex, Duplex) {
    let (a, b) = duplex(PIPE_CAPACITY);
    let (a_read, a_write) = split(a);
    let (b_read, b_write) = split(b);
    (
        Duplex::new(
            Box::new(DimeOutConnection::new(a_write, pool.clone(), properties)),
            Box::new(DimeInConnection::new(a_read, properties)),
        ),
        Duplex::new(
            Box::new(DimeOutConnection::new(b_write, pool.clone(), properties)),
            Box::new(DimeInConnection::new(b_read, properties)),
        ),
    )
}

/// Create two connected DIME duplex ends.
pub fn pipe(properties: &ConnectionProperties) -> (Duplex, Duplex) {
    pipe_with_pool(properties, &BufferPool::new(DEFAULT_BUFFER_SIZE))
}

/// Create a transport and the listener receiving its connections.
pub fn memory_transport() -> (MemoryTransport, MemoryListener) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        MemoryTransport {
            tx,
            pool: BufferPool::new(DEFAULT_BUFFER_SIZE),
        },
        MemoryListener { rx },
    )
}

/// Client side of an in-memory transport.
#[derive(Debug, Clone)]
pub struct MemoryTransport {
    tx: mpsc::UnboundedSender<Duplex>,
    pool: BufferPool,
}

/// Server side of an in-memory transport.
#[derive(Debug)]
pub struct MemoryListener {
    rx: mpsc::UnboundedReceiver<Duplex>,
}

impl MemoryListener {
    /// Wait for the next connection. `None` once every transport is dropped.
    pub async fn accept(&mut self) -> Option<Duplex> {
        self.rx.recv().await
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn open_outbound(
        &self,
        properties: &ConnectionProperties,
    ) -> Result<Box<dyn OutConnection>> {
        Ok(self.open_duplex(properties).await?.out)
    }

    async fn open_inbound(
        &self,
        properties: &ConnectionProperties,
    ) -> Result<Box<dyn InConnection>> {
        Ok(self.open_duplex(properties).await?.inbound)
    }

    async fn open_duplex(&self, properties: &ConnectionProperties) -> Result<Duplex> {
        let (client, server) = pipe_with_pool(properties, &self.pool);
        self.tx
            .send(server)
            .map_err(|_| WireError::Transport("memory listener is gone".into()))?;
        Ok(client)
    }
}
