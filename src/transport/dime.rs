//! DIME connection halves over any async byte stream.
//!
//! The outbound half leases its record buffer from a [`BufferPool`] and
//! hands it back on [`close`](OutConnection::close); the next send leases
//! again. The inbound half keeps one [`DimeReader`] for its lifetime.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use super::{
    ConnectionProperties, InConnection, MessageProperties, OutConnection, PROPERTIES_ID,
    PROPERTIES_TYPE, STATUS_INTERNAL_SERVER_ERROR, STATUS_NOT_FOUND,
};
use crate::dime::{DimeReader, DimeWriter, TypeKind};
use crate::error::{Result, WireError};
use crate::media::MediaType;
use crate::pool::{BufferPool, Lease};

// ============================================================================
// Outbound
// ============================================================================

/// Writes each message as one DIME message.
pub struct DimeOutConnection<W> {
    inner: W,
    pool: BufferPool,
    lease: Option<Lease<bytes::BytesMut>>,
    record_size: usize,
    status: Option<u16>,
}

impl<W: AsyncWrite + Unpin + Send> DimeOutConnection<W> {
    /// Open over `inner`, leasing a record buffer from `pool`.
    pub fn new(inner: W, pool: BufferPool, properties: &ConnectionProperties) -> Self {
        let lease = pool.acquire();
        Self {
            inner,
            pool,
            lease: Some(lease),
            record_size: properties.buffer_size,
            status: None,
        }
    }

    /// Check if a pooled buffer is currently held.
    pub fn holds_buffer(&self) -> bool {
        self.lease.is_some()
    }

    async fn write_message(
        &mut self,
        content_type: Option<&MediaType>,
        properties: &MessageProperties,
        body: &[u8],
    ) -> Result<()> {
        let mut lease = self.lease.take().unwrap_or_else(|| self.pool.acquire());
        let buffer = std::mem::take(&mut *lease);
        let mut writer = DimeWriter::with_record_size(&mut self.inner, buffer, self.record_size);

        let result = write_parts(&mut writer, content_type, properties, body).await;

        let (_, buffer) = writer.into_parts();
        *lease = buffer;
        self.lease = Some(lease);
        result
    }
}

async fn write_parts<W: AsyncWrite + Unpin>(
    writer: &mut DimeWriter<W>,
    content_type: Option<&MediaType>,
    properties: &MessageProperties,
    body: &[u8],
) -> Result<()> {
    writer.next_message()?;
    if !properties.is_empty() {
        let json = serde_json::to_vec(properties)?;
        writer
            .next_part(Some(PROPERTIES_ID), TypeKind::MediaType, Some(PROPERTIES_TYPE))
            .await?;
        writer.write(&json).await?;
    }
    if !body.is_empty() {
        let type_text = content_type.map(MediaType::to_string);
        let kind = if type_text.is_some() {
            TypeKind::MediaType
        } else {
            TypeKind::Unknown
        };
        writer.next_part(None, kind, type_text.as_deref()).await?;
        writer.write(body).await?;
    }
    writer.end_message().await
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> OutConnection for DimeOutConnection<W> {
    async fn send(
        &mut self,
        content_type: &MediaType,
        mut properties: MessageProperties,
        body: Bytes,
    ) -> Result<()> {
        if let Some(status) = self.status.take() {
            properties.status = Some(status);
        }
        tracing::debug!(
            content_type = %content_type,
            len = body.len(),
            status = ?properties.status,
            "Sending message"
        );
        self.write_message(Some(content_type), &properties, &body).await
    }

    async fn output_complete(&mut self) -> Result<()> {
        self.inner.flush().await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(lease) = self.lease.take() {
            self.pool.release(lease);
        }
        Ok(())
    }

    fn set_internal_server_error(&mut self) {
        self.status = Some(STATUS_INTERNAL_SERVER_ERROR);
    }

    async fn send_not_found_error(&mut self) -> Result<()> {
        self.status = None;
        let properties = MessageProperties {
            status: Some(STATUS_NOT_FOUND),
            ..Default::default()
        };
        self.write_message(None, &properties, &[]).await
    }

    async fn shutdown(&mut self) -> Result<()> {
        self.close().await?;
        self.inner.shutdown().await?;
        Ok(())
    }
}

impl<W> Drop for DimeOutConnection<W> {
    fn drop(&mut self) {
        if let Some(lease) = self.lease.take() {
            self.pool.release(lease);
        }
    }
}

// ============================================================================
// Inbound
// ============================================================================

/// Reads each message as one DIME message.
pub struct DimeInConnection<R> {
    reader: DimeReader<R>,
    active: bool,
    /// A framing or I/O error left the stream position unknown.
    broken: bool,
    body_pending: bool,
    content_type: Option<MediaType>,
    properties: MessageProperties,
}

impl<R: AsyncRead + Unpin + Send> DimeInConnection<R> {
    /// Open over `inner`.
    pub fn new(inner: R, properties: &ConnectionProperties) -> Self {
        Self {
            reader: DimeReader::with_read_size(inner, properties.read_size),
            active: false,
            broken: false,
            body_pending: false,
            content_type: None,
            properties: MessageProperties::default(),
        }
    }

    fn track<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            if e.is_fatal_to_connection() {
                self.broken = true;
            }
        }
        result
    }

    /// Position on the body part, reading the property part on the way.
    async fn read_head(&mut self) -> Result<()> {
        if !self.reader.next_part().await? {
            return Ok(());
        }
        if self.reader.id() == Some(PROPERTIES_ID) {
            let json = self.reader.read_part().await?;
            self.properties = serde_json::from_slice(&json)?;
            if !self.reader.next_part().await? {
                return Ok(());
            }
        }
        self.content_type = match (self.reader.type_kind(), self.reader.type_text()) {
            (TypeKind::MediaType, Some(text)) => Some(MediaType::parse(text)?),
            _ => None,
        };
        self.body_pending = true;
        Ok(())
    }
}

#[async_trait]
impl<R: AsyncRead + Unpin + Send> InConnection for DimeInConnection<R> {
    async fn init(&mut self) -> Result<bool> {
        if self.broken {
            return Err(WireError::ConnectionClosed);
        }
        if self.active {
            return Err(WireError::State(
                "previous inbound message was not completed".into(),
            ));
        }
        self.body_pending = false;
        self.content_type = None;
        self.properties = MessageProperties::default();

        let started = self.reader.next_message().await;
        if !self.track(started)? {
            return Ok(false);
        }
        self.active = true;
        let head = self.read_head().await;
        self.track(head)?;
        tracing::debug!(
            content_type = ?self.content_type.as_ref().map(MediaType::to_string),
            has_body = self.body_pending,
            "Received message head"
        );
        Ok(true)
    }

    fn content_type(&self) -> Option<&MediaType> {
        self.content_type.as_ref()
    }

    fn properties(&self) -> &MessageProperties {
        &self.properties
    }

    fn transport_error(&self) -> Option<String> {
        if self.body_pending {
            None
        } else {
            self.properties.status_text()
        }
    }

    async fn receive(&mut self) -> Result<Bytes> {
        if !self.body_pending {
            return Ok(Bytes::new());
        }
        self.body_pending = false;
        let body = self.reader.read_part().await;
        self.track(body)
    }

    async fn input_complete(&mut self) -> Result<()> {
        if !self.active {
            return Ok(());
        }
        self.active = false;
        self.body_pending = false;
        if self.broken {
            return Ok(());
        }
        let mut skipped = 0usize;
        loop {
            let more = self.reader.next_part().await;
            if !self.track(more)? {
                break;
            }
            skipped += 1;
        }
        if skipped > 0 {
            tracing::warn!("Skipped {} unexpected part(s) of inbound message", skipped);
        }
        Ok(())
    }
}
