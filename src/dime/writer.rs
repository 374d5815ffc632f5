//! DIME record writer.
//!
//! Buffers the payload of the current part and emits records to an
//! [`AsyncWrite`]. A part larger than one record buffer is split into
//! chunked records: the first carries the id and type, continuation records
//! carry `UNCHANGED` with the chunk flag set on every record but the last.
//!
//! ```text
//! next_message ─► next_part(id, kind, type) ─► write/free ... ─► end_message
//!                        ▲                            │
//!                        └────── next_part ◄──────────┘
//! ```

use bytes::BytesMut;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use super::record::{
    flags, padded, padding, RecordHeader, TypeKind, DEFAULT_BUFFER_SIZE, HEADER_SIZE,
    MAX_FIELD_LENGTH,
};
use crate::error::{Result, WireError};

const ZERO_PAD: [u8; 3] = [0; 3];

/// Metadata carried by the first record of a part.
#[derive(Debug)]
struct PartMeta {
    id: Option<String>,
    kind: TypeKind,
    type_text: Option<String>,
}

/// Writes DIME messages to an async byte sink.
///
/// Not safe for concurrent use; one writer belongs to one connection.
#[derive(Debug)]
pub struct DimeWriter<W> {
    inner: W,
    buffer: BytesMut,
    record_size: usize,
    in_message: bool,
    /// Next record emitted is the first of its message.
    message_begin: bool,
    part_open: bool,
    /// Pending first-record metadata; `None` once the first record is out.
    part: Option<PartMeta>,
}

impl<W: AsyncWrite + Unpin> DimeWriter<W> {
    /// Create a writer with the default record buffer size.
    pub fn new(inner: W) -> Self {
        Self::with_buffer(inner, BytesMut::with_capacity(DEFAULT_BUFFER_SIZE))
    }

    /// Create a writer around a (pooled) buffer. Its capacity bounds the
    /// data carried by one record.
    pub fn with_buffer(inner: W, buffer: BytesMut) -> Self {
        let record_size = buffer.capacity();
        Self::with_record_size(inner, buffer, record_size)
    }

    /// Create a writer emitting records of at most `record_size` data bytes,
    /// growing `buffer` to fit if needed.
    pub fn with_record_size(inner: W, mut buffer: BytesMut, record_size: usize) -> Self {
        buffer.clear();
        let record_size = record_size.clamp(1, u32::MAX as usize);
        buffer.reserve(record_size);
        Self {
            inner,
            buffer,
            record_size,
            in_message: false,
            message_begin: false,
            part_open: false,
            part: None,
        }
    }

    /// Maximum data bytes per record.
    #[inline]
    pub fn record_size(&self) -> usize {
        self.record_size
    }

    /// Check if a message has been started and not yet ended.
    #[inline]
    pub fn in_message(&self) -> bool {
        self.in_message
    }

    /// Bytes buffered for the current record.
    #[inline]
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Start a new message. The previous message must have been ended.
    pub fn next_message(&mut self) -> Result<()> {
        if self.in_message {
            return Err(WireError::State(
                "previous DIME message was not ended".into(),
            ));
        }
        self.in_message = true;
        self.message_begin = true;
        self.part_open = false;
        self.part = None;
        self.buffer.clear();
        Ok(())
    }

    /// Finish the pending part (if any) and start a new one.
    ///
    /// Starts a message if none is open. `type_text` is only allowed for
    /// `MediaType` and `AbsoluteUri` parts.
    pub async fn next_part(
        &mut self,
        id: Option<&str>,
        kind: TypeKind,
        type_text: Option<&str>,
    ) -> Result<()> {
        if kind == TypeKind::Unchanged {
            return Err(WireError::config("a DIME part cannot start as UNCHANGED"));
        }
        if type_text.is_some() && !kind.has_type_text() {
            return Err(WireError::config(format!(
                "DIME type {:?} carries no type text",
                kind
            )));
        }
        if id.map_or(0, str::len) > MAX_FIELD_LENGTH {
            return Err(WireError::config("DIME part id exceeds 65535 bytes"));
        }
        if type_text.map_or(0, str::len) > MAX_FIELD_LENGTH {
            return Err(WireError::config("DIME type text exceeds 65535 bytes"));
        }

        if !self.in_message {
            self.next_message()?;
        }
        if self.part_open {
            self.emit(false, false).await?;
        }
        self.part = Some(PartMeta {
            id: id.map(str::to_owned),
            kind,
            type_text: type_text.map(str::to_owned),
        });
        self.part_open = true;
        Ok(())
    }

    /// Append payload bytes to the current part, emitting chunk records
    /// whenever the record buffer fills.
    pub async fn write(&mut self, mut data: &[u8]) -> Result<()> {
        self.require_part()?;
        while !data.is_empty() {
            if self.buffer.len() >= self.record_size {
                self.emit(true, false).await?;
            }
            let room = self.record_size - self.buffer.len();
            let take = room.min(data.len());
            self.buffer.extend_from_slice(&data[..take]);
            data = &data[take..];
        }
        Ok(())
    }

    /// Get buffer space for direct appends to the current part.
    ///
    /// Guarantees room for at least `min` bytes. If less than `min` remains
    /// in the current record, the buffered data is flushed as a chunk first.
    /// Capacity is extended towards `max` but never past the record size
    /// unless `min` itself is larger.
    pub async fn free(&mut self, max: usize, min: usize) -> Result<&mut BytesMut> {
        self.require_part()?;
        let min = min.min(u32::MAX as usize);
        if self.record_size.saturating_sub(self.buffer.len()) < min && !self.buffer.is_empty() {
            self.emit(true, false).await?;
        }
        let room = self.record_size.saturating_sub(self.buffer.len());
        let want = max.min(room).max(min);
        self.buffer.reserve(want);
        Ok(&mut self.buffer)
    }

    /// Emit whatever is buffered as a chunk record and flush the sink.
    pub async fn flush(&mut self) -> Result<()> {
        if self.part_open && !self.buffer.is_empty() {
            self.emit(true, false).await?;
        }
        self.inner.flush().await?;
        Ok(())
    }

    /// Emit the final record of the message with the message-end flag.
    ///
    /// A message with no parts is written as a single untyped record. A
    /// message whose only part is untyped, anonymous and empty would encode
    /// to that same record and is rejected.
    pub async fn end_message(&mut self) -> Result<()> {
        if !self.in_message {
            return Err(WireError::State("no DIME message to end".into()));
        }
        if self.message_begin && self.buffer.is_empty() {
            if let Some(meta) = &self.part {
                if meta.kind == TypeKind::None && meta.id.is_none() {
                    return Err(WireError::config(
                        "a DIME message cannot consist of one empty untyped part without id",
                    ));
                }
            }
        }
        if !self.part_open {
            self.part = Some(PartMeta {
                id: None,
                kind: TypeKind::None,
                type_text: None,
            });
        }
        self.emit(false, true).await?;
        self.inner.flush().await?;
        self.in_message = false;
        self.part_open = false;
        tracing::debug!("DIME message written");
        Ok(())
    }

    /// Get a reference to the underlying sink.
    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    /// Get a mutable reference to the underlying sink.
    pub fn get_mut(&mut self) -> &mut W {
        &mut self.inner
    }

    /// Split into the sink and the record buffer (for returning it to a pool).
    pub fn into_parts(self) -> (W, BytesMut) {
        (self.inner, self.buffer)
    }

    fn require_part(&self) -> Result<()> {
        if self.part_open {
            Ok(())
        } else {
            Err(WireError::State("no current DIME part".into()))
        }
    }

    async fn emit(&mut self, chunk: bool, end: bool) -> Result<()> {
        let data_length = u32::try_from(self.buffer.len())
            .map_err(|_| WireError::framing("DIME record data exceeds 4 GiB"))?;
        let meta = self.part.take().unwrap_or(PartMeta {
            id: None,
            kind: TypeKind::Unchanged,
            type_text: None,
        });
        let id = meta.id.as_deref().unwrap_or_default().as_bytes();
        let type_text = meta.type_text.as_deref().unwrap_or_default().as_bytes();

        let mut record_flags = 0;
        if self.message_begin {
            record_flags |= flags::MESSAGE_BEGIN;
            self.message_begin = false;
        }
        if end {
            record_flags |= flags::MESSAGE_END;
        }
        if chunk {
            record_flags |= flags::CHUNK;
        }

        // Field lengths were bounded in next_part.
        let header = RecordHeader::new(
            record_flags,
            meta.kind,
            id.len() as u16,
            type_text.len() as u16,
            data_length,
        );
        let mut head = Vec::with_capacity(HEADER_SIZE + padded(id.len()) + padded(type_text.len()));
        head.extend_from_slice(&header.encode());
        head.extend_from_slice(id);
        head.extend_from_slice(&ZERO_PAD[..padding(id.len())]);
        head.extend_from_slice(type_text);
        head.extend_from_slice(&ZERO_PAD[..padding(type_text.len())]);

        self.inner.write_all(&head).await?;
        self.inner.write_all(&self.buffer).await?;
        self.inner
            .write_all(&ZERO_PAD[..padding(self.buffer.len())])
            .await?;
        tracing::trace!(
            flags = record_flags,
            kind = ?meta.kind,
            data_length,
            "DIME record written"
        );
        self.buffer.clear();
        Ok(())
    }
}
