//! DIME record reader.
//!
//! Pulls bytes from an [`AsyncRead`] in `read_size` chunks and exposes the
//! stream as messages and parts. Chunked records are concatenated
//! transparently by [`DimeReader::require`]; padding and options are
//! skipped and never returned.
//!
//! # Example
//!
//! ```
//! # tokio_test_block(async {
//! use soapwire::dime::{DimeReader, DimeWriter, TypeKind};
//!
//! let mut writer = DimeWriter::new(Vec::new());
//! writer.next_part(Some("body"), TypeKind::MediaType, Some("text/xml")).await?;
//! writer.write(b"<a/>").await?;
//! writer.end_message().await?;
//! let (bytes, _) = writer.into_parts();
//!
//! let mut reader = DimeReader::new(&bytes[..]);
//! assert!(reader.next_part().await?);
//! assert_eq!(reader.id(), Some("body"));
//! assert_eq!(&reader.read_part().await?[..], b"<a/>");
//! assert!(!reader.next_part().await?);
//! assert!(!reader.next_message().await?);
//! # Ok::<(), soapwire::WireError>(())
//! # }).unwrap();
//! # fn tokio_test_block<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
//! # }
//! ```

use bytes::{Buf, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use super::record::{padded, padding, RecordHeader, TypeKind, DEFAULT_BUFFER_SIZE, HEADER_SIZE};
use crate::error::{Result, WireError};

/// Reads DIME messages from an async byte source.
///
/// Not safe for concurrent use; one reader belongs to one connection.
#[derive(Debug)]
pub struct DimeReader<R> {
    inner: R,
    /// Raw bytes read from the source and not yet consumed.
    input: BytesMut,
    read_size: usize,
    /// Current record; its data may be partially consumed.
    record: Option<RecordHeader>,
    /// Data bytes of the current record not yet moved into `part`.
    remaining: usize,
    /// Padding bytes after the current record's data.
    pad: usize,
    in_message: bool,
    /// First record of a message was read but its part not yet handed out.
    unclaimed: bool,
    empty_message: bool,
    part_open: bool,
    /// Buffered data of the current part.
    part: BytesMut,
    record_id: Option<String>,
    record_type: Option<String>,
    id: Option<String>,
    type_kind: TypeKind,
    type_text: Option<String>,
}

impl<R: AsyncRead + Unpin> DimeReader<R> {
    /// Create a reader with the default read size.
    pub fn new(inner: R) -> Self {
        Self::with_read_size(inner, DEFAULT_BUFFER_SIZE)
    }

    /// Create a reader pulling at most `read_size` bytes per read call.
    pub fn with_read_size(inner: R, read_size: usize) -> Self {
        Self::with_buffer(inner, BytesMut::with_capacity(read_size), read_size)
    }

    /// Create a reader around a (pooled) part buffer.
    pub fn with_buffer(inner: R, mut buffer: BytesMut, read_size: usize) -> Self {
        buffer.clear();
        let read_size = read_size.max(1);
        Self {
            inner,
            input: BytesMut::with_capacity(read_size),
            read_size,
            record: None,
            remaining: 0,
            pad: 0,
            in_message: false,
            unclaimed: false,
            empty_message: false,
            part_open: false,
            part: buffer,
            record_id: None,
            record_type: None,
            id: None,
            type_kind: TypeKind::None,
            type_text: None,
        }
    }

    /// Advance to the next message.
    ///
    /// Returns `false` at a clean end of stream. Fails if the current
    /// message has not reached its message-end record ("not last message")
    /// or if the next record does not begin a message ("not first message").
    pub async fn next_message(&mut self) -> Result<bool> {
        if self.in_message {
            if !self.at_message_end() {
                return Err(WireError::framing("not last message"));
            }
            self.skip_record_rest().await?;
        }
        self.close_part();
        self.in_message = false;
        self.unclaimed = false;
        self.empty_message = false;

        let header = match self.read_record().await? {
            Some(header) => header,
            None => {
                tracing::debug!("DIME stream ended");
                return Ok(false);
            }
        };
        if !header.is_message_begin() {
            return Err(WireError::framing("not first message"));
        }
        if header.type_kind == TypeKind::Unchanged {
            return Err(WireError::framing("DIME part starts with an UNCHANGED record"));
        }

        self.in_message = true;
        self.empty_message = header.is_message_end()
            && !header.is_chunked()
            && header.type_kind == TypeKind::None
            && header.id_length == 0
            && header.type_length == 0
            && header.data_length == 0;
        self.unclaimed = !self.empty_message;
        tracing::debug!(empty = self.empty_message, "DIME message started");
        Ok(true)
    }

    /// Advance to the next part of the current message.
    ///
    /// Starts the next message if none is open. The unread rest of the
    /// current part is skipped. Returns `false` when the message has no
    /// further parts (or the stream ended before a message).
    pub async fn next_part(&mut self) -> Result<bool> {
        if !self.in_message && !self.next_message().await? {
            return Ok(false);
        }
        if self.unclaimed {
            self.unclaimed = false;
            self.open_part();
            return Ok(true);
        }
        if self.empty_message {
            return Ok(false);
        }

        self.skip_part_rest().await?;
        if self.at_message_end() {
            return Ok(false);
        }
        let header = self
            .read_record()
            .await?
            .ok_or_else(|| WireError::framing("end of stream inside DIME message"))?;
        if header.is_message_begin() {
            return Err(WireError::framing("message begin inside DIME message"));
        }
        if header.type_kind == TypeKind::Unchanged {
            return Err(WireError::framing("DIME part starts with an UNCHANGED record"));
        }
        self.open_part();
        Ok(true)
    }

    /// Ensure at least `n` bytes of the current part are buffered.
    ///
    /// Pulls continuation records as needed. Returns `false` if the part
    /// ends before `n` bytes are available.
    pub async fn require(&mut self, n: usize) -> Result<bool> {
        if !self.part_open {
            return Err(WireError::State("no current DIME part".into()));
        }
        while self.part.len() < n {
            if self.remaining > 0 {
                if self.input.is_empty() && self.fill_more().await? == 0 {
                    return Err(WireError::framing("end of stream inside DIME record data"));
                }
                let take = self.remaining.min(self.input.len());
                let chunk = self.input.split_to(take);
                self.part.unsplit(chunk);
                self.remaining -= take;
                continue;
            }
            match self.record {
                Some(header) if header.is_chunked() => {
                    let pad = std::mem::take(&mut self.pad);
                    self.skip(pad).await?;
                    self.read_continuation().await?;
                }
                _ => return Ok(false),
            }
        }
        Ok(true)
    }

    /// Buffered data of the current part.
    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.part
    }

    /// Discard `n` buffered bytes.
    pub fn consume(&mut self, n: usize) {
        let n = n.min(self.part.len());
        self.part.advance(n);
    }

    /// Take up to `n` buffered bytes.
    pub fn take(&mut self, n: usize) -> Bytes {
        let n = n.min(self.part.len());
        self.part.split_to(n).freeze()
    }

    /// Read the rest of the current part.
    pub async fn read_part(&mut self) -> Result<Bytes> {
        while self.require(self.part.len() + 1).await? {}
        Ok(self.part.split().freeze())
    }

    /// Id of the current part.
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// Type format of the current part.
    pub fn type_kind(&self) -> TypeKind {
        self.type_kind
    }

    /// Type text of the current part.
    pub fn type_text(&self) -> Option<&str> {
        self.type_text.as_deref()
    }

    /// Get a reference to the underlying source.
    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    /// Split into the source and the part buffer (for returning it to a pool).
    pub fn into_parts(self) -> (R, BytesMut) {
        (self.inner, self.part)
    }

    fn at_message_end(&self) -> bool {
        self.record
            .map_or(true, |h| h.is_message_end() && !h.is_chunked())
    }

    fn open_part(&mut self) {
        self.part.clear();
        self.part_open = true;
        self.id = self.record_id.take();
        self.type_text = self.record_type.take();
        if let Some(header) = self.record {
            self.type_kind = header.type_kind;
        }
        tracing::trace!(id = ?self.id, kind = ?self.type_kind, "DIME part started");
    }

    fn close_part(&mut self) {
        self.part.clear();
        self.part_open = false;
        self.id = None;
        self.type_text = None;
        self.type_kind = TypeKind::None;
    }

    /// Skip the unread records of the current part.
    async fn skip_part_rest(&mut self) -> Result<()> {
        loop {
            self.skip_record_rest().await?;
            match self.record {
                Some(header) if header.is_chunked() => self.read_continuation().await?,
                _ => break,
            }
        }
        self.close_part();
        Ok(())
    }

    async fn skip_record_rest(&mut self) -> Result<()> {
        let n = self.remaining + self.pad;
        self.remaining = 0;
        self.pad = 0;
        self.skip(n).await
    }

    /// Read the record following a chunked one.
    async fn read_continuation(&mut self) -> Result<()> {
        let header = self
            .read_record()
            .await?
            .ok_or_else(|| WireError::framing("chunked but no chunk"))?;
        if header.type_kind != TypeKind::Unchanged {
            return Err(WireError::framing(format!(
                "DIME chunk continuation has type {:?} instead of UNCHANGED",
                header.type_kind
            )));
        }
        if header.id_length != 0 || header.type_length != 0 {
            return Err(WireError::framing(
                "DIME chunk continuation carries an id or type",
            ));
        }
        if header.is_message_begin() {
            return Err(WireError::framing("message begin inside DIME message"));
        }
        Ok(())
    }

    /// Read one record header and its metadata fields.
    ///
    /// Returns `Ok(None)` on a clean end of stream at a record boundary.
    async fn read_record(&mut self) -> Result<Option<RecordHeader>> {
        if self.fill(HEADER_SIZE).await? == 0 {
            self.record = None;
            return Ok(None);
        }
        if self.input.len() < HEADER_SIZE {
            return Err(WireError::framing("end of stream inside DIME record header"));
        }
        let header = RecordHeader::decode(&self.input[..HEADER_SIZE])?
            .ok_or_else(|| WireError::framing("short DIME record header"))?;
        self.input.advance(HEADER_SIZE);

        let meta_length = header.metadata_length();
        if self.fill(meta_length).await? < meta_length {
            return Err(WireError::framing("end of stream inside DIME record header"));
        }
        let mut meta = self.input.split_to(meta_length);
        meta.advance(padded(header.options_length as usize));
        self.record_id = take_text(&mut meta, header.id_length as usize, "id")?;
        self.record_type = take_text(&mut meta, header.type_length as usize, "type")?;

        let data_length = header.data_length as usize;
        self.remaining = data_length;
        self.pad = padding(data_length);
        self.record = Some(header);
        tracing::trace!(
            flags = header.flags,
            kind = ?header.type_kind,
            data_length,
            "DIME record read"
        );
        Ok(Some(header))
    }

    /// Discard `n` bytes from the stream.
    async fn skip(&mut self, mut n: usize) -> Result<()> {
        while n > 0 {
            if self.input.is_empty() && self.fill_more().await? == 0 {
                return Err(WireError::framing("end of stream inside DIME record"));
            }
            let step = n.min(self.input.len());
            self.input.advance(step);
            n -= step;
        }
        Ok(())
    }

    /// Read until `n` bytes are buffered or the stream ends. Returns the
    /// number of buffered bytes.
    async fn fill(&mut self, n: usize) -> Result<usize> {
        while self.input.len() < n {
            if self.fill_more().await? == 0 {
                break;
            }
        }
        Ok(self.input.len())
    }

    async fn fill_more(&mut self) -> Result<usize> {
        let start = self.input.len();
        self.input.resize(start + self.read_size, 0);
        match self.inner.read(&mut self.input[start..]).await {
            Ok(n) => {
                self.input.truncate(start + n);
                Ok(n)
            }
            Err(e) => {
                self.input.truncate(start);
                Err(e.into())
            }
        }
    }
}

fn take_text(meta: &mut BytesMut, length: usize, what: &str) -> Result<Option<String>> {
    if length == 0 {
        return Ok(None);
    }
    let field = meta.split_to(length);
    meta.advance(padding(length));
    String::from_utf8(field.to_vec())
        .map(Some)
        .map_err(|_| WireError::framing(format!("DIME {} is not valid UTF-8", what)))
}
