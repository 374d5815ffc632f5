//! DIME record header encoding and decoding.
//!
//! Implements the 12-byte record header of DIME version 1:
//! ```text
//! ┌─────────┬──┬──┬──┬────────┬────────┬───────────┬──────────┬───────────┬───────────┐
//! │ VERSION │MB│ME│CF│ TYPE_T │RESERVED│OPTIONS_LEN│  ID_LEN  │ TYPE_LEN  │ DATA_LEN  │
//! │ 5 bits  │1 │1 │1 │ 4 bits │ 4 bits │ uint16 BE │ uint16 BE│ uint16 BE │ uint32 BE │
//! └─────────┴──┴──┴──┴────────┴────────┴───────────┴──────────┴───────────┴───────────┘
//! ```
//!
//! The header is followed by the options, id, type and data fields, each
//! zero-padded to a multiple of 4 bytes.

use crate::error::{Result, WireError};

/// Header size in bytes (fixed, exactly 12).
pub const HEADER_SIZE: usize = 12;

/// The only supported DIME version.
pub const DIME_VERSION: u8 = 1;

/// Maximum id or type text length (16-bit length field).
pub const MAX_FIELD_LENGTH: usize = u16::MAX as usize;

/// Default record buffer size for writers and readers.
pub const DEFAULT_BUFFER_SIZE: usize = 8 * 1024;

/// Flag bits in the low three bits of the first header byte.
pub mod flags {
    /// Message begin: first record of a message.
    pub const MESSAGE_BEGIN: u8 = 0b0000_0100;
    /// Message end: last record of a message.
    pub const MESSAGE_END: u8 = 0b0000_0010;
    /// Chunk flag: more records follow for the same part.
    pub const CHUNK: u8 = 0b0000_0001;

    /// All flag bits.
    pub const MASK: u8 = MESSAGE_BEGIN | MESSAGE_END | CHUNK;

    /// Check if a specific flag is set.
    #[inline]
    pub fn has_flag(flags: u8, flag: u8) -> bool {
        flags & flag != 0
    }
}

/// How the type text of a part is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TypeKind {
    /// Continuation record: same type as the preceding chunk.
    Unchanged = 0x00,
    /// Type text is a media type such as `text/xml`.
    MediaType = 0x01,
    /// Type text is an absolute URI.
    AbsoluteUri = 0x02,
    /// Type is unknown; no type text.
    Unknown = 0x03,
    /// No payload type; no type text.
    None = 0x04,
}

impl TypeKind {
    /// Decode the 4-bit type field.
    pub fn from_code(code: u8) -> Result<Self> {
        match code {
            0x00 => Ok(TypeKind::Unchanged),
            0x01 => Ok(TypeKind::MediaType),
            0x02 => Ok(TypeKind::AbsoluteUri),
            0x03 => Ok(TypeKind::Unknown),
            0x04 => Ok(TypeKind::None),
            other => Err(WireError::framing(format!("Invalid DIME type format {}", other))),
        }
    }

    /// 4-bit wire code.
    #[inline]
    pub fn code(self) -> u8 {
        self as u8
    }

    /// True if records of this kind may carry type text.
    pub fn has_type_text(self) -> bool {
        matches!(self, TypeKind::MediaType | TypeKind::AbsoluteUri)
    }
}

/// Number of zero bytes needed to pad `len` to a 4-byte boundary.
#[inline]
pub fn padding(len: usize) -> usize {
    (4 - len % 4) % 4
}

/// `len` rounded up to a 4-byte boundary.
#[inline]
pub fn padded(len: usize) -> usize {
    len + padding(len)
}

/// Decoded record header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    /// MB/ME/CF bits (see [`flags`]).
    pub flags: u8,
    /// Type format of the record.
    pub type_kind: TypeKind,
    /// Options field length (skipped on read, never written).
    pub options_length: u16,
    /// Id field length.
    pub id_length: u16,
    /// Type text length.
    pub type_length: u16,
    /// Data length of this record.
    pub data_length: u32,
}

impl RecordHeader {
    /// Create a header with no options.
    pub fn new(
        flags: u8,
        type_kind: TypeKind,
        id_length: u16,
        type_length: u16,
        data_length: u32,
    ) -> Self {
        Self {
            flags: flags & flags::MASK,
            type_kind,
            options_length: 0,
            id_length,
            type_length,
            data_length,
        }
    }

    /// Encode header to bytes (Big Endian).
    ///
    /// # Example
    ///
    /// ```
    /// use soapwire::dime::{flags, RecordHeader, TypeKind};
    ///
    /// let header = RecordHeader::new(flags::MESSAGE_BEGIN, TypeKind::MediaType, 0, 8, 100);
    /// let bytes = header.encode();
    /// assert_eq!(bytes[0], 0x0C);
    /// assert_eq!(bytes[1], 0x10);
    /// ```
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        self.encode_into(&mut buf);
        buf
    }

    /// Encode header into an existing buffer of at least `HEADER_SIZE` bytes.
    pub fn encode_into(&self, buf: &mut [u8]) {
        debug_assert!(buf.len() >= HEADER_SIZE);
        buf[0] = (DIME_VERSION << 3) | (self.flags & flags::MASK);
        buf[1] = self.type_kind.code() << 4;
        buf[2..4].copy_from_slice(&self.options_length.to_be_bytes());
        buf[4..6].copy_from_slice(&self.id_length.to_be_bytes());
        buf[6..8].copy_from_slice(&self.type_length.to_be_bytes());
        buf[8..12].copy_from_slice(&self.data_length.to_be_bytes());
    }

    /// Decode and validate a header.
    ///
    /// Returns `Ok(None)` if the buffer is too short. Fails on a version
    /// mismatch, non-zero reserved bits or an invalid type format.
    pub fn decode(buf: &[u8]) -> Result<Option<Self>> {
        if buf.len() < HEADER_SIZE {
            return Ok(None);
        }
        let version = buf[0] >> 3;
        if version != DIME_VERSION {
            return Err(WireError::framing(format!(
                "Unsupported DIME version {} (expected {})",
                version, DIME_VERSION
            )));
        }
        if buf[1] & 0x0F != 0 {
            return Err(WireError::framing("Reserved DIME header bits must be 0"));
        }
        Ok(Some(Self {
            flags: buf[0] & flags::MASK,
            type_kind: TypeKind::from_code(buf[1] >> 4)?,
            options_length: u16::from_be_bytes([buf[2], buf[3]]),
            id_length: u16::from_be_bytes([buf[4], buf[5]]),
            type_length: u16::from_be_bytes([buf[6], buf[7]]),
            data_length: u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]),
        }))
    }

    /// Padded size of the options, id and type fields.
    pub fn metadata_length(&self) -> usize {
        padded(self.options_length as usize)
            + padded(self.id_length as usize)
            + padded(self.type_length as usize)
    }

    /// Check if this is the first record of a message.
    #[inline]
    pub fn is_message_begin(&self) -> bool {
        flags::has_flag(self.flags, flags::MESSAGE_BEGIN)
    }

    /// Check if this is the last record of a message.
    #[inline]
    pub fn is_message_end(&self) -> bool {
        flags::has_flag(self.flags, flags::MESSAGE_END)
    }

    /// Check if further chunks of the same part follow.
    #[inline]
    pub fn is_chunked(&self) -> bool {
        flags::has_flag(self.flags, flags::CHUNK)
    }
}
