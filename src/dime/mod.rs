//! DIME (Direct Internet Message Encapsulation) framing.
//!
//! A DIME message is an ordered sequence of parts, each carried by one or
//! more records. Messages are sent serially on a connection; they never
//! interleave.
//!
//! - [`record`]: header layout, flags, type formats, padding
//! - [`DimeWriter`]: buffers part data and emits (chunked) records
//! - [`DimeReader`]: reassembles parts from records

pub mod reader;
pub mod record;
pub mod writer;

pub use reader::DimeReader;
pub use record::{
    flags, padded, padding, RecordHeader, TypeKind, DEFAULT_BUFFER_SIZE, DIME_VERSION,
    HEADER_SIZE, MAX_FIELD_LENGTH,
};
pub use writer::DimeWriter;
