//! Codec module - token stream <-> bytes for a given media type.
//!
//! This module provides:
//!
//! - [`XmlCodec`] - XML text (`text/xml`)
//! - [`MsgPackCodec`] - MessagePack token encoding using `rmp-serde`
//! - [`CodecDirectory`] - registry built once at startup, used for lookup by
//!   content type and for `Accept` negotiation
//!
//! # Design
//!
//! Codecs are trait objects so the directory can hold an open set of them.
//! The directory is constructed explicitly and shared by reference; there is
//! no global registry.
//!
//! # Example
//!
//! ```
//! use soapwire::codec::CodecDirectory;
//! use soapwire::media::MediaType;
//!
//! let directory = CodecDirectory::with_defaults();
//! let text_xml = MediaType::parse("text/xml; charset=utf-8").unwrap();
//! assert!(directory.lookup(&text_xml).is_some());
//! ```

mod directory;
mod msgpack;
mod xml;

use bytes::Bytes;

use crate::error::Result;
use crate::media::MediaType;
use crate::xml::TokenBuffer;

pub use directory::{CodecDirectory, Negotiated};
pub use msgpack::{MsgPackCodec, MSGPACK_XML};
pub use xml::XmlCodec;

/// Translates between a token stream and bytes for one media type.
pub trait Codec: Send + Sync {
    /// The media type served (without parameters).
    fn media_type(&self) -> &MediaType;

    /// Encode tokens. `content_type` is the full type being sent and may
    /// carry parameters such as `charset`.
    fn encode(&self, tokens: &TokenBuffer, content_type: &MediaType) -> Result<Bytes>;

    /// Decode bytes received with `content_type`.
    fn decode(&self, data: &[u8], content_type: &MediaType) -> Result<TokenBuffer>;
}
