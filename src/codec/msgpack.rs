//! Binary token codec using `rmp-serde`.
//!
//! **CRITICAL**: Always use `to_vec_named`, NEVER `to_vec`!
//! Tokens are enums of structs; the named form keeps the encoding
//! self-describing so field order changes stay compatible.
//!
//! # Example
//!
//! ```
//! use soapwire::codec::{Codec, MsgPackCodec};
//! use soapwire::xml::{QName, TokenBuffer, TokenSink};
//!
//! let codec = MsgPackCodec::new();
//! let mut tokens = TokenBuffer::new();
//! tokens.text_element(QName::local("greeting"), "hello").unwrap();
//!
//! let bytes = codec.encode(&tokens, codec.media_type()).unwrap();
//! let decoded = codec.decode(&bytes, codec.media_type()).unwrap();
//! assert_eq!(decoded, tokens);
//! ```

use bytes::Bytes;

use super::Codec;
use crate::error::{Result, WireError};
use crate::media::MediaType;
use crate::xml::{Token, TokenBuffer};

/// Default media type of the binary token codec.
pub const MSGPACK_XML: &str = "application/x-msgpack-xml";

/// MessagePack codec for token streams.
pub struct MsgPackCodec {
    media_type: MediaType,
}

impl MsgPackCodec {
    /// Codec registered as [`MSGPACK_XML`].
    pub fn new() -> Self {
        Self {
            media_type: MediaType::from_static("application", "x-msgpack-xml"),
        }
    }

    /// Codec registered under another media type.
    pub fn with_media_type(media_type: MediaType) -> Self {
        Self {
            media_type: media_type.without_parameters().freeze(),
        }
    }

    /// Encode a value to MsgPack bytes.
    #[inline]
    pub fn encode_value<T: serde::Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
        // Structs are written as maps keyed by field name.
        Ok(rmp_serde::to_vec_named(value)?)
    }

    /// Decode MsgPack bytes to a value.
    #[inline]
    pub fn decode_value<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}

impl Default for MsgPackCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Codec for MsgPackCodec {
    fn media_type(&self) -> &MediaType {
        &self.media_type
    }

    fn encode(&self, tokens: &TokenBuffer, _content_type: &MediaType) -> Result<Bytes> {
        let list: Vec<&Token> = tokens.iter().collect();
        Ok(Bytes::from(Self::encode_value(&list)?))
    }

    fn decode(&self, data: &[u8], _content_type: &MediaType) -> Result<TokenBuffer> {
        if data.is_empty() {
            return Err(WireError::parse("empty MsgPack body"));
        }
        let tokens: Vec<Token> = Self::decode_value(data)?;
        Ok(TokenBuffer::from(tokens))
    }
}
