//! Codec directory and `Accept` negotiation.
//!
//! # Example
//!
//! ```
//! use soapwire::codec::CodecDirectory;
//! use soapwire::media::MediaType;
//!
//! let directory = CodecDirectory::with_defaults();
//! let request = MediaType::parse("text/xml").unwrap();
//! let chosen = directory
//!     .negotiate(Some("application/x-msgpack-xml;q=0.2, text/xml"), Some(&request))
//!     .unwrap();
//! assert_eq!(chosen.media_type.base(), "text/xml");
//! ```

use std::fmt;
use std::sync::Arc;

use super::{Codec, MsgPackCodec, XmlCodec};
use crate::error::{Result, WireError};
use crate::media::{AcceptList, MediaType, TEXT_XML};

/// Outcome of negotiation: the codec and the content type to send.
#[derive(Clone)]
pub struct Negotiated {
    /// Selected codec.
    pub codec: Arc<dyn Codec>,
    /// Content type for the response.
    pub media_type: MediaType,
}

impl fmt::Debug for Negotiated {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Negotiated")
            .field("media_type", &self.media_type)
            .finish()
    }
}

/// Registry of codecs keyed by media type (parameters ignored).
///
/// Built once at startup and shared read-only afterwards.
#[derive(Clone, Default)]
pub struct CodecDirectory {
    codecs: Vec<Arc<dyn Codec>>,
}

impl CodecDirectory {
    /// Create an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Directory serving `text/xml` and the MessagePack token codec.
    pub fn with_defaults() -> Self {
        let mut directory = Self::new();
        directory.register(Arc::new(XmlCodec::new()));
        directory.register(Arc::new(MsgPackCodec::new()));
        directory
    }

    /// Register a codec, replacing any codec for the same media type.
    pub fn register(&mut self, codec: Arc<dyn Codec>) {
        let base = codec.media_type().without_parameters();
        self.codecs.retain(|c| !c.media_type().same_base(&base));
        tracing::debug!("Registered codec for {}", base);
        self.codecs.push(codec);
    }

    /// Builder-style [`register`](Self::register).
    pub fn with_codec(mut self, codec: Arc<dyn Codec>) -> Self {
        self.register(codec);
        self
    }

    /// Media types served, in registration order.
    pub fn media_types(&self) -> impl Iterator<Item = &MediaType> {
        self.codecs.iter().map(|c| c.media_type())
    }

    /// Exact lookup by primary/sub type, ignoring parameters and wildcards.
    pub fn lookup(&self, media_type: &MediaType) -> Option<Arc<dyn Codec>> {
        self.codecs
            .iter()
            .find(|c| c.media_type().same_base(media_type))
            .cloned()
    }

    /// Lookup by content type string.
    pub fn lookup_str(&self, content_type: &str) -> Result<Arc<dyn Codec>> {
        let media_type = MediaType::parse_ignoring_parameters(content_type)?;
        self.lookup(&media_type).ok_or_else(|| {
            WireError::config(format!("No codec registered for media type {}", media_type))
        })
    }

    /// Pick the response codec for a client's `Accept` list.
    ///
    /// Entries are tried most preferred first. An entry matching the
    /// request's own content type selects the request codec; otherwise the
    /// first registered codec the entry accepts wins. An absent or blank
    /// header means `text/xml`.
    pub fn negotiate(
        &self,
        accept: Option<&str>,
        request_type: Option<&MediaType>,
    ) -> Result<Negotiated> {
        let header = accept.map(str::trim).filter(|h| !h.is_empty());
        let list = match header {
            Some(h) => AcceptList::parse(h)?,
            None => AcceptList::single(MediaType::from_static("text", "xml")),
        };

        for entry in list.iter() {
            let wanted = entry.media_type();
            if let Some(request) = request_type.filter(|r| wanted.accepts(r)) {
                if let Some(codec) = self.lookup(request) {
                    return Ok(self.chosen(codec));
                }
            }
            if let Some(codec) = self
                .codecs
                .iter()
                .find(|c| wanted.accepts(c.media_type()))
            {
                return Ok(self.chosen(codec.clone()));
            }
        }

        Err(WireError::config(format!(
            "No codec available for accepted media type(s) '{}'",
            header.unwrap_or(TEXT_XML)
        )))
    }

    fn chosen(&self, codec: Arc<dyn Codec>) -> Negotiated {
        let media_type = codec.media_type().clone();
        tracing::debug!("Negotiated response media type {}", media_type);
        Negotiated { codec, media_type }
    }
}

impl fmt::Debug for CodecDirectory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.media_types()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn xbis_directory() -> CodecDirectory {
        let xbis = MediaType::parse("application/x-xbis").unwrap();
        CodecDirectory::new()
            .with_codec(Arc::new(XmlCodec::new()))
            .with_codec(Arc::new(MsgPackCodec::with_media_type(xbis)))
    }

    fn text_xml() -> MediaType {
        MediaType::parse("text/xml; charset=utf-8").unwrap()
    }

    #[test]
    fn test_negotiate_prefers_first_acceptable() {
        let dir = xbis_directory();
        let chosen = dir
            .negotiate(Some("application/x-xbis, text/xml;q=0.5"), Some(&text_xml()))
            .unwrap();
        assert_eq!(chosen.media_type.base(), "application/x-xbis");
    }

    #[test]
    fn test_negotiate_respects_quality() {
        let dir = xbis_directory();
        let chosen = dir
            .negotiate(Some("application/x-xbis;q=0.4, text/xml"), Some(&text_xml()))
            .unwrap();
        assert_eq!(chosen.media_type.base(), "text/xml");
    }

    #[test]
    fn test_negotiate_default_is_text_xml() {
        let dir = xbis_directory();
        let xbis = MediaType::parse("application/x-xbis").unwrap();
        let chosen = dir.negotiate(None, Some(&xbis)).unwrap();
        assert_eq!(chosen.media_type.base(), "text/xml");
        let chosen = dir.negotiate(Some("  "), None).unwrap();
        assert_eq!(chosen.media_type.base(), "text/xml");
    }

    #[test]
    fn test_negotiate_wildcard_prefers_request_type() {
        let dir = xbis_directory();
        let xbis = MediaType::parse("application/x-xbis").unwrap();
        let chosen = dir.negotiate(Some("*/*"), Some(&xbis)).unwrap();
        assert_eq!(chosen.media_type.base(), "application/x-xbis");
        let chosen = dir.negotiate(Some("application/*"), None).unwrap();
        assert_eq!(chosen.media_type.base(), "application/x-xbis");
    }

    #[test]
    fn test_negotiate_unavailable() {
        let dir = xbis_directory();
        let err = dir
            .negotiate(Some("application/json"), Some(&text_xml()))
            .unwrap_err();
        assert!(matches!(err, WireError::Config(_)));
        assert!(err.to_string().contains("application/json"));
    }

    #[test]
    fn test_lookup_ignores_parameters() {
        let dir = CodecDirectory::with_defaults();
        assert!(dir.lookup(&text_xml()).is_some());
        assert!(dir.lookup_str("text/xml; charset=utf-8").is_ok());
        assert!(dir.lookup_str("text/html").is_err());
        assert!(dir.lookup_str("text/").is_err());
    }

    #[test]
    fn test_register_replaces_same_type() {
        let mut dir = CodecDirectory::with_defaults();
        dir.register(Arc::new(XmlCodec::new()));
        assert_eq!(dir.media_types().count(), 2);
    }
}
