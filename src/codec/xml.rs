//! XML text codec.
//!
//! Writing produces a UTF-8 document with an XML declaration. Reading
//! resolves namespace prefixes, skips the declaration, comments and
//! processing instructions, and rejects DOCTYPE declarations outright.

use bytes::Bytes;

use super::Codec;
use crate::error::{Result, WireError};
use crate::media::MediaType;
use crate::xml::{Attribute, Element, Namespace, QName, Token, TokenBuffer};

/// Namespace bound to the reserved `xml` prefix.
const XML_NAMESPACE: &str = "http://www.w3.org/XML/1998/namespace";

const XML_DECLARATION: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>";

/// XML text codec for `text/xml` (or any XML media type it is registered as).
pub struct XmlCodec {
    media_type: MediaType,
}

impl XmlCodec {
    /// Codec for `text/xml`.
    pub fn new() -> Self {
        Self {
            media_type: MediaType::from_static("text", "xml"),
        }
    }

    /// Codec registered under another XML media type, e.g. `application/soap+xml`.
    pub fn with_media_type(media_type: MediaType) -> Self {
        Self {
            media_type: media_type.without_parameters().freeze(),
        }
    }
}

impl Default for XmlCodec {
    fn default() -> Self {
        Self::new()
    }
}

fn check_charset(content_type: &MediaType) -> Result<()> {
    match content_type.parameter("charset") {
        None => Ok(()),
        Some(cs) if cs.eq_ignore_ascii_case("utf-8") || cs.eq_ignore_ascii_case("utf8") => Ok(()),
        Some(cs) => Err(WireError::config(format!("Unsupported charset '{}'", cs))),
    }
}

impl Codec for XmlCodec {
    fn media_type(&self) -> &MediaType {
        &self.media_type
    }

    fn encode(&self, tokens: &TokenBuffer, content_type: &MediaType) -> Result<Bytes> {
        check_charset(content_type)?;
        let mut writer = XmlWriter::default();
        for token in tokens.iter() {
            writer.write(token)?;
        }
        writer.finish().map(Bytes::from)
    }

    fn decode(&self, data: &[u8], content_type: &MediaType) -> Result<TokenBuffer> {
        check_charset(content_type)?;
        let text = std::str::from_utf8(data)
            .map_err(|e| WireError::parse(format!("invalid UTF-8 in XML body: {}", e)))?;
        XmlReader::new(text).read_all()
    }
}

// ============================================================================
// Writer
// ============================================================================

#[derive(Default)]
struct XmlWriter {
    out: String,
    open: Vec<String>,
    start_pending: bool,
    root_done: bool,
}

impl XmlWriter {
    fn write(&mut self, token: &Token) -> Result<()> {
        if self.out.is_empty() {
            self.out.push_str(XML_DECLARATION);
        }
        match token {
            Token::Start(element) => {
                if self.open.is_empty() && self.root_done {
                    return Err(WireError::parse("second root element in XML document"));
                }
                self.close_pending_start();
                self.write_start(element);
            }
            Token::End => {
                let name = self
                    .open
                    .pop()
                    .ok_or_else(|| WireError::parse("end tag without open element"))?;
                if self.start_pending {
                    self.out.push_str("/>");
                    self.start_pending = false;
                } else {
                    self.out.push_str("</");
                    self.out.push_str(&name);
                    self.out.push('>');
                }
                if self.open.is_empty() {
                    self.root_done = true;
                }
            }
            Token::Text(text) => {
                if self.open.is_empty() {
                    if token.is_whitespace() {
                        return Ok(());
                    }
                    return Err(WireError::parse("character data outside root element"));
                }
                self.close_pending_start();
                escape_into(&mut self.out, text, false);
            }
        }
        Ok(())
    }

    fn close_pending_start(&mut self) {
        if self.start_pending {
            self.out.push('>');
            self.start_pending = false;
        }
    }

    fn write_start(&mut self, element: &Element) {
        let name = element.name.qualified();
        self.out.push('<');
        self.out.push_str(&name);
        for ns in &element.namespaces {
            match &ns.prefix {
                Some(p) => {
                    self.out.push_str(" xmlns:");
                    self.out.push_str(p);
                }
                None => self.out.push_str(" xmlns"),
            }
            self.out.push_str("=\"");
            escape_into(&mut self.out, &ns.uri, true);
            self.out.push('"');
        }
        for attr in &element.attributes {
            self.out.push(' ');
            self.out.push_str(&attr.name.qualified());
            self.out.push_str("=\"");
            escape_into(&mut self.out, &attr.value, true);
            self.out.push('"');
        }
        self.open.push(name);
        self.start_pending = true;
    }

    fn finish(self) -> Result<String> {
        if !self.open.is_empty() {
            return Err(WireError::parse(format!(
                "unclosed element <{}>",
                self.open.last().map(String::as_str).unwrap_or("")
            )));
        }
        if !self.root_done {
            return Err(WireError::parse("XML document has no root element"));
        }
        Ok(self.out)
    }
}

fn escape_into(out: &mut String, text: &str, attribute: bool) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' if attribute => out.push_str("&quot;"),
            '\n' if attribute => out.push_str("&#10;"),
            '\t' if attribute => out.push_str("&#9;"),
            _ => out.push(c),
        }
    }
}

// ============================================================================
// Reader
// ============================================================================

/// Raw (unresolved) name as written in the document.
struct RawName<'a> {
    prefix: Option<&'a str>,
    local: &'a str,
}

fn split_name(name: &str) -> Result<RawName<'_>> {
    if name.is_empty() {
        return Err(WireError::parse("empty XML name"));
    }
    match name.split_once(':') {
        Some((prefix, local)) if !prefix.is_empty() && !local.is_empty() => Ok(RawName {
            prefix: Some(prefix),
            local,
        }),
        Some(_) => Err(WireError::parse(format!("malformed XML name '{}'", name))),
        None => Ok(RawName {
            prefix: None,
            local: name,
        }),
    }
}

struct XmlReader<'a> {
    text: &'a str,
    pos: usize,
    /// Raw names of open elements.
    open: Vec<&'a str>,
    /// Namespace declarations per open element.
    scopes: Vec<Vec<Namespace>>,
    root_seen: bool,
    tokens: Vec<Token>,
}

impl<'a> XmlReader<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            text,
            pos: 0,
            open: Vec::new(),
            scopes: Vec::new(),
            root_seen: false,
            tokens: Vec::new(),
        }
    }

    fn rest(&self) -> &'a str {
        let text: &'a str = self.text;
        &text[self.pos..]
    }

    fn skip_past(&mut self, terminator: &str, what: &str) -> Result<&'a str> {
        let rest = self.rest();
        let idx = rest
            .find(terminator)
            .ok_or_else(|| WireError::parse(format!("unterminated {}", what)))?;
        self.pos += idx + terminator.len();
        Ok(&rest[..idx])
    }

    fn read_all(mut self) -> Result<TokenBuffer> {
        // Byte order mark.
        if self.rest().starts_with('\u{feff}') {
            self.pos += '\u{feff}'.len_utf8();
        }
        while self.pos < self.text.len() {
            let rest = self.rest();
            if rest.starts_with("<?") {
                self.skip_past("?>", "processing instruction")?;
            } else if rest.starts_with("<!--") {
                self.skip_past("-->", "comment")?;
            } else if rest.starts_with("<![CDATA[") {
                self.pos += "<![CDATA[".len();
                let data = self.skip_past("]]>", "CDATA section")?;
                self.push_text(data.to_string())?;
            } else if rest.starts_with("<!") {
                return Err(WireError::parse("DOCTYPE declarations are not supported"));
            } else if rest.starts_with("</") {
                self.read_end_tag()?;
            } else if rest.starts_with('<') {
                self.read_start_tag()?;
            } else {
                let end = rest.find('<').unwrap_or(rest.len());
                let raw = &rest[..end];
                self.pos += end;
                let text = unescape(raw)?;
                self.push_text(text)?;
            }
        }
        if let Some(name) = self.open.last() {
            return Err(WireError::parse(format!("unclosed element <{}>", name)));
        }
        if !self.root_seen {
            return Err(WireError::parse("XML document has no root element"));
        }
        Ok(TokenBuffer::from(self.tokens))
    }

    fn push_text(&mut self, text: String) -> Result<()> {
        if self.open.is_empty() {
            if text.chars().all(char::is_whitespace) {
                return Ok(());
            }
            return Err(WireError::parse("character data outside root element"));
        }
        if text.is_empty() {
            return Ok(());
        }
        // Merge adjacent text (e.g. text followed by CDATA).
        if let Some(Token::Text(prev)) = self.tokens.last_mut() {
            prev.push_str(&text);
        } else {
            self.tokens.push(Token::Text(text));
        }
        Ok(())
    }

    fn read_end_tag(&mut self) -> Result<()> {
        self.pos += 2;
        let name = self.skip_past(">", "end tag")?.trim();
        match self.open.pop() {
            Some(open) if open == name => {
                self.scopes.pop();
                self.tokens.push(Token::End);
                Ok(())
            }
            Some(open) => Err(WireError::parse(format!(
                "end tag </{}> does not match <{}>",
                name, open
            ))),
            None => Err(WireError::parse(format!("unexpected end tag </{}>", name))),
        }
    }

    fn read_name(&mut self) -> &'a str {
        let rest = self.rest();
        let end = rest
            .find(|c: char| c.is_whitespace() || matches!(c, '/' | '>' | '='))
            .unwrap_or(rest.len());
        self.pos += end;
        &rest[..end]
    }

    fn skip_ws(&mut self) {
        let rest = self.rest();
        let trimmed = rest.trim_start();
        self.pos += rest.len() - trimmed.len();
    }

    fn read_start_tag(&mut self) -> Result<()> {
        if self.open.is_empty() && self.root_seen {
            return Err(WireError::parse("second root element in XML document"));
        }
        self.pos += 1;
        let name = self.read_name();
        let mut raw_attrs: Vec<(&'a str, String)> = Vec::new();
        let self_closing = loop {
            self.skip_ws();
            let rest = self.rest();
            if rest.starts_with("/>") {
                self.pos += 2;
                break true;
            }
            if rest.starts_with('>') {
                self.pos += 1;
                break false;
            }
            if rest.is_empty() {
                return Err(WireError::parse(format!("unterminated start tag <{}", name)));
            }
            let attr_name = self.read_name();
            if attr_name.is_empty() {
                return Err(WireError::parse(format!("malformed attribute in <{}>", name)));
            }
            self.skip_ws();
            if !self.rest().starts_with('=') {
                return Err(WireError::parse(format!(
                    "attribute '{}' in <{}> has no value",
                    attr_name, name
                )));
            }
            self.pos += 1;
            self.skip_ws();
            let quote = match self.rest().chars().next() {
                Some(q @ ('"' | '\'')) => q,
                _ => {
                    return Err(WireError::parse(format!(
                        "attribute '{}' value must be quoted",
                        attr_name
                    )))
                }
            };
            self.pos += 1;
            let raw_value = self.skip_past(&quote.to_string(), "attribute value")?;
            raw_attrs.push((attr_name, unescape(raw_value)?));
        };

        let mut namespaces = Vec::new();
        let mut plain = Vec::new();
        for (attr_name, value) in raw_attrs {
            if attr_name == "xmlns" {
                namespaces.push(Namespace {
                    prefix: None,
                    uri: value,
                });
            } else if let Some(prefix) = attr_name.strip_prefix("xmlns:") {
                namespaces.push(Namespace {
                    prefix: Some(prefix.to_string()),
                    uri: value,
                });
            } else {
                plain.push((attr_name, value));
            }
        }
        self.scopes.push(namespaces.clone());

        let element_name = self.resolve(split_name(name)?, true)?;
        let mut attributes = Vec::with_capacity(plain.len());
        for (attr_name, value) in plain {
            attributes.push(Attribute {
                name: self.resolve(split_name(attr_name)?, false)?,
                value,
            });
        }

        self.tokens.push(Token::Start(Element {
            name: element_name,
            attributes,
            namespaces,
        }));
        self.root_seen = true;
        if self_closing {
            self.scopes.pop();
            self.tokens.push(Token::End);
        } else {
            self.open.push(name);
        }
        Ok(())
    }

    fn resolve(&self, raw: RawName<'_>, use_default: bool) -> Result<QName> {
        let namespace = match raw.prefix {
            Some("xml") => Some(XML_NAMESPACE.to_string()),
            Some(prefix) => Some(self.lookup(Some(prefix)).ok_or_else(|| {
                WireError::parse(format!("undeclared namespace prefix '{}'", prefix))
            })?),
            None if use_default => self.lookup(None).filter(|uri| !uri.is_empty()),
            None => None,
        };
        Ok(QName {
            namespace,
            prefix: raw.prefix.map(str::to_string),
            local: raw.local.to_string(),
        })
    }

    fn lookup(&self, prefix: Option<&str>) -> Option<String> {
        self.scopes
            .iter()
            .rev()
            .flat_map(|scope| scope.iter())
            .find(|ns| ns.prefix.as_deref() == prefix)
            .map(|ns| ns.uri.clone())
    }
}

fn unescape(raw: &str) -> Result<String> {
    if !raw.contains('&') {
        return Ok(raw.to_string());
    }
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(idx) = rest.find('&') {
        out.push_str(&rest[..idx]);
        let after = &rest[idx + 1..];
        let end = after
            .find(';')
            .ok_or_else(|| WireError::parse("unterminated entity reference"))?;
        let entity = &after[..end];
        match entity {
            "lt" => out.push('<'),
            "gt" => out.push('>'),
            "amp" => out.push('&'),
            "quot" => out.push('"'),
            "apos" => out.push('\''),
            _ => {
                let code = if let Some(hex) = entity.strip_prefix("#x") {
                    u32::from_str_radix(hex, 16).ok()
                } else if let Some(dec) = entity.strip_prefix('#') {
                    dec.parse::<u32>().ok()
                } else {
                    None
                };
                let c = code.and_then(char::from_u32).ok_or_else(|| {
                    WireError::parse(format!("unknown entity reference '&{};'", entity))
                })?;
                out.push(c);
            }
        }
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}
