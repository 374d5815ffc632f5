//! MIME-style media type descriptor.
//!
//! # Example
//!
//! ```
//! use soapwire::media::MediaType;
//!
//! let mt = MediaType::parse("text/xml; charset=utf-8").unwrap();
//! assert_eq!(mt.primary(), "text");
//! assert_eq!(mt.sub(), "xml");
//! assert_eq!(mt.parameter("charset"), Some("utf-8"));
//! assert!(MediaType::parse("*/*").unwrap().accepts(&mt));
//! ```

use std::fmt;
use std::str::FromStr;

use crate::error::{Result, WireError};

/// Wildcard token for primary or sub type.
pub const WILDCARD: &str = "*";

/// `text/xml`, the default content type.
pub const TEXT_XML: &str = "text/xml";

/// `application/soap+xml`.
pub const APPLICATION_SOAP_XML: &str = "application/soap+xml";

/// A parsed media type.
///
/// Primary and sub type are stored lowercased; parameter names and values
/// keep their case. Equality ignores parameter order.
#[derive(Debug, Clone)]
pub struct MediaType {
    primary: String,
    sub: String,
    params: Vec<(String, Option<String>)>,
    frozen: bool,
}

impl MediaType {
    /// Create a media type from primary and sub type.
    pub fn new(primary: &str, sub: &str) -> Result<Self> {
        let primary = primary.trim();
        let sub = sub.trim();
        if primary.is_empty() || sub.is_empty() {
            return Err(WireError::config(format!(
                "Media type requires primary and sub type: '{}/{}'",
                primary, sub
            )));
        }
        Ok(Self {
            primary: primary.to_ascii_lowercase(),
            sub: sub.to_ascii_lowercase(),
            params: Vec::new(),
            frozen: false,
        })
    }

    /// Frozen instance from lowercase literals known to be valid.
    pub(crate) fn from_static(primary: &'static str, sub: &'static str) -> Self {
        Self {
            primary: primary.to_string(),
            sub: sub.to_string(),
            params: Vec::new(),
            frozen: true,
        }
    }

    /// Parse `primary/sub[; name[=value]]*`.
    pub fn parse(text: &str) -> Result<Self> {
        Self::parse_with(text, false)
    }

    /// Parse, discarding all parameters.
    ///
    /// Used for codec lookup where parameters must not affect matching.
    pub fn parse_ignoring_parameters(text: &str) -> Result<Self> {
        Self::parse_with(text, true)
    }

    fn parse_with(text: &str, ignore_params: bool) -> Result<Self> {
        let mut sections = split_unquoted(text, ';').into_iter();
        let base = sections.next().unwrap_or("").trim();
        let (primary, sub) = base.split_once('/').ok_or_else(|| {
            WireError::config(format!("Media type '{}' is missing '/' separator", text))
        })?;
        if primary.trim().is_empty() || sub.trim().is_empty() || sub.contains('/') {
            return Err(WireError::config(format!(
                "Media type '{}' must have non-empty primary and sub type",
                text
            )));
        }
        let mut media_type = Self::new(primary, sub)?;
        if ignore_params {
            return Ok(media_type);
        }
        for section in sections {
            let section = section.trim();
            if section.is_empty() {
                continue;
            }
            let (name, value) = match section.split_once('=') {
                Some((name, value)) => (name.trim(), Some(unquote(value.trim()))),
                None => (section, None),
            };
            if name.is_empty() {
                return Err(WireError::config(format!(
                    "Media type '{}' has a parameter without a name",
                    text
                )));
            }
            media_type.params.push((name.to_string(), value));
        }
        Ok(media_type)
    }

    /// Primary type (lowercase).
    #[inline]
    pub fn primary(&self) -> &str {
        &self.primary
    }

    /// Sub type (lowercase).
    #[inline]
    pub fn sub(&self) -> &str {
        &self.sub
    }

    /// Parameters in declaration order.
    pub fn parameters(&self) -> &[(String, Option<String>)] {
        &self.params
    }

    /// Value of the first parameter with `name`; `None` if absent or valueless.
    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(n, _)| n == name)
            .and_then(|(_, v)| v.as_deref())
    }

    /// True if a parameter named `name` is present, with or without value.
    pub fn has_parameter(&self, name: &str) -> bool {
        self.params.iter().any(|(n, _)| n == name)
    }

    /// Set (replace or append) a parameter.
    pub fn set_parameter(&mut self, name: &str, value: Option<&str>) -> Result<()> {
        self.check_mutable()?;
        let value = value.map(str::to_string);
        match self.params.iter_mut().find(|(n, _)| n == name) {
            Some(entry) => entry.1 = value,
            None => self.params.push((name.to_string(), value)),
        }
        Ok(())
    }

    /// Remove a parameter, returning whether it was present.
    pub fn remove_parameter(&mut self, name: &str) -> Result<bool> {
        self.check_mutable()?;
        let before = self.params.len();
        self.params.retain(|(n, _)| n != name);
        Ok(self.params.len() != before)
    }

    /// Builder-style parameter setter.
    pub fn with_parameter(mut self, name: &str, value: &str) -> Result<Self> {
        self.set_parameter(name, Some(value))?;
        Ok(self)
    }

    /// Make this instance immutable.
    pub fn freeze(mut self) -> Self {
        self.frozen = true;
        self
    }

    /// True once [`freeze`](Self::freeze) has been called.
    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    fn check_mutable(&self) -> Result<()> {
        if self.frozen {
            return Err(WireError::config(format!(
                "Media type {} is frozen",
                self.base()
            )));
        }
        Ok(())
    }

    /// True if primary or sub type is the wildcard.
    pub fn is_wildcard(&self) -> bool {
        self.primary == WILDCARD || self.sub == WILDCARD
    }

    /// One-directional match with wildcard support; parameters are ignored.
    pub fn accepts(&self, other: &MediaType) -> bool {
        let primary = self.primary == other.primary
            || self.primary == WILDCARD
            || other.primary == WILDCARD;
        let sub = self.sub == other.sub || self.sub == WILDCARD || other.sub == WILDCARD;
        primary && sub
    }

    /// True if primary and sub type match exactly, ignoring parameters.
    pub fn same_base(&self, other: &MediaType) -> bool {
        self.primary == other.primary && self.sub == other.sub
    }

    /// A copy without parameters.
    pub fn without_parameters(&self) -> MediaType {
        MediaType {
            primary: self.primary.clone(),
            sub: self.sub.clone(),
            params: Vec::new(),
            frozen: false,
        }
    }

    /// `primary/sub` without parameters.
    pub fn base(&self) -> String {
        format!("{}/{}", self.primary, self.sub)
    }
}

/// Split `text` at `separator`, ignoring separators inside quoted strings.
pub(crate) fn split_unquoted(text: &str, separator: char) -> Vec<&str> {
    let mut items = Vec::new();
    let mut start = 0;
    let mut quoted = false;
    let mut escaped = false;
    for (i, c) in text.char_indices() {
        if escaped {
            escaped = false;
        } else if quoted && c == '\\' {
            escaped = true;
        } else if c == '"' {
            quoted = !quoted;
        } else if c == separator && !quoted {
            items.push(&text[start..i]);
            start = i + c.len_utf8();
        }
    }
    items.push(&text[start..]);
    items
}

fn unquote(value: &str) -> String {
    let inner = match value.strip_prefix('"').and_then(|v| v.strip_suffix('"')) {
        Some(inner) => inner,
        None => return value.to_string(),
    };
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => out.extend(chars.next()),
            c => out.push(c),
        }
    }
    out
}

fn needs_quotes(value: &str) -> bool {
    value.is_empty()
        || value
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, ';' | ',' | '"' | '=' | '\\'))
}

fn write_quoted(f: &mut fmt::Formatter<'_>, value: &str) -> fmt::Result {
    f.write_str("\"")?;
    for c in value.chars() {
        if matches!(c, '"' | '\\') {
            f.write_str("\\")?;
        }
        write!(f, "{}", c)?;
    }
    f.write_str("\"")
}

impl fmt::Display for MediaType {
    /// Full form including parameters, e.g. `text/xml; charset=utf-8`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.primary, self.sub)?;
        for (name, value) in &self.params {
            match value {
                Some(v) if needs_quotes(v) => {
                    write!(f, "; {}=", name)?;
                    write_quoted(f, v)?;
                }
                Some(v) => write!(f, "; {}={}", name, v)?,
                None => write!(f, "; {}", name)?,
            }
        }
        Ok(())
    }
}

impl FromStr for MediaType {
    type Err = WireError;

    fn from_str(s: &str) -> Result<Self> {
        MediaType::parse(s)
    }
}

impl PartialEq for MediaType {
    fn eq(&self, other: &Self) -> bool {
        if !self.same_base(other) || self.params.len() != other.params.len() {
            return false;
        }
        let mut mine: Vec<_> = self.params.iter().collect();
        let mut theirs: Vec<_> = other.params.iter().collect();
        mine.sort();
        theirs.sort();
        mine == theirs
    }
}

impl Eq for MediaType {}
