//! `Accept` header preference lists.
//!
//! Entries are ordered by descending `q` weight; ties keep declaration order.
//!
//! # Example
//!
//! ```
//! use soapwire::media::AcceptList;
//!
//! let list = AcceptList::parse("text/xml;q=0.5, application/x-xbis").unwrap();
//! let order: Vec<String> = list.iter().map(|e| e.media_type().base()).collect();
//! assert_eq!(order, vec!["application/x-xbis", "text/xml"]);
//! ```

use super::media_type::split_unquoted;
use super::MediaType;
use crate::error::{Result, WireError};

/// Name of the quality parameter.
const QUALITY_PARAM: &str = "q";

/// One entry of an accept list.
#[derive(Debug, Clone, PartialEq)]
pub struct AcceptEntry {
    media_type: MediaType,
    quality: f32,
    position: usize,
}

impl AcceptEntry {
    /// The media type, without the `q` parameter.
    pub fn media_type(&self) -> &MediaType {
        &self.media_type
    }

    /// Quality weight in `0.0..=1.0`.
    pub fn quality(&self) -> f32 {
        self.quality
    }

    /// Position in the original header.
    pub fn position(&self) -> usize {
        self.position
    }
}

/// Parsed, ranked accept list.
#[derive(Debug, Clone, Default)]
pub struct AcceptList {
    entries: Vec<AcceptEntry>,
}

impl AcceptList {
    /// Parse a comma separated list such as `a/b, c/d;q=0.5`.
    ///
    /// Empty list items are skipped. Entries with `q=0` are kept out of the
    /// list since the client declared them unacceptable.
    pub fn parse(header: &str) -> Result<Self> {
        let mut entries = Vec::new();
        for (position, item) in split_unquoted(header, ',').into_iter().enumerate() {
            if item.trim().is_empty() {
                continue;
            }
            let mut media_type = MediaType::parse(item)?;
            let quality = match media_type.parameter(QUALITY_PARAM) {
                Some(q) => parse_quality(q)?,
                None => 1.0,
            };
            media_type.remove_parameter(QUALITY_PARAM)?;
            if quality <= 0.0 {
                continue;
            }
            entries.push(AcceptEntry {
                media_type,
                quality,
                position,
            });
        }
        // Stable sort keeps declaration order for equal weights.
        entries.sort_by(|a, b| b.quality.total_cmp(&a.quality));
        Ok(Self { entries })
    }

    /// A single-entry list.
    pub fn single(media_type: MediaType) -> Self {
        Self {
            entries: vec![AcceptEntry {
                media_type,
                quality: 1.0,
                position: 0,
            }],
        }
    }

    /// Entries, most preferred first.
    pub fn iter(&self) -> impl Iterator<Item = &AcceptEntry> {
        self.entries.iter()
    }

    /// Number of acceptable entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if nothing is acceptable.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn parse_quality(value: &str) -> Result<f32> {
    let q: f32 = value
        .trim()
        .parse()
        .map_err(|_| WireError::config(format!("Invalid quality value '{}'", value)))?;
    if !(0.0..=1.0).contains(&q) {
        return Err(WireError::config(format!(
            "Quality value {} outside 0..1",
            value
        )));
    }
    Ok(q)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bases(list: &AcceptList) -> Vec<String> {
        list.iter().map(|e| e.media_type().base()).collect()
    }

    #[test]
    fn test_declaration_order_without_weights() {
        let list = AcceptList::parse("application/x-xbis, text/xml").unwrap();
        assert_eq!(bases(&list), vec!["application/x-xbis", "text/xml"]);
    }

    #[test]
    fn test_quality_ranking() {
        let list = AcceptList::parse("text/xml;q=0.5, application/x-xbis, */*;q=0.1").unwrap();
        assert_eq!(bases(&list), vec!["application/x-xbis", "text/xml", "*/*"]);
        assert_eq!(list.iter().next().unwrap().quality(), 1.0);
    }

    #[test]
    fn test_ties_keep_declaration_order() {
        let list = AcceptList::parse("a/b;q=0.7, c/d;q=0.9, e/f;q=0.7").unwrap();
        assert_eq!(bases(&list), vec!["c/d", "a/b", "e/f"]);
        let positions: Vec<_> = list.iter().map(|e| e.position()).collect();
        assert_eq!(positions, vec![1, 0, 2]);
    }

    #[test]
    fn test_q_parameter_is_stripped() {
        let list = AcceptList::parse("text/xml; charset=utf-8; q=0.3").unwrap();
        let entry = list.iter().next().unwrap();
        assert_eq!(entry.media_type().to_string(), "text/xml; charset=utf-8");
        assert!((entry.quality() - 0.3).abs() < f32::EPSILON);
    }

    #[test]
    fn test_zero_quality_dropped_and_empty_items_skipped() {
        let list = AcceptList::parse("text/xml;q=0, , application/json").unwrap();
        assert_eq!(bases(&list), vec!["application/json"]);
    }

    #[test]
    fn test_quoted_commas_stay_in_one_entry() {
        let list = AcceptList::parse("text/xml; action=\"a,b\", application/json;q=0.5").unwrap();
        assert_eq!(bases(&list), vec!["text/xml", "application/json"]);
        let first = list.iter().next().unwrap();
        assert_eq!(first.media_type().parameter("action"), Some("a,b"));
        assert_eq!(list.iter().nth(1).unwrap().position(), 1);
    }

    #[test]
    fn test_invalid_quality() {
        assert!(AcceptList::parse("text/xml;q=abc").is_err());
        assert!(AcceptList::parse("text/xml;q=1.5").is_err());
    }

    #[test]
    fn test_invalid_media_type_in_list() {
        assert!(matches!(
            AcceptList::parse("text/, text/xml"),
            Err(WireError::Config(_))
        ));
    }
}
