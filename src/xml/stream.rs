//! Token sink/source traits and the in-memory buffer implementing both.

use std::collections::VecDeque;

use super::{Element, QName, Token};
use crate::error::{Result, WireError};

/// Write side of a token stream.
pub trait TokenSink {
    /// Append a token.
    fn write_token(&mut self, token: Token) -> Result<()>;

    /// Open an element.
    fn start(&mut self, element: Element) -> Result<()> {
        self.write_token(Token::Start(element))
    }

    /// Write character data. Empty text is dropped.
    fn text(&mut self, text: &str) -> Result<()> {
        if text.is_empty() {
            return Ok(());
        }
        self.write_token(Token::Text(text.to_string()))
    }

    /// Close the innermost open element.
    fn end(&mut self) -> Result<()> {
        self.write_token(Token::End)
    }

    /// Write `<name>text</name>`.
    fn text_element(&mut self, name: QName, text: &str) -> Result<()> {
        self.start(Element::new(name))?;
        self.text(text)?;
        self.end()
    }
}

/// Read side of a token stream.
pub trait TokenSource {
    /// Look at the next token without consuming it.
    fn peek(&mut self) -> Result<Option<&Token>>;

    /// Consume the next token. `None` at end of stream.
    fn next_token(&mut self) -> Result<Option<Token>>;
}

/// Drop whitespace-only text tokens.
pub fn skip_whitespace<S: TokenSource + ?Sized>(source: &mut S) -> Result<()> {
    while matches!(source.peek()?, Some(t) if t.is_whitespace()) {
        source.next_token()?;
    }
    Ok(())
}

/// Consume the next start tag, skipping whitespace.
///
/// Returns `None` (consuming nothing significant) when the next token is an
/// end tag or the stream is exhausted.
pub fn start_element<S: TokenSource + ?Sized>(source: &mut S) -> Result<Option<Element>> {
    skip_whitespace(source)?;
    match source.peek()? {
        Some(Token::Start(_)) => match source.next_token()? {
            Some(Token::Start(element)) => Ok(Some(element)),
            _ => Err(WireError::parse("token stream changed under peek")),
        },
        Some(Token::Text(text)) => Err(WireError::parse(format!(
            "unexpected character data '{}'",
            text.trim()
        ))),
        Some(Token::End) | None => Ok(None),
    }
}

/// Skip the next element including its whole subtree.
pub fn skip_element<S: TokenSource + ?Sized>(source: &mut S) -> Result<()> {
    if start_element(source)?.is_none() {
        return Err(WireError::parse("expected an element to skip"));
    }
    let mut depth = 1usize;
    while depth > 0 {
        match source.next_token()? {
            Some(Token::Start(_)) => depth += 1,
            Some(Token::End) => depth -= 1,
            Some(Token::Text(_)) => {}
            None => return Err(WireError::parse("unexpected end of token stream")),
        }
    }
    Ok(())
}

/// Read the text content of an already opened element and consume its end tag.
pub fn read_text<S: TokenSource + ?Sized>(source: &mut S) -> Result<String> {
    let mut text = String::new();
    loop {
        match source.next_token()? {
            Some(Token::Text(t)) => text.push_str(&t),
            Some(Token::End) => return Ok(text),
            Some(Token::Start(el)) => {
                return Err(WireError::parse(format!(
                    "unexpected element {} in text content",
                    el.name
                )))
            }
            None => return Err(WireError::parse("unexpected end of token stream")),
        }
    }
}

/// Consume the end tag of the current element, skipping whitespace.
pub(crate) fn expect_end<S: TokenSource + ?Sized>(source: &mut S, of: &QName) -> Result<()> {
    skip_whitespace(source)?;
    match source.next_token()? {
        Some(Token::End) => Ok(()),
        Some(Token::Start(el)) => Err(WireError::parse(format!(
            "unexpected element {} inside {}",
            el.name, of
        ))),
        Some(Token::Text(t)) => Err(WireError::parse(format!(
            "unexpected character data '{}' inside {}",
            t.trim(),
            of
        ))),
        None => Err(WireError::parse(format!("missing end tag for {}", of))),
    }
}

/// In-memory token queue usable as both sink and source.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenBuffer {
    tokens: VecDeque<Token>,
}

impl TokenBuffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of queued tokens.
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    /// True if no tokens are queued.
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Iterate queued tokens.
    pub fn iter(&self) -> impl Iterator<Item = &Token> {
        self.tokens.iter()
    }

    /// Drain into a vector.
    pub fn into_tokens(self) -> Vec<Token> {
        self.tokens.into()
    }
}

impl From<Vec<Token>> for TokenBuffer {
    fn from(tokens: Vec<Token>) -> Self {
        Self {
            tokens: tokens.into(),
        }
    }
}

impl TokenSink for TokenBuffer {
    fn write_token(&mut self, token: Token) -> Result<()> {
        self.tokens.push_back(token);
        Ok(())
    }
}

impl TokenSource for TokenBuffer {
    fn peek(&mut self) -> Result<Option<&Token>> {
        Ok(self.tokens.front())
    }

    fn next_token(&mut self) -> Result<Option<Token>> {
        Ok(self.tokens.pop_front())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> TokenBuffer {
        let mut buf = TokenBuffer::new();
        buf.text("\n  ").unwrap();
        buf.start(Element::new(QName::local("a"))).unwrap();
        buf.start(Element::new(QName::local("b"))).unwrap();
        buf.text("hi").unwrap();
        buf.end().unwrap();
        buf.end().unwrap();
        buf.text_element(QName::local("c"), "x").unwrap();
        buf
    }

    #[test]
    fn test_start_element_skips_whitespace() {
        let mut buf = sample();
        let el = start_element(&mut buf).unwrap().unwrap();
        assert_eq!(el.name.local, "a");
    }

    #[test]
    fn test_skip_element_consumes_subtree() {
        let mut buf = sample();
        skip_element(&mut buf).unwrap();
        let el = start_element(&mut buf).unwrap().unwrap();
        assert_eq!(el.name.local, "c");
        assert_eq!(read_text(&mut buf).unwrap(), "x");
        assert!(buf.is_empty());
    }

    #[test]
    fn test_start_element_stops_at_end() {
        let mut buf = TokenBuffer::from(vec![Token::End]);
        assert!(start_element(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), 1);
    }

    #[test]
    fn test_start_element_rejects_text() {
        let mut buf = TokenBuffer::from(vec![Token::Text("junk".into())]);
        assert!(start_element(&mut buf).is_err());
    }

    #[test]
    fn test_read_text_rejects_child() {
        let mut buf = sample();
        start_element(&mut buf).unwrap();
        assert!(read_text(&mut buf).is_err());
    }

    #[test]
    fn test_skip_element_truncated() {
        let mut buf = TokenBuffer::from(vec![Token::Start(Element::new(QName::local("a")))]);
        assert!(skip_element(&mut buf).is_err());
    }

    #[test]
    fn test_empty_text_dropped() {
        let mut buf = TokenBuffer::new();
        buf.text("").unwrap();
        assert!(buf.is_empty());
    }
}
