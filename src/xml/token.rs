//! Token types.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Qualified name with resolved namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QName {
    /// Namespace URI, `None` for no namespace.
    pub namespace: Option<String>,
    /// Prefix used on the wire, `None` for the default namespace.
    pub prefix: Option<String>,
    /// Local part.
    pub local: String,
}

impl QName {
    /// Name in no namespace.
    pub fn local(local: &str) -> Self {
        Self {
            namespace: None,
            prefix: None,
            local: local.to_string(),
        }
    }

    /// Namespaced name with a prefix.
    pub fn prefixed(namespace: &str, prefix: &str, local: &str) -> Self {
        Self {
            namespace: Some(namespace.to_string()),
            prefix: Some(prefix.to_string()),
            local: local.to_string(),
        }
    }

    /// Namespaced name in the default namespace (no prefix).
    pub fn namespaced(namespace: &str, local: &str) -> Self {
        Self {
            namespace: Some(namespace.to_string()),
            prefix: None,
            local: local.to_string(),
        }
    }

    /// True if namespace and local part match (prefix is irrelevant).
    pub fn matches(&self, namespace: Option<&str>, local: &str) -> bool {
        self.namespace.as_deref() == namespace && self.local == local
    }

    /// `prefix:local` or `local`.
    pub fn qualified(&self) -> String {
        match &self.prefix {
            Some(p) => format!("{}:{}", p, self.local),
            None => self.local.clone(),
        }
    }
}

impl fmt::Display for QName {
    /// Clark notation: `{uri}local`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{{{}}}{}", ns, self.local),
            None => write!(f, "{}", self.local),
        }
    }
}

/// Namespace declaration carried on an element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Namespace {
    /// Declared prefix, `None` for the default namespace.
    pub prefix: Option<String>,
    /// Namespace URI.
    pub uri: String,
}

/// Attribute on an element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    /// Attribute name.
    pub name: QName,
    /// Unescaped value.
    pub value: String,
}

/// Start-tag data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Element {
    /// Element name.
    pub name: QName,
    /// Attributes in document order (namespace declarations excluded).
    pub attributes: Vec<Attribute>,
    /// Namespace declarations made on this element.
    pub namespaces: Vec<Namespace>,
}

impl Element {
    /// Element with no attributes or declarations.
    pub fn new(name: QName) -> Self {
        Self {
            name,
            attributes: Vec::new(),
            namespaces: Vec::new(),
        }
    }

    /// Element declaring its own prefix, the usual shape for a payload root.
    pub fn declaring(name: QName) -> Self {
        let mut element = Self::new(name);
        if let Some(uri) = element.name.namespace.clone() {
            element.namespaces.push(Namespace {
                prefix: element.name.prefix.clone(),
                uri,
            });
        }
        element
    }

    /// Add a namespace declaration.
    pub fn with_namespace(mut self, prefix: Option<&str>, uri: &str) -> Self {
        self.namespaces.push(Namespace {
            prefix: prefix.map(str::to_string),
            uri: uri.to_string(),
        });
        self
    }

    /// Add an attribute.
    pub fn with_attribute(mut self, name: QName, value: &str) -> Self {
        self.attributes.push(Attribute {
            name,
            value: value.to_string(),
        });
        self
    }

    /// Look up an attribute by namespace and local name.
    pub fn attribute(&self, namespace: Option<&str>, local: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.name.matches(namespace, local))
            .map(|a| a.value.as_str())
    }

    /// Resolve a prefix against this element's own declarations.
    pub fn declared_uri(&self, prefix: Option<&str>) -> Option<&str> {
        self.namespaces
            .iter()
            .find(|ns| ns.prefix.as_deref() == prefix)
            .map(|ns| ns.uri.as_str())
    }
}

/// One item of the token stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Token {
    /// Start tag.
    Start(Element),
    /// End tag of the innermost open element.
    End,
    /// Character data (unescaped).
    Text(String),
}

impl Token {
    /// True for text consisting only of whitespace.
    pub fn is_whitespace(&self) -> bool {
        matches!(self, Token::Text(t) if t.chars().all(char::is_whitespace))
    }
}
