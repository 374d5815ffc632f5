//! Engine configuration.
//!
//! [`EngineConfig`] is an immutable snapshot: every `with_*` setter returns
//! a new value and components holding a snapshot rebuild from the new one.
//! It loads from JSON:
//!
//! ```
//! use soapwire::EngineConfig;
//!
//! let config = EngineConfig::from_json(r#"{
//!     "protocol": "pox",
//!     "media_type": "application/x-msgpack-xml",
//!     "include_stack_trace": true
//! }"#).unwrap();
//! assert_eq!(config.protocol(), "pox");
//! assert_eq!(config.media_type().to_string(), "application/x-msgpack-xml");
//! assert_eq!(config.buffer_size(), 8 * 1024);
//! ```

use serde::{Deserialize, Serialize};

use crate::dime::DEFAULT_BUFFER_SIZE;
use crate::error::{Result, WireError};
use crate::media::{AcceptList, MediaType};
use crate::transport::ConnectionProperties;

/// Default protocol name.
pub const DEFAULT_PROTOCOL: &str = "soap";

/// Serialized form of the configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawConfig {
    protocol: String,
    media_type: String,
    accept: Option<String>,
    soap_action: Option<String>,
    include_stack_trace: bool,
    buffer_size: usize,
    read_size: usize,
}

impl Default for RawConfig {
    fn default() -> Self {
        Self {
            protocol: DEFAULT_PROTOCOL.to_string(),
            media_type: "text/xml".to_string(),
            accept: None,
            soap_action: None,
            include_stack_trace: false,
            buffer_size: DEFAULT_BUFFER_SIZE,
            read_size: DEFAULT_BUFFER_SIZE,
        }
    }
}

/// Immutable engine configuration snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    protocol: String,
    media_type: MediaType,
    accept: Option<String>,
    soap_action: Option<String>,
    include_stack_trace: bool,
    buffer_size: usize,
    read_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            protocol: DEFAULT_PROTOCOL.to_string(),
            media_type: MediaType::from_static("text", "xml"),
            accept: None,
            soap_action: None,
            include_stack_trace: false,
            buffer_size: DEFAULT_BUFFER_SIZE,
            read_size: DEFAULT_BUFFER_SIZE,
        }
    }
}

impl EngineConfig {
    /// Default configuration: SOAP over `text/xml`, 8 KiB buffers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let raw: RawConfig = serde_json::from_str(json)?;
        Self::from_raw(raw)
    }

    /// Serialize to JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.to_raw())?)
    }

    fn from_raw(raw: RawConfig) -> Result<Self> {
        Self::new()
            .with_protocol(&raw.protocol)
            .with_media_type(&raw.media_type)?
            .with_accept(raw.accept.as_deref())?
            .with_soap_action(raw.soap_action.as_deref())
            .with_stack_trace(raw.include_stack_trace)
            .with_buffer_size(raw.buffer_size)?
            .with_read_size(raw.read_size)
    }

    fn to_raw(&self) -> RawConfig {
        RawConfig {
            protocol: self.protocol.clone(),
            media_type: self.media_type.to_string(),
            accept: self.accept.clone(),
            soap_action: self.soap_action.clone(),
            include_stack_trace: self.include_stack_trace,
            buffer_size: self.buffer_size,
            read_size: self.read_size,
        }
    }

    /// Protocol name, resolved through a
    /// [`ProtocolDirectory`](crate::soap::ProtocolDirectory).
    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    /// Media type of outbound requests.
    pub fn media_type(&self) -> &MediaType {
        &self.media_type
    }

    /// Accept list sent with requests.
    pub fn accept(&self) -> Option<&str> {
        self.accept.as_deref()
    }

    /// SOAP action sent with requests.
    pub fn soap_action(&self) -> Option<&str> {
        self.soap_action.as_deref()
    }

    /// Whether server faults carry the error chain as detail.
    pub fn include_stack_trace(&self) -> bool {
        self.include_stack_trace
    }

    /// DIME record buffer size.
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Bytes requested per transport read.
    pub fn read_size(&self) -> usize {
        self.read_size
    }

    /// Connection settings derived from this snapshot.
    pub fn connection_properties(&self) -> ConnectionProperties {
        ConnectionProperties {
            buffer_size: self.buffer_size,
            read_size: self.read_size,
        }
    }

    /// Set the protocol name.
    pub fn with_protocol(mut self, protocol: &str) -> Self {
        self.protocol = protocol.trim().to_ascii_lowercase();
        self
    }

    /// Set the request media type.
    pub fn with_media_type(mut self, media_type: &str) -> Result<Self> {
        self.media_type = MediaType::parse(media_type)?.freeze();
        Ok(self)
    }

    /// Set (or clear) the accept list; it must parse.
    pub fn with_accept(mut self, accept: Option<&str>) -> Result<Self> {
        let accept = accept.map(str::trim).filter(|a| !a.is_empty());
        if let Some(list) = accept {
            AcceptList::parse(list)?;
        }
        self.accept = accept.map(str::to_string);
        Ok(self)
    }

    /// Set (or clear) the SOAP action.
    pub fn with_soap_action(mut self, action: Option<&str>) -> Self {
        self.soap_action = action.map(str::to_string);
        self
    }

    /// Include error chains in server faults.
    pub fn with_stack_trace(mut self, include: bool) -> Self {
        self.include_stack_trace = include;
        self
    }

    /// Set the DIME record buffer size.
    pub fn with_buffer_size(mut self, size: usize) -> Result<Self> {
        if size == 0 || size > u32::MAX as usize {
            return Err(WireError::config(format!("Invalid buffer size {}", size)));
        }
        self.buffer_size = size;
        Ok(self)
    }

    /// Set the read size.
    pub fn with_read_size(mut self, size: usize) -> Result<Self> {
        if size == 0 {
            return Err(WireError::config("Read size must be positive"));
        }
        self.read_size = size;
        Ok(self)
    }
}
