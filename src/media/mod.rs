//! Media types and `Accept` negotiation.
//!
//! - [`MediaType`] - parsed `primary/sub; name=value` descriptor
//! - [`AcceptList`] - comma separated preference list with `q` weights
//!
//! Codec selection against an accept list lives in
//! [`CodecDirectory::negotiate`](crate::codec::CodecDirectory::negotiate).

mod accept;
mod media_type;

pub use accept::{AcceptEntry, AcceptList};
pub use media_type::{MediaType, APPLICATION_SOAP_XML, TEXT_XML, WILDCARD};
