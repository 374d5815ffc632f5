//! SOAP envelope and fault protocol.
//!
//! - [`SoapProtocol`]: SOAP 1.1 envelope build/parse with header, body and
//!   fault-detail dispatch
//! - [`PoxProtocol`]: plain XML, body only
//! - [`ProtocolDirectory`]: protocol lookup by name
//! - [`SoapFault`], [`FaultCode`], [`fault_from_error`]: the fault model

mod envelope;
mod fault;
mod protocol;

pub use envelope::SoapProtocol;
pub use fault::{
    fault_from_error, DetailWriter, FaultCode, SoapFault, TextDetail, SOAP_ENV_NS,
    SOAP_ENV_PREFIX, STANDARD_CODES,
};
pub use protocol::{MessageProtocol, PoxProtocol, ProtocolDirectory};
