//! Exchange module - message sequencing and handler dispatch.
//!
//! This module provides:
//!
//! - [`MessageContext`] / [`ExchangeContext`] - one message, and the ordered
//!   messages of one exchange with a cursor on the current one
//! - [`Handler`] - header, body and fault-detail handlers bound to a
//!   [`Phase`]
//! - [`Processor`] - sends and receives the contexts of an exchange over a
//!   connection

mod context;
mod handler;
mod processor;

pub use context::{
    Attribute, Direction, ExchangeContext, ExchangeState, MessageContext, Payload, Phase,
    ATTR_ACCEPT, ATTR_ACTION, ATTR_CONTENT_TYPE,
};
pub use handler::{first_claim, Handler, InHandler, OutHandler};
pub use processor::Processor;
