//! XML token stream shared by codecs, envelope processing and handlers.
//!
//! Payload marshalling happens outside this crate: body, header and fault
//! handlers read and write [`Token`]s through [`TokenSource`] and
//! [`TokenSink`]. Codecs turn token streams into bytes and back.

mod stream;
mod token;

pub use stream::{
    read_text, skip_element, skip_whitespace, start_element, TokenBuffer, TokenSink, TokenSource,
};
pub(crate) use stream::expect_end;
pub use token::{Attribute, Element, Namespace, QName, Token};
