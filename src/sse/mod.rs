//! Server-Sent Events client side: frame decoding and the push transport.

mod decoder;
mod transport;

pub use decoder::{SseDecoder, SseFrame, DEFAULT_EVENT, MAX_LINE_LENGTH};
pub use transport::{SseTransport, STREAM_PATH};
