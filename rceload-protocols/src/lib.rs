//! rceload protocol implementations
//!
//! This crate provides the two encodings the dispatchers put on the network:
//! - `wire`: the compact binary event message used over TCP and UDP, and as
//!   the HTTP request body
//! - `http`: HTTP/1.1 request framing and response parsing

pub mod http;
pub mod wire;

// Re-export commonly used types
pub use http::{query_param, HttpError, HttpMethod, HttpResponse, HttpTarget};
pub use wire::{decode, decode_prefix, encode, encode_into, DecodeError, WireDecoder};
