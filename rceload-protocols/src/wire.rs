//! Binary wire format for synthetic events
//!
//! ## Message Format
//!
//! All integers and floats are big-endian:
//! ```text
//! [class_label: u32][feature_count: u32][feature: f64] * feature_count
//! ```
//!
//! Messages are self-delimiting: a reader of a stream of concatenated
//! messages reads the 8-byte header, then knows exactly how many feature
//! bytes follow. No additional framing is used on the socket.

use rceload_common::SyntheticEvent;
use std::fmt;

/// Header size: class label + feature count
pub const HEADER_SIZE: usize = 8;

/// Size of one encoded feature reading
pub const FEATURE_SIZE: usize = 8;

/// Upper bound on the feature count a decoder accepts
pub const MAX_FEATURES: u32 = 65_536;

/// Errors produced when decoding wire bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Buffer shorter than the header or than the length the header declares
    Truncated { needed: usize, available: usize },

    /// Declared feature count exceeds `MAX_FEATURES`
    FeatureCountTooLarge(u32),

    /// Bytes left over after a complete message
    TrailingBytes(usize),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::Truncated { needed, available } => {
                write!(f, "Truncated message: need {needed} bytes, have {available}")
            }
            DecodeError::FeatureCountTooLarge(n) => {
                write!(f, "Feature count {n} exceeds limit of {MAX_FEATURES}")
            }
            DecodeError::TrailingBytes(n) => write!(f, "{n} trailing bytes after message"),
        }
    }
}

impl std::error::Error for DecodeError {}

/// Encoded length of a message carrying `feature_count` features
pub fn encoded_len(feature_count: usize) -> usize {
    HEADER_SIZE + feature_count * FEATURE_SIZE
}

/// Encode one event into a fresh buffer
pub fn encode(event: &SyntheticEvent) -> Vec<u8> {
    let mut buf = Vec::with_capacity(encoded_len(event.features.len()));
    encode_into(event, &mut buf);
    buf
}

/// Append the encoding of one event to `buf`
pub fn encode_into(event: &SyntheticEvent, buf: &mut Vec<u8>) {
    buf.reserve(encoded_len(event.features.len()));
    buf.extend_from_slice(&event.class_label.to_be_bytes());
    buf.extend_from_slice(&(event.features.len() as u32).to_be_bytes());
    for value in &event.features {
        buf.extend_from_slice(&value.to_be_bytes());
    }
}

/// Read the header and return the total message length it declares
///
/// Returns `Ok(None)` when fewer than `HEADER_SIZE` bytes are available.
pub fn peek_message_len(data: &[u8]) -> Result<Option<usize>, DecodeError> {
    if data.len() < HEADER_SIZE {
        return Ok(None);
    }

    let feature_count = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
    if feature_count > MAX_FEATURES {
        return Err(DecodeError::FeatureCountTooLarge(feature_count));
    }

    Ok(Some(encoded_len(feature_count as usize)))
}

/// Decode the message at the start of `data`
///
/// Returns `Ok(None)` if the message is incomplete, otherwise the event and
/// the number of bytes consumed. Bytes after the message are left untouched.
pub fn decode_prefix(data: &[u8]) -> Result<Option<(SyntheticEvent, usize)>, DecodeError> {
    let total = match peek_message_len(data)? {
        Some(total) => total,
        None => return Ok(None),
    };
    if data.len() < total {
        return Ok(None);
    }

    let class_label = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
    let features = data[HEADER_SIZE..total]
        .chunks_exact(FEATURE_SIZE)
        .map(|chunk| {
            let mut raw = [0u8; FEATURE_SIZE];
            raw.copy_from_slice(chunk);
            f64::from_be_bytes(raw)
        })
        .collect();

    Ok(Some((SyntheticEvent::new(class_label, features), total)))
}

/// Decode exactly one message occupying the whole buffer
pub fn decode(data: &[u8]) -> Result<SyntheticEvent, DecodeError> {
    let needed = match peek_message_len(data)? {
        Some(total) => total,
        None => HEADER_SIZE,
    };

    match decode_prefix(data)? {
        Some((event, consumed)) if consumed == data.len() => Ok(event),
        Some((_, consumed)) => Err(DecodeError::TrailingBytes(data.len() - consumed)),
        None => Err(DecodeError::Truncated { needed, available: data.len() }),
    }
}

/// Incremental decoder for a byte stream of concatenated messages
///
/// Bytes are appended as they arrive from the socket; complete events are
/// drained in arrival order.
#[derive(Debug, Default)]
pub struct WireDecoder {
    buffer: Vec<u8>,
    /// Offset of the first undecoded byte
    pos: usize,
    decoded: u64,
}

impl WireDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append raw bytes read from the stream
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Decode the next complete event, if one is buffered
    pub fn next_event(&mut self) -> Result<Option<SyntheticEvent>, DecodeError> {
        match decode_prefix(&self.buffer[self.pos..])? {
            Some((event, consumed)) => {
                self.pos += consumed;
                self.decoded += 1;
                self.compact();
                Ok(Some(event))
            }
            None => Ok(None),
        }
    }

    /// Decode every complete event currently buffered
    pub fn drain_events(&mut self) -> Result<Vec<SyntheticEvent>, DecodeError> {
        let mut events = Vec::new();
        while let Some(event) = self.next_event()? {
            events.push(event);
        }
        Ok(events)
    }

    /// Bytes received but not yet part of a complete message
    pub fn pending_bytes(&self) -> usize {
        self.buffer.len() - self.pos
    }

    /// Total number of messages decoded so far
    pub fn decoded_count(&self) -> u64 {
        self.decoded
    }

    fn compact(&mut self) {
        if self.pos == self.buffer.len() {
            self.buffer.clear();
            self.pos = 0;
        } else if self.pos > 64 * 1024 {
            self.buffer.drain(..self.pos);
            self.pos = 0;
        }
    }
}
