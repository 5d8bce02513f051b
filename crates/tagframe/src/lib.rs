//! # Tagframe
//!
//! The wire codec of the instrument data socket.
//!
//! ## Philosophy
//!
//! - **Fixed Header**: Every frame is `[Tag: i32][Length: u32][Payload: Length]`.
//! - **Native Integers**: Header integers use the host byte order, matching the
//!   4-byte `int` the driver packs on the same machine class.
//! - **Bare Signals**: Control traffic (keepalive, courtesy close) is a tag with
//!   no length and no payload.
//! - **Bounded**: Decoders are zero-copy, bounds-checked views. Nothing panics
//!   on short input.

pub mod tags;

#[cfg(test)]
mod tests;

/// Size of a tag on the wire.
pub const TAG_SIZE: usize = 4;

/// Size of a length field on the wire.
pub const LENGTH_SIZE: usize = 4;

/// Size of a full frame header (tag + length).
pub const HEADER_SIZE: usize = TAG_SIZE + LENGTH_SIZE;

/// Tagframe encoding and decoding errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Buffer exhausted while reading.
    UnexpectedEnd { needed: usize, available: usize },
    /// Payload length does not fit the `u32` length field.
    PayloadTooLarge(usize),
    /// An integer payload did not hold exactly one 4-byte integer.
    InvalidIntPayload(usize),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::UnexpectedEnd { needed, available } => {
                write!(f, "Unexpected end of frame: needed {} bytes, {} available", needed, available)
            }
            Error::PayloadTooLarge(len) => write!(f, "Payload of {} bytes exceeds the u32 length field", len),
            Error::InvalidIntPayload(len) => write!(f, "Integer payload must be 4 bytes, got {}", len),
        }
    }
}

impl std::error::Error for Error {}

/// Specialized `Result` for Tagframe operations.
pub type Result<T> = std::result::Result<T, Error>;

/// One unit exchanged over the connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub tag: i32,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(tag: i32, payload: impl Into<Vec<u8>>) -> Self {
        Self { tag, payload: payload.into() }
    }

    /// Declared length of the payload, as carried in the header.
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Encodes the frame with its header.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        encode_frame(self.tag, &self.payload)
    }

    /// Interprets the payload as a single native-endian `i32`.
    pub fn int(&self) -> Result<i32> {
        read_int(&self.payload)
    }
}

pub fn encode_tag(tag: i32) -> [u8; TAG_SIZE] {
    tag.to_ne_bytes()
}

pub fn decode_tag(bytes: [u8; TAG_SIZE]) -> i32 {
    i32::from_ne_bytes(bytes)
}

pub fn encode_length(length: u32) -> [u8; LENGTH_SIZE] {
    length.to_ne_bytes()
}

pub fn decode_length(bytes: [u8; LENGTH_SIZE]) -> u32 {
    u32::from_ne_bytes(bytes)
}

/// Encodes `tag | length | payload` into a fresh buffer.
///
/// # Errors
/// Returns `Error::PayloadTooLarge` if the payload exceeds `u32::MAX` bytes.
pub fn encode_frame(tag: i32, payload: &[u8]) -> Result<Vec<u8>> {
    let mut enc = Encoder::with_capacity(HEADER_SIZE + payload.len());
    enc.frame(tag, payload)?;
    Ok(enc.into_bytes())
}

/// Encodes a bare control signal: the tag alone, no length, no payload.
pub fn encode_signal(tag: i32) -> [u8; TAG_SIZE] {
    encode_tag(tag)
}

/// Builds the payload of a single-integer frame (timeouts, config keys, ...).
pub fn int_payload(value: i32) -> Vec<u8> {
    value.to_ne_bytes().to_vec()
}

/// Reads a single-integer payload.
///
/// # Errors
/// Returns `Error::InvalidIntPayload` unless the payload is exactly 4 bytes.
pub fn read_int(payload: &[u8]) -> Result<i32> {
    let bytes: [u8; 4] = payload
        .try_into()
        .map_err(|_| Error::InvalidIntPayload(payload.len()))?;
    Ok(i32::from_ne_bytes(bytes))
}

/// An append-only writer for a batch of frames and signals.
#[derive(Debug, Default)]
pub struct Encoder {
    buf: Vec<u8>,
}

impl Encoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self { buf: Vec::with_capacity(capacity) }
    }

    /// Appends a full frame.
    pub fn frame(&mut self, tag: i32, payload: &[u8]) -> Result<()> {
        let length = u32::try_from(payload.len()).map_err(|_| Error::PayloadTooLarge(payload.len()))?;
        self.buf.extend_from_slice(&encode_tag(tag));
        self.buf.extend_from_slice(&encode_length(length));
        self.buf.extend_from_slice(payload);
        Ok(())
    }

    /// Appends a bare signal tag.
    pub fn signal(&mut self, tag: i32) {
        self.buf.extend_from_slice(&encode_signal(tag));
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

/// A zero-copy, bounds-checked cursor over received bytes.
///
/// Reading advances the cursor. A failed read leaves the cursor untouched so
/// the caller can wait for more bytes and retry.
#[derive(Debug, Clone)]
pub struct Decoder<'a> {
    buf: &'a [u8],
}

impl<'a> Decoder<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    /// Returns the remaining bytes in the view.
    pub fn remaining(&self) -> usize {
        self.buf.len()
    }

    fn read_bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        if n > self.buf.len() {
            return Err(Error::UnexpectedEnd { needed: n, available: self.buf.len() });
        }
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    fn read_array(&mut self) -> Result<[u8; 4]> {
        let mut out = [0u8; 4];
        out.copy_from_slice(self.read_bytes(4)?);
        Ok(out)
    }

    /// Reads a tag; used both for frame headers and bare signals.
    pub fn tag(&mut self) -> Result<i32> {
        Ok(decode_tag(self.read_array()?))
    }

    pub fn length(&mut self) -> Result<u32> {
        Ok(decode_length(self.read_array()?))
    }

    /// Peeks the next tag without advancing.
    pub fn peek_tag(&self) -> Result<i32> {
        self.clone().tag()
    }

    /// Reads a complete frame: header then exactly `length` payload bytes.
    pub fn frame(&mut self) -> Result<FrameRef<'a>> {
        let mut cursor = self.clone();
        let tag = cursor.tag()?;
        let length = cursor.length()?;
        let payload = cursor.read_bytes(length as usize)?;
        *self = cursor;
        Ok(FrameRef { tag, payload })
    }
}

/// A frame borrowed from a `Decoder`'s buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameRef<'a> {
    pub tag: i32,
    pub payload: &'a [u8],
}

impl FrameRef<'_> {
    pub fn to_owned(&self) -> Frame {
        Frame::new(self.tag, self.payload)
    }
}
