//! OSC 1.0 wire codec
//!
//! The control surface speaks plain OSC over UDP. One datagram carries either
//! a single message or a `#bundle` of elements.
//!
//! ## Message Layout
//!
//! ```text
//! Address       "/live/track/get/name\0" padded to a multiple of 4
//! Type tags     ",is\0" padded to a multiple of 4
//! Arguments     big-endian, each padded to a multiple of 4
//! ```
//!
//! ## Bundle Layout
//!
//! ```text
//! "#bundle\0"   8 bytes
//! Time tag      8 bytes (ignored on receive, "immediately" on send)
//! Elements      repeated: i32 size, then `size` bytes of message or bundle
//! ```

use bytes::{BufMut, Bytes, BytesMut};
use serde::Serialize;

/// Bundle marker - first 8 bytes of every bundle
pub const BUNDLE_TAG: &[u8] = b"#bundle\0";

/// OSC time tag meaning "immediately"
const IMMEDIATE: u64 = 1;

/// One typed OSC argument.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum OscArg {
    /// `i` - 32-bit integer
    Int(i32),
    /// `f` - 32-bit float
    Float(f32),
    /// `s` - string
    Str(String),
    /// `b` - blob
    Blob(#[serde(serialize_with = "serialize_blob")] Bytes),
    /// `h` - 64-bit integer
    Long(i64),
    /// `d` - 64-bit float
    Double(f64),
    /// `T` / `F` - no payload bytes
    Bool(bool),
    /// `N` - no payload bytes
    Nil,
}

fn serialize_blob<S: serde::Serializer>(blob: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_seq(blob.iter())
}

impl OscArg {
    /// Type tag character for this argument
    pub fn tag(&self) -> char {
        match self {
            OscArg::Int(_) => 'i',
            OscArg::Float(_) => 'f',
            OscArg::Str(_) => 's',
            OscArg::Blob(_) => 'b',
            OscArg::Long(_) => 'h',
            OscArg::Double(_) => 'd',
            OscArg::Bool(true) => 'T',
            OscArg::Bool(false) => 'F',
            OscArg::Nil => 'N',
        }
    }

    /// Numeric view: ints, floats and bools widen to f64.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            OscArg::Int(v) => Some(f64::from(*v)),
            // Widen through the shortest decimal form so 0.85f32 reads as 0.85
            OscArg::Float(v) => Some(v.to_string().parse().unwrap_or(f64::from(*v))),
            OscArg::Long(v) => Some(*v as f64),
            OscArg::Double(v) => Some(*v),
            OscArg::Bool(v) => Some(if *v { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    /// Integer view. Floats are accepted only when they hold a whole number.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            OscArg::Int(v) => Some(i64::from(*v)),
            OscArg::Long(v) => Some(*v),
            OscArg::Bool(v) => Some(i64::from(*v)),
            OscArg::Float(v) if v.fract() == 0.0 => Some(*v as i64),
            OscArg::Double(v) if v.fract() == 0.0 => Some(*v as i64),
            _ => None,
        }
    }

    /// Truthiness as the control surface reports it (0/1 ints or T/F).
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            OscArg::Bool(v) => Some(*v),
            other => other.as_i64().map(|v| v != 0),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            OscArg::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl From<i32> for OscArg {
    fn from(v: i32) -> Self {
        OscArg::Int(v)
    }
}

impl From<f32> for OscArg {
    fn from(v: f32) -> Self {
        OscArg::Float(v)
    }
}

impl From<bool> for OscArg {
    fn from(v: bool) -> Self {
        OscArg::Bool(v)
    }
}

impl From<&str> for OscArg {
    fn from(v: &str) -> Self {
        OscArg::Str(v.to_string())
    }
}

impl From<String> for OscArg {
    fn from(v: String) -> Self {
        OscArg::Str(v)
    }
}

/// An ordered sequence of typed scalars, as carried by one message.
pub type Payload = Vec<OscArg>;

/// Errors during packet decoding
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum OscError {
    #[error("Packet truncated: needed {needed} bytes at offset {offset}, {available} available")]
    Truncated {
        offset: usize,
        needed: usize,
        available: usize,
    },
    #[error("Unterminated string at offset {0}")]
    UnterminatedString(usize),
    #[error("Invalid UTF-8 in {0}")]
    InvalidUtf8(&'static str),
    #[error("Address must start with '/': {0:?}")]
    InvalidAddress(String),
    #[error("Type tag string must start with ','")]
    MissingTypeTags,
    #[error("Unsupported type tag: {0:?}")]
    UnsupportedTag(char),
    #[error("Invalid bundle element size: {0}")]
    InvalidElementSize(i32),
}

/// A single OSC message: address pattern plus arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct OscMessage {
    pub address: String,
    pub args: Payload,
}

impl OscMessage {
    pub fn new(address: impl Into<String>, args: Payload) -> Self {
        Self {
            address: address.into(),
            args,
        }
    }

    /// Encode to wire bytes
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(64);
        put_padded_str(&mut buf, &self.address);

        let mut tags = String::with_capacity(self.args.len() + 1);
        tags.push(',');
        tags.extend(self.args.iter().map(OscArg::tag));
        put_padded_str(&mut buf, &tags);

        for arg in &self.args {
            match arg {
                OscArg::Int(v) => buf.put_i32(*v),
                OscArg::Float(v) => buf.put_f32(*v),
                OscArg::Str(s) => put_padded_str(&mut buf, s),
                OscArg::Blob(b) => {
                    buf.put_i32(b.len() as i32);
                    buf.put_slice(b);
                    buf.put_bytes(0, pad_len(b.len()));
                }
                OscArg::Long(v) => buf.put_i64(*v),
                OscArg::Double(v) => buf.put_f64(*v),
                OscArg::Bool(_) | OscArg::Nil => {}
            }
        }

        buf.freeze()
    }

    /// Decode a single message (not a bundle)
    pub fn decode(data: &[u8]) -> Result<Self, OscError> {
        let mut reader = Reader::new(data);

        let address = reader.read_str("address")?;
        if !address.starts_with('/') {
            return Err(OscError::InvalidAddress(address));
        }

        // Some senders omit the type tag string for argument-less messages
        if reader.remaining() == 0 {
            return Ok(Self::new(address, Vec::new()));
        }

        let tags = reader.read_str("type tags")?;
        let mut tag_chars = tags.chars();
        if tag_chars.next() != Some(',') {
            return Err(OscError::MissingTypeTags);
        }

        let mut args = Vec::with_capacity(tags.len().saturating_sub(1));
        for tag in tag_chars {
            let arg = match tag {
                'i' => OscArg::Int(i32::from_be_bytes(reader.take_array()?)),
                'f' => OscArg::Float(f32::from_be_bytes(reader.take_array()?)),
                's' | 'S' => OscArg::Str(reader.read_str("string argument")?),
                'b' => {
                    let len = i32::from_be_bytes(reader.take_array()?);
                    let len = usize::try_from(len).map_err(|_| OscError::InvalidElementSize(len))?;
                    let blob = Bytes::copy_from_slice(reader.take(len)?);
                    reader.take(pad_len(len))?;
                    OscArg::Blob(blob)
                }
                'h' => OscArg::Long(i64::from_be_bytes(reader.take_array()?)),
                'd' => OscArg::Double(f64::from_be_bytes(reader.take_array()?)),
                'T' => OscArg::Bool(true),
                'F' => OscArg::Bool(false),
                'N' => OscArg::Nil,
                other => return Err(OscError::UnsupportedTag(other)),
            };
            args.push(arg);
        }

        Ok(Self::new(address, args))
    }
}

/// Encode several messages as one immediate bundle
pub fn encode_bundle(messages: &[OscMessage]) -> Bytes {
    let mut buf = BytesMut::with_capacity(16 + messages.len() * 32);
    buf.put_slice(BUNDLE_TAG);
    buf.put_u64(IMMEDIATE);
    for message in messages {
        let encoded = message.encode();
        buf.put_i32(encoded.len() as i32);
        buf.put_slice(&encoded);
    }
    buf.freeze()
}

/// Decode a datagram into its messages, flattening nested bundles in order.
pub fn decode_packet(data: &[u8]) -> Result<Vec<OscMessage>, OscError> {
    let mut messages = Vec::new();
    decode_into(data, &mut messages)?;
    Ok(messages)
}

fn decode_into(data: &[u8], out: &mut Vec<OscMessage>) -> Result<(), OscError> {
    if !data.starts_with(BUNDLE_TAG) {
        out.push(OscMessage::decode(data)?);
        return Ok(());
    }

    let mut reader = Reader::new(data);
    reader.take(BUNDLE_TAG.len())?;
    let _time_tag: [u8; 8] = reader.take_array()?;

    while reader.remaining() > 0 {
        let size = i32::from_be_bytes(reader.take_array()?);
        if size <= 0 || size % 4 != 0 {
            return Err(OscError::InvalidElementSize(size));
        }
        let element = reader.take(size as usize)?;
        decode_into(element, out)?;
    }

    Ok(())
}

/// Bytes of NUL padding needed after `len` bytes of content
fn pad_len(len: usize) -> usize {
    (4 - len % 4) % 4
}

/// Write a NUL-terminated string padded to 4 bytes (always at least one NUL)
fn put_padded_str(buf: &mut BytesMut, s: &str) {
    buf.put_slice(s.as_bytes());
    buf.put_bytes(0, 4 - s.len() % 4);
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], OscError> {
        if self.remaining() < n {
            return Err(OscError::Truncated {
                offset: self.pos,
                needed: n,
                available: self.remaining(),
            });
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N], OscError> {
        let slice = self.take(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(slice);
        Ok(out)
    }

    fn read_str(&mut self, what: &'static str) -> Result<String, OscError> {
        let start = self.pos;
        let rest = &self.data[start..];
        let nul = rest
            .iter()
            .position(|b| *b == 0)
            .ok_or(OscError::UnterminatedString(start))?;
        let s = std::str::from_utf8(&rest[..nul])
            .map_err(|_| OscError::InvalidUtf8(what))?
            .to_string();
        // content + at least one NUL, rounded up to 4
        let consumed = nul + 4 - nul % 4;
        self.take(consumed.min(rest.len()))?;
        Ok(s)
    }
}
