//! Fixed-width request and status envelopes.
//!
//! Every protocol message is exactly [`ENVELOPE_WIDTH`] bytes of ASCII text,
//! left-padded with `'0'`. There is no length prefix: the width is a protocol
//! constant shared by both ends.
//!
//! ```text
//! Init:   0000000000000000;0:10:100:mib   (cycle 0, cycles, multiplier, unit)
//! Fetch:  000000000000000000000000000;7   (cycle index >= 1)
//! Status: 000000000000000;self_test_pass  (reserved numeric field, tag)
//! ```

use crate::size::SizeUnit;
use bytes::{BufMut, BytesMut};
use std::str;

/// Width in bytes of every envelope on the wire.
pub const ENVELOPE_WIDTH: usize = 32;

/// Left padding byte.
const FILLER: u8 = b'0';

/// Separates the numeric prefix from the message body.
const BODY_SEP: char = ';';

/// Separates fields inside a request body.
const FIELD_SEP: char = ':';

const TAG_PASS: &str = "self_test_pass";
const TAG_FAIL: &str = "self_test_fail";

/// A client request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request {
    /// Cycle index 0: start a new session of `cycles` payloads.
    Init {
        cycles: u32,
        multiplier: u64,
        unit: SizeUnit,
    },
    /// Cycle index 1..=cycles: fetch one payload block.
    Fetch { index: u32 },
}

/// Host reply to an init request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    SelfTestPass,
    SelfTestFail,
}

impl Status {
    fn tag(self) -> &'static str {
        match self {
            Status::SelfTestPass => TAG_PASS,
            Status::SelfTestFail => TAG_FAIL,
        }
    }
}

/// Envelope encoding/decoding errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvelopeError {
    /// Encoded message does not fit in the envelope width
    TooLong(usize),
    /// Received bytes do not form a valid envelope
    Malformed(String),
}

impl std::fmt::Display for EnvelopeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EnvelopeError::TooLong(len) => write!(
                f,
                "Envelope body is {} bytes, exceeds width of {}",
                len, ENVELOPE_WIDTH
            ),
            EnvelopeError::Malformed(msg) => write!(f, "Malformed envelope: {}", msg),
        }
    }
}

impl std::error::Error for EnvelopeError {}

fn malformed(msg: impl Into<String>) -> EnvelopeError {
    EnvelopeError::Malformed(msg.into())
}

impl Request {
    /// Encode into a full-width envelope.
    pub fn encode(&self) -> Result<BytesMut, EnvelopeError> {
        let body = match self {
            Request::Init {
                cycles,
                multiplier,
                unit,
            } => format!(
                "{BODY_SEP}0{FIELD_SEP}{cycles}{FIELD_SEP}{multiplier}{FIELD_SEP}{}",
                unit.as_wire()
            ),
            Request::Fetch { index } => format!("{BODY_SEP}{index}"),
        };
        pad(&body)
    }

    /// Decode a full-width envelope.
    pub fn decode(buf: &[u8]) -> Result<Self, EnvelopeError> {
        let (_, body) = split_envelope(buf)?;
        let fields: Vec<&str> = body.split(FIELD_SEP).collect();

        let index = parse_number::<u32>(fields[0], "cycle index")?;
        match (index, fields.len()) {
            (0, 4) => {
                let cycles = parse_number::<u32>(fields[1], "total cycles")?;
                let multiplier = parse_number::<u64>(fields[2], "multiplier")?;
                let unit = fields[3]
                    .parse::<SizeUnit>()
                    .map_err(|e| malformed(e.to_string()))?;
                if cycles == 0 || multiplier == 0 {
                    return Err(malformed("init requires positive cycles and multiplier"));
                }
                Ok(Request::Init {
                    cycles,
                    multiplier,
                    unit,
                })
            }
            (0, n) => Err(malformed(format!("init expects 4 fields, got {}", n))),
            (index, 1) => Ok(Request::Fetch { index }),
            (_, n) => Err(malformed(format!("fetch expects 1 field, got {}", n))),
        }
    }
}

impl Status {
    /// Encode into a full-width envelope. The reserved field is always 0.
    pub fn encode(&self) -> Result<BytesMut, EnvelopeError> {
        pad(&format!("0{BODY_SEP}{}", self.tag()))
    }

    /// Decode a full-width envelope. The reserved field is ignored.
    pub fn decode(buf: &[u8]) -> Result<Self, EnvelopeError> {
        let (_, body) = split_envelope(buf)?;
        match body {
            TAG_PASS => Ok(Status::SelfTestPass),
            TAG_FAIL => Ok(Status::SelfTestFail),
            other => Err(malformed(format!("unknown status tag '{}'", other))),
        }
    }
}

/// Left-pad `body` with filler to exactly the envelope width.
fn pad(body: &str) -> Result<BytesMut, EnvelopeError> {
    if body.len() > ENVELOPE_WIDTH {
        return Err(EnvelopeError::TooLong(body.len()));
    }
    let mut buf = BytesMut::with_capacity(ENVELOPE_WIDTH);
    buf.put_bytes(FILLER, ENVELOPE_WIDTH - body.len());
    buf.put_slice(body.as_bytes());
    Ok(buf)
}

/// Split an envelope into its numeric prefix and body.
fn split_envelope(buf: &[u8]) -> Result<(u64, &str), EnvelopeError> {
    if buf.len() != ENVELOPE_WIDTH {
        return Err(malformed(format!(
            "expected {} bytes, got {}",
            ENVELOPE_WIDTH,
            buf.len()
        )));
    }
    let text = str::from_utf8(buf).map_err(|_| malformed("invalid UTF-8"))?;
    let (prefix, body) = text
        .split_once(BODY_SEP)
        .ok_or_else(|| malformed("missing ';' separator"))?;

    if !prefix.bytes().all(|b| b.is_ascii_digit()) {
        return Err(malformed("non-numeric envelope prefix"));
    }
    // All-filler prefixes can exceed u64; only the trimmed digits matter.
    let trimmed = prefix.trim_start_matches(FILLER as char);
    let reserved = if trimmed.is_empty() {
        0
    } else {
        parse_number::<u64>(trimmed, "reserved field")?
    };

    if body.is_empty() {
        return Err(malformed("empty body"));
    }
    Ok((reserved, body))
}

fn parse_number<T: str::FromStr>(field: &str, what: &str) -> Result<T, EnvelopeError> {
    if field.is_empty() || !field.bytes().all(|b| b.is_ascii_digit()) {
        return Err(malformed(format!("invalid {}: '{}'", what, field)));
    }
    field
        .parse::<T>()
        .map_err(|_| malformed(format!("invalid {}: '{}'", what, field)))
}
