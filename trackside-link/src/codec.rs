//! TLV Codec
//!
//! Encodes and decodes the compact field format carried in LoRa payloads:
//!
//! ```text
//! field := id (1 byte) | type (1 byte) | payload (width set by type)
//! ```
//!
//! Decoding is best-effort. Radio links drop and truncate bytes, so a frame
//! that goes bad half-way still yields every field decoded before the fault,
//! together with a list of [`DecodeWarning`]s describing where it stopped.
//! Decoding never returns an error and never panics on untrusted input.

use crate::signals::NameRegistry;
use crate::types::{LinkError, Result, TlvMap, TlvValue, TypeTag};
use byteorder::{ByteOrder, LittleEndian};
use std::fmt;

/// Longest string a single length byte can describe
pub const MAX_STRING_LEN: usize = u8::MAX as usize;

/// Non-fatal problems found while decoding a frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeWarning {
    /// Payload text was not valid hex; nothing decoded
    InvalidHex(String),
    /// A lone byte remained where a 2-byte field header was expected
    TruncatedHeader { offset: usize },
    /// String length byte or string body ran past the end of the frame
    TruncatedString { id: u8, offset: usize },
    /// Fixed-width payload ran past the end of the frame
    TruncatedField { id: u8, tag: u8, offset: usize },
    /// Type tag not known; the width of the rest of the frame is unknowable
    UnknownTag { id: u8, tag: u8, offset: usize },
    /// String payload was not UTF-8; decoded lossily
    InvalidUtf8 { id: u8 },
    /// The same id appeared twice; the later value replaced the earlier one
    DuplicateId { id: u8 },
}

impl fmt::Display for DecodeWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeWarning::InvalidHex(e) => write!(f, "invalid hex payload: {}", e),
            DecodeWarning::TruncatedHeader { offset } => {
                write!(f, "truncated field header at byte {}", offset)
            }
            DecodeWarning::TruncatedString { id, offset } => {
                write!(f, "truncated string for id {} at byte {}", id, offset)
            }
            DecodeWarning::TruncatedField { id, tag, offset } => write!(
                f,
                "truncated field for id {} (type 0x{:02X}) at byte {}",
                id, tag, offset
            ),
            DecodeWarning::UnknownTag { id, tag, offset } => write!(
                f,
                "unknown type 0x{:02X} for id {} at byte {}",
                tag, id, offset
            ),
            DecodeWarning::InvalidUtf8 { id } => write!(f, "non UTF-8 string for id {}", id),
            DecodeWarning::DuplicateId { id } => write!(f, "duplicate id {} in frame", id),
        }
    }
}

/// Result of decoding one frame
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodeOutcome {
    /// Value fields in frame order (name announcements excluded)
    pub fields: TlvMap,
    /// `(id, name)` announcements found in the frame
    pub names: Vec<(u8, String)>,
    /// Problems encountered; non-empty means the frame was cut short or odd
    pub warnings: Vec<DecodeWarning>,
}

impl DecodeOutcome {
    /// True when the whole frame decoded without complaint
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }

    /// Emit one log line per warning, tagged with the frame source
    pub fn log_warnings(&self, source: &str) {
        for warning in &self.warnings {
            log::warn!("{}: {} ({} fields kept)", source, warning, self.fields.len());
        }
    }
}

/// Decode a binary frame without touching any registry
pub fn decode(data: &[u8]) -> DecodeOutcome {
    let mut outcome = DecodeOutcome::default();
    let mut idx = 0;

    while idx < data.len() {
        if idx + 2 > data.len() {
            outcome.warnings.push(DecodeWarning::TruncatedHeader { offset: idx });
            break;
        }

        let id = data[idx];
        let raw_tag = data[idx + 1];
        idx += 2;

        let Some(tag) = TypeTag::from_byte(raw_tag) else {
            outcome.warnings.push(DecodeWarning::UnknownTag {
                id,
                tag: raw_tag,
                offset: idx - 2,
            });
            break;
        };

        let value = match tag.fixed_width() {
            None => {
                let Some((text, next)) = read_string(data, idx, id, &mut outcome.warnings) else {
                    break;
                };
                idx = next;
                if tag == TypeTag::Name {
                    outcome.names.push((id, text));
                    continue;
                }
                TlvValue::Str(text)
            }
            Some(width) => {
                if idx + width > data.len() {
                    outcome.warnings.push(DecodeWarning::TruncatedField {
                        id,
                        tag: raw_tag,
                        offset: idx,
                    });
                    break;
                }
                let value = read_fixed(tag, &data[idx..idx + width]);
                idx += width;
                value
            }
        };

        if outcome.fields.insert(id, value).is_some() {
            outcome.warnings.push(DecodeWarning::DuplicateId { id });
        }
    }

    outcome
}

/// Decode a frame and record its name announcements in `names`
pub fn decode_into(data: &[u8], names: &NameRegistry) -> DecodeOutcome {
    let outcome = decode(data);
    for (id, name) in &outcome.names {
        names.announce(*id, name.clone());
    }
    outcome
}

/// Decode the hex text found in a `+RCV` line
pub fn decode_hex(hex_payload: &str, names: &NameRegistry) -> DecodeOutcome {
    match hex::decode(hex_payload.trim()) {
        Ok(bytes) => decode_into(&bytes, names),
        Err(e) => DecodeOutcome {
            warnings: vec![DecodeWarning::InvalidHex(e.to_string())],
            ..DecodeOutcome::default()
        },
    }
}

/// Read a length-prefixed string starting at `idx`
///
/// Returns the string and the offset just past it.
fn read_string(
    data: &[u8],
    idx: usize,
    id: u8,
    warnings: &mut Vec<DecodeWarning>,
) -> Option<(String, usize)> {
    let Some(&len) = data.get(idx) else {
        warnings.push(DecodeWarning::TruncatedString { id, offset: idx });
        return None;
    };
    let start = idx + 1;
    let end = start + len as usize;
    if end > data.len() {
        warnings.push(DecodeWarning::TruncatedString { id, offset: start });
        return None;
    }

    let text = match std::str::from_utf8(&data[start..end]) {
        Ok(s) => s.to_string(),
        Err(_) => {
            warnings.push(DecodeWarning::InvalidUtf8 { id });
            String::from_utf8_lossy(&data[start..end]).into_owned()
        }
    };
    Some((text, end))
}

/// Interpret a fixed-width payload; `raw` is exactly the tag's width
fn read_fixed(tag: TypeTag, raw: &[u8]) -> TlvValue {
    match tag {
        TypeTag::U8 => TlvValue::U8(raw[0]),
        TypeTag::Bool => TlvValue::Bool(raw[0] != 0),
        TypeTag::Command => TlvValue::Command(raw[0]),
        TypeTag::U16 => TlvValue::U16(LittleEndian::read_u16(raw)),
        TypeTag::U32 => TlvValue::U32(LittleEndian::read_u32(raw)),
        TypeTag::F32 => TlvValue::F32(LittleEndian::read_f32(raw)),
        TypeTag::U64 => TlvValue::U64(LittleEndian::read_u64(raw)),
        // Variable-width tags never reach here (fixed_width() is None for them)
        TypeTag::Name | TypeTag::Str => TlvValue::Str(String::new()),
    }
}

/// Append one encoded field to `out`
///
/// A rejected string leaves `out` untouched.
pub fn encode_field(id: u8, value: &TlvValue, out: &mut Vec<u8>) -> Result<()> {
    match value {
        TlvValue::U8(v) | TlvValue::Command(v) => push_field(id, value.tag(), &[*v], out),
        TlvValue::Bool(v) => push_field(id, value.tag(), &[u8::from(*v)], out),
        TlvValue::U16(v) => {
            let mut buf = [0u8; 2];
            LittleEndian::write_u16(&mut buf, *v);
            push_field(id, value.tag(), &buf, out);
        }
        TlvValue::U32(v) => {
            let mut buf = [0u8; 4];
            LittleEndian::write_u32(&mut buf, *v);
            push_field(id, value.tag(), &buf, out);
        }
        TlvValue::F32(v) => {
            let mut buf = [0u8; 4];
            LittleEndian::write_f32(&mut buf, *v);
            push_field(id, value.tag(), &buf, out);
        }
        TlvValue::U64(v) => {
            let mut buf = [0u8; 8];
            LittleEndian::write_u64(&mut buf, *v);
            push_field(id, value.tag(), &buf, out);
        }
        TlvValue::Str(s) => {
            check_string(s)?;
            push_field(id, TypeTag::Str, &[], out);
            push_string(s, out);
        }
    }
    Ok(())
}

/// Append a name announcement for `id` to `out`
pub fn encode_name(id: u8, name: &str, out: &mut Vec<u8>) -> Result<()> {
    check_string(name)?;
    push_field(id, TypeTag::Name, &[], out);
    push_string(name, out);
    Ok(())
}

fn check_string(s: &str) -> Result<()> {
    if s.len() > MAX_STRING_LEN {
        return Err(LinkError::StringTooLong(s.len()));
    }
    Ok(())
}

fn push_field(id: u8, tag: TypeTag, payload: &[u8], out: &mut Vec<u8>) {
    out.push(id);
    out.push(tag as u8);
    out.extend_from_slice(payload);
}

/// Caller has already checked the length with `check_string`
fn push_string(s: &str, out: &mut Vec<u8>) {
    out.push(s.len() as u8);
    out.extend_from_slice(s.as_bytes());
}

/// Builder for outgoing frames
///
/// ```
/// use trackside_link::codec::FrameBuilder;
///
/// let frame = FrameBuilder::new()
///     .command(0x01, 0x03)
///     .u16(0x02, 7)
///     .build();
/// assert_eq!(frame, vec![0x01, 0x07, 0x03, 0x02, 0x02, 0x07, 0x00]);
/// ```
#[derive(Debug, Clone, Default)]
pub struct FrameBuilder {
    bytes: Vec<u8>,
}

impl FrameBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn fixed(mut self, id: u8, tag: TypeTag, payload: &[u8]) -> Self {
        push_field(id, tag, payload, &mut self.bytes);
        self
    }

    pub fn u8(self, id: u8, value: u8) -> Self {
        self.fixed(id, TypeTag::U8, &[value])
    }

    pub fn u16(self, id: u8, value: u16) -> Self {
        let mut buf = [0u8; 2];
        LittleEndian::write_u16(&mut buf, value);
        self.fixed(id, TypeTag::U16, &buf)
    }

    pub fn u32(self, id: u8, value: u32) -> Self {
        let mut buf = [0u8; 4];
        LittleEndian::write_u32(&mut buf, value);
        self.fixed(id, TypeTag::U32, &buf)
    }

    pub fn u64(self, id: u8, value: u64) -> Self {
        let mut buf = [0u8; 8];
        LittleEndian::write_u64(&mut buf, value);
        self.fixed(id, TypeTag::U64, &buf)
    }

    pub fn f32(self, id: u8, value: f32) -> Self {
        let mut buf = [0u8; 4];
        LittleEndian::write_f32(&mut buf, value);
        self.fixed(id, TypeTag::F32, &buf)
    }

    pub fn bool(self, id: u8, value: bool) -> Self {
        self.fixed(id, TypeTag::Bool, &[u8::from(value)])
    }

    pub fn command(self, id: u8, value: u8) -> Self {
        self.fixed(id, TypeTag::Command, &[value])
    }

    pub fn string(mut self, id: u8, value: &str) -> Result<Self> {
        encode_field(id, &TlvValue::Str(value.to_string()), &mut self.bytes)?;
        Ok(self)
    }

    pub fn name(mut self, id: u8, name: &str) -> Result<Self> {
        encode_name(id, name, &mut self.bytes)?;
        Ok(self)
    }

    pub fn build(self) -> Vec<u8> {
        self.bytes
    }

    /// Upper-case hex, the form sent in `AT+SEND`
    pub fn to_hex(&self) -> String {
        hex::encode_upper(&self.bytes)
    }
}
