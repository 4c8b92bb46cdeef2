//! Core types for the trackside link library
//!
//! This module defines the values that flow between the codec, the dispatcher,
//! the signal store and the device registry. Every ingestion boundary converts
//! its input into one of these types before anything else touches it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Wall-clock timestamp attached to events for operator logs
pub type Timestamp = DateTime<Utc>;

/// Result type for link operations
pub type Result<T> = std::result::Result<T, LinkError>;

/// Errors that can occur in the link layer
///
/// Malformed frames are deliberately absent: the codec reports those as
/// [`crate::codec::DecodeWarning`]s alongside a partial result.
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid hex payload: {0}")]
    InvalidHex(#[from] hex::FromHexError),

    #[error("Malformed line: {0}")]
    MalformedLine(String),

    #[error("String field of {0} bytes exceeds the 255 byte limit")]
    StringTooLong(usize),

    #[error("Payload of {0} hex characters exceeds radio maximum of {1}")]
    PayloadTooLarge(usize, usize),

    #[error("Radio module error code {0}")]
    Radio(u8),

    #[error("Timed out waiting for {0}")]
    Timeout(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Name cache error: {0}")]
    NameCache(#[from] serde_json::Error),

    #[error("Link closed")]
    Closed,
}

/// TLV type tags as they appear on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TypeTag {
    /// Name announcement: registers `id -> name`, carries no value
    Name = 0x00,
    U8 = 0x01,
    U16 = 0x02,
    U32 = 0x03,
    F32 = 0x04,
    Str = 0x05,
    Bool = 0x06,
    Command = 0x07,
    U64 = 0x08,
}

impl TypeTag {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(TypeTag::Name),
            0x01 => Some(TypeTag::U8),
            0x02 => Some(TypeTag::U16),
            0x03 => Some(TypeTag::U32),
            0x04 => Some(TypeTag::F32),
            0x05 => Some(TypeTag::Str),
            0x06 => Some(TypeTag::Bool),
            0x07 => Some(TypeTag::Command),
            0x08 => Some(TypeTag::U64),
            _ => None,
        }
    }

    /// Payload width for fixed-size tags, `None` for length-prefixed strings
    pub fn fixed_width(self) -> Option<usize> {
        match self {
            TypeTag::Name | TypeTag::Str => None,
            TypeTag::U8 | TypeTag::Bool | TypeTag::Command => Some(1),
            TypeTag::U16 => Some(2),
            TypeTag::U32 | TypeTag::F32 => Some(4),
            TypeTag::U64 => Some(8),
        }
    }
}

/// A decoded TLV value
#[derive(Debug, Clone, PartialEq)]
pub enum TlvValue {
    U8(u8),
    U16(u16),
    U32(u32),
    F32(f32),
    Str(String),
    Bool(bool),
    Command(u8),
    U64(u64),
}

impl TlvValue {
    /// Wire tag used to encode this value
    pub fn tag(&self) -> TypeTag {
        match self {
            TlvValue::U8(_) => TypeTag::U8,
            TlvValue::U16(_) => TypeTag::U16,
            TlvValue::U32(_) => TypeTag::U32,
            TlvValue::F32(_) => TypeTag::F32,
            TlvValue::Str(_) => TypeTag::Str,
            TlvValue::Bool(_) => TypeTag::Bool,
            TlvValue::Command(_) => TypeTag::Command,
            TlvValue::U64(_) => TypeTag::U64,
        }
    }

    /// Numeric projection used by the telemetry path
    ///
    /// Strings are parsed as floats; anything unparseable yields `None` and the
    /// caller records NaN.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            TlvValue::U8(v) | TlvValue::Command(v) => Some(*v as f64),
            TlvValue::U16(v) => Some(*v as f64),
            TlvValue::U32(v) => Some(*v as f64),
            TlvValue::U64(v) => Some(*v as f64),
            TlvValue::F32(v) => Some(*v as f64),
            TlvValue::Bool(v) => Some(if *v { 1.0 } else { 0.0 }),
            TlvValue::Str(s) => s.trim().parse().ok(),
        }
    }

    /// Integer projection used for command ids, request ids and timestamps
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            TlvValue::U8(v) | TlvValue::Command(v) => Some(*v as u64),
            TlvValue::U16(v) => Some(*v as u64),
            TlvValue::U32(v) => Some(*v as u64),
            TlvValue::U64(v) => Some(*v),
            TlvValue::Bool(v) => Some(*v as u64),
            TlvValue::F32(_) | TlvValue::Str(_) => None,
        }
    }
}

impl fmt::Display for TlvValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TlvValue::U8(v) | TlvValue::Command(v) => write!(f, "{}", v),
            TlvValue::U16(v) => write!(f, "{}", v),
            TlvValue::U32(v) => write!(f, "{}", v),
            TlvValue::U64(v) => write!(f, "{}", v),
            TlvValue::F32(v) => write!(f, "{:.3}", v),
            TlvValue::Str(s) => write!(f, "\"{}\"", s),
            TlvValue::Bool(v) => write!(f, "{}", v),
        }
    }
}

/// One decoded TLV field
#[derive(Debug, Clone, PartialEq)]
pub struct TlvField {
    pub id: u8,
    pub value: TlvValue,
}

/// Insertion-ordered `id -> value` map for one frame
///
/// Frames are tiny (a LoRa payload is at most 120 bytes) so a vector with
/// linear lookup keeps frame order without a second index.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TlvMap {
    fields: Vec<TlvField>,
}

impl TlvMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a value, replacing an existing id in place
    ///
    /// Returns the previous value when the id was already present.
    pub fn insert(&mut self, id: u8, value: TlvValue) -> Option<TlvValue> {
        match self.fields.iter_mut().find(|f| f.id == id) {
            Some(field) => Some(std::mem::replace(&mut field.value, value)),
            None => {
                self.fields.push(TlvField { id, value });
                None
            }
        }
    }

    pub fn get(&self, id: u8) -> Option<&TlvValue> {
        self.fields.iter().find(|f| f.id == id).map(|f| &f.value)
    }

    pub fn contains(&self, id: u8) -> bool {
        self.get(id).is_some()
    }

    pub fn remove(&mut self, id: u8) -> Option<TlvValue> {
        let pos = self.fields.iter().position(|f| f.id == id)?;
        Some(self.fields.remove(pos).value)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TlvField> {
        self.fields.iter()
    }

    /// Convenience accessor for integer fields
    pub fn get_u64(&self, id: u8) -> Option<u64> {
        self.get(id).and_then(TlvValue::as_u64)
    }
}

impl IntoIterator for TlvMap {
    type Item = TlvField;
    type IntoIter = std::vec::IntoIter<TlvField>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.into_iter()
    }
}

impl FromIterator<(u8, TlvValue)> for TlvMap {
    fn from_iter<I: IntoIterator<Item = (u8, TlvValue)>>(iter: I) -> Self {
        let mut map = TlvMap::new();
        for (id, value) in iter {
            map.insert(id, value);
        }
        map
    }
}

/// Canonical telemetry frame: ordered `name -> value` pairs
///
/// Every ingestion boundary (radio TLV telemetry, DATA rows from sockets)
/// produces one of these before anything reaches the signal store.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SignalFrame {
    values: Vec<(String, f64)>,
}

impl SignalFrame {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: impl Into<String>, value: f64) {
        self.values.push((name.into(), value));
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.values.iter().find(|(n, _)| n == name).map(|(_, v)| *v)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.values.iter().map(|(n, v)| (n.as_str(), *v))
    }
}

/// Derived device health
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DeviceStatus {
    Up,
    Degraded,
    Down,
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceStatus::Up => write!(f, "UP"),
            DeviceStatus::Degraded => write!(f, "DEGRADED"),
            DeviceStatus::Down => write!(f, "DOWN"),
        }
    }
}
