//! Comma-separated line protocol used by socket devices
//!
//! ```text
//! HB,<device_id>
//! DATA,<device_id>,<v1>,<v2>,...
//! CMD,<device_id>,<COMMAND>[,args...]
//! ```

use crate::types::{LinkError, Result};
use std::fmt;
use std::str::FromStr;

/// Line channel tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LineChannel {
    Heartbeat,
    Data,
    Command,
}

impl FromStr for LineChannel {
    type Err = LinkError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "HB" => Ok(LineChannel::Heartbeat),
            "DATA" => Ok(LineChannel::Data),
            "CMD" => Ok(LineChannel::Command),
            other => Err(LinkError::MalformedLine(format!("unknown channel {:?}", other))),
        }
    }
}

impl fmt::Display for LineChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LineChannel::Heartbeat => write!(f, "HB"),
            LineChannel::Data => write!(f, "DATA"),
            LineChannel::Command => write!(f, "CMD"),
        }
    }
}

/// One parsed line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinePacket {
    pub channel: LineChannel,
    pub device_id: String,
    pub payload: Vec<String>,
}

impl LinePacket {
    pub fn parse(line: &str) -> Result<Self> {
        let line = line.trim();
        let mut parts = line.split(',').map(str::trim);

        let (Some(channel), Some(device_id)) = (parts.next(), parts.next()) else {
            return Err(LinkError::MalformedLine(format!(
                "expected channel and device id: {:?}",
                line
            )));
        };
        if device_id.is_empty() {
            return Err(LinkError::MalformedLine(format!("empty device id: {:?}", line)));
        }

        Ok(Self {
            channel: channel.parse()?,
            device_id: device_id.to_string(),
            payload: parts.map(str::to_string).collect(),
        })
    }

    /// Payload fields as string slices
    pub fn payload_str(&self) -> Vec<&str> {
        self.payload.iter().map(String::as_str).collect()
    }
}
