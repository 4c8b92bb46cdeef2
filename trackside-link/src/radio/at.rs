//! AT command lines spoken by the LoRa module
//!
//! Outbound: `AT+SEND=<addr>,<len>,<hex>` plus the setup commands.
//! Inbound: `+RCV=<addr>,<len>,<hex>,<rssi>,<snr>`, `+OK` and `+ERR=<code>`.

use crate::config::RadioConfig;
use crate::types::{LinkError, Result};

/// Largest payload the module accepts in one `AT+SEND`, in hex characters
pub const MAX_SEND_HEX_CHARS: usize = 240;

/// `+ERR` code meaning the module is still transmitting
pub const ERR_BUSY: u8 = 5;

/// A frame received over the air
#[derive(Debug, Clone, PartialEq)]
pub struct RadioPacket {
    /// Sender's radio address
    pub address: u16,
    /// Payload hex as reported by the module
    pub payload_hex: String,
    pub rssi: f64,
    pub snr: f64,
}

/// One line from the module
#[derive(Debug, Clone, PartialEq)]
pub enum AtResponse {
    Received(RadioPacket),
    Ok,
    Error(u8),
    /// Anything else: echoes, version banners, partial garbage
    Other(String),
}

/// Classify one line from the module
pub fn parse_line(line: &str) -> AtResponse {
    let line = line.trim();

    if line == "+OK" {
        return AtResponse::Ok;
    }
    if let Some(code) = line.strip_prefix("+ERR=") {
        return match code.trim().parse() {
            Ok(code) => AtResponse::Error(code),
            Err(_) => AtResponse::Other(line.to_string()),
        };
    }
    if line.starts_with("+RCV=") {
        return match parse_rcv(line) {
            Some(packet) => AtResponse::Received(packet),
            None => {
                log::debug!("Malformed receive line: {}", line);
                AtResponse::Other(line.to_string())
            }
        };
    }
    AtResponse::Other(line.to_string())
}

fn parse_rcv(line: &str) -> Option<RadioPacket> {
    let parts: Vec<&str> = line.strip_prefix("+RCV=")?.split(',').collect();
    if parts.len() < 5 {
        return None;
    }

    Some(RadioPacket {
        address: parts[0].trim().parse().ok()?,
        payload_hex: parts[2].trim().to_string(),
        rssi: parts[3].trim().parse().ok()?,
        snr: parts[4].trim().parse().ok()?,
    })
}

/// Render an `AT+SEND` command for `payload`
pub fn send_command(address: u16, payload: &[u8]) -> Result<String> {
    send_hex_command(address, &hex::encode_upper(payload))
}

/// Render an `AT+SEND` command for already hex-encoded data
pub fn send_hex_command(address: u16, hex: &str) -> Result<String> {
    if hex.len() > MAX_SEND_HEX_CHARS {
        return Err(LinkError::PayloadTooLarge(hex.len(), MAX_SEND_HEX_CHARS));
    }
    Ok(format!("AT+SEND={},{},{}", address, hex.len(), hex))
}

/// Setup sequence sent after opening the port
pub fn init_commands(config: &RadioConfig) -> Vec<String> {
    vec![
        "AT".to_string(),
        format!("AT+ADDRESS={}", config.address),
        format!("AT+NETWORKID={}", config.network_id),
        format!("AT+BAND={}", config.band),
        format!(
            "AT+PARAMETER={},{},{},{}",
            config.spreading_factor, config.bandwidth, config.coding_rate, config.preamble
        ),
    ]
}
