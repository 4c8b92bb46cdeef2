//! Command and field-id constants shared by both ends of the radio link

use std::fmt;

/// Field id that carries the command enum in control frames
pub const FIELD_COMMAND: u8 = 0x01;

/// Sync exchange fields
pub const FIELD_REQUEST_ID: u8 = 0x02;
pub const FIELD_T1: u8 = 0x03;
pub const FIELD_T2: u8 = 0x04;
pub const FIELD_T3: u8 = 0x05;

/// Commands carried in field [`FIELD_COMMAND`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Command {
    /// Device asks for the ground station's clock
    SyncReq = 0x01,
    /// Ground station answers a sync request
    SyncResp = 0x02,
    /// Ask the device to re-announce its signal names
    NameSyncReq = 0x03,
    /// Device acknowledges a configuration change
    ConfigResp = 0x04,
}

impl Command {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(Command::SyncReq),
            0x02 => Some(Command::SyncResp),
            0x03 => Some(Command::NameSyncReq),
            0x04 => Some(Command::ConfigResp),
            _ => None,
        }
    }

    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Command::SyncReq => "SYNC_REQ",
            Command::SyncResp => "SYNC_RESP",
            Command::NameSyncReq => "NAME_SYNC_REQ",
            Command::ConfigResp => "CONFIG_RESP",
        };
        f.write_str(name)
    }
}
