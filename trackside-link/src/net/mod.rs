//! Socket adapters for TCP and UDP devices
//!
//! Each adapter owns its socket, polls it with a bounded timeout and hands
//! every received line to a [`LineHandler`]. The adapters know nothing about
//! what a line means.

pub mod discovery;
pub mod line;
pub mod tcp;
pub mod trigger;
pub mod udp;

pub use discovery::DiscoveryResponder;
pub use line::{LineChannel, LinePacket};
pub use tcp::TcpServer;
pub use trigger::{parse_trigger, GateTrigger};
pub use udp::UdpListener;

use crate::types::Result;
use std::net::SocketAddr;

/// Read timeout used by every socket loop
pub const SOCKET_POLL: std::time::Duration = std::time::Duration::from_millis(200);

/// Transport a line arrived on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineOrigin {
    Tcp(SocketAddr),
    Udp(SocketAddr),
}

impl LineOrigin {
    pub fn peer(&self) -> SocketAddr {
        match self {
            LineOrigin::Tcp(addr) | LineOrigin::Udp(addr) => *addr,
        }
    }
}

/// Consumer of lines received by the socket adapters
pub trait LineHandler: Send + Sync {
    /// Process one line, returning the id of the device that sent it
    fn handle_line(&self, line: &str, origin: LineOrigin) -> Result<String>;

    /// A TCP connection closed; `device_ids` were seen on it
    fn connection_closed(&self, device_ids: &[String]);
}

/// Split buffered bytes into complete lines, leaving any remainder
pub(crate) fn drain_lines(buffer: &mut Vec<u8>) -> Vec<String> {
    let mut lines = Vec::new();
    while let Some(pos) = buffer.iter().position(|&b| b == b'\n') {
        let raw: Vec<u8> = buffer.drain(..=pos).collect();
        let line = String::from_utf8_lossy(&raw).trim().to_string();
        if !line.is_empty() {
            lines.push(line);
        }
    }
    lines
}
