//! LAN discovery responder
//!
//! Devices broadcast `DISCOVER_SERVER` and learn the ground station's ports
//! from the `SERVER,<tcp_port>,<udp_port>` reply.

use super::SOCKET_POLL;
use crate::types::Result;
use std::io::ErrorKind;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub const DISCOVERY_REQUEST: &str = "DISCOVER_SERVER";

/// Reply text for the given service ports
pub fn discovery_reply(tcp_port: u16, udp_port: u16) -> String {
    format!("SERVER,{},{}", tcp_port, udp_port)
}

pub struct DiscoveryResponder {
    socket: UdpSocket,
    reply: String,
}

impl DiscoveryResponder {
    pub fn bind(addr: SocketAddr, tcp_port: u16, udp_port: u16) -> Result<Self> {
        let socket = UdpSocket::bind(addr)?;
        socket.set_read_timeout(Some(SOCKET_POLL))?;
        log::info!("Discovery responder on {}", socket.local_addr()?);
        Ok(Self {
            socket,
            reply: discovery_reply(tcp_port, udp_port),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub fn run(self, running: Arc<AtomicBool>) {
        let mut buffer = [0u8; 256];

        while running.load(Ordering::SeqCst) {
            let (len, src) = match self.socket.recv_from(&mut buffer) {
                Ok(result) => result,
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    continue
                }
                Err(e) => {
                    log::error!("Discovery recv error: {}", e);
                    continue;
                }
            };

            if String::from_utf8_lossy(&buffer[..len]).trim() != DISCOVERY_REQUEST {
                continue;
            }
            match self.socket.send_to(self.reply.as_bytes(), src) {
                Ok(_) => log::info!("[DISCOVERY] Replied to {} with {}", src, self.reply),
                Err(e) => log::warn!("[DISCOVERY] Reply to {} failed: {}", src, e),
            }
        }
        log::info!("Discovery responder stopped");
    }
}
