//! UDP listener for telemetry and heartbeat datagrams

use super::{LineHandler, LineOrigin, SOCKET_POLL};
use crate::types::Result;
use std::io::ErrorKind;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Largest datagram accepted from a device
const MAX_DATAGRAM_SIZE: usize = 1024;

/// Receive loop for line datagrams; one datagram may carry several lines
pub struct UdpListener {
    socket: UdpSocket,
}

impl UdpListener {
    pub fn bind(addr: SocketAddr) -> Result<Self> {
        let socket = UdpSocket::bind(addr)?;
        socket.set_read_timeout(Some(SOCKET_POLL))?;
        log::info!("UDP listener bound to {}", socket.local_addr()?);
        Ok(Self { socket })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Receive until `running` is cleared
    pub fn run(self, handler: Arc<dyn LineHandler>, running: Arc<AtomicBool>) {
        let mut buffer = [0u8; MAX_DATAGRAM_SIZE];

        while running.load(Ordering::SeqCst) {
            let (len, src) = match self.socket.recv_from(&mut buffer) {
                Ok(result) => result,
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    continue
                }
                Err(e) => {
                    log::error!("UDP recv error: {}", e);
                    continue;
                }
            };

            let text = String::from_utf8_lossy(&buffer[..len]);
            for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
                if let Err(e) = handler.handle_line(line, LineOrigin::Udp(src)) {
                    log::warn!("[UDP {}] {}", src, e);
                }
            }
        }
        log::info!("UDP listener stopped");
    }
}
