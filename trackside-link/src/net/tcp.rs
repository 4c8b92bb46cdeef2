//! TCP server for heartbeat and command connections

use super::{drain_lines, LineHandler, LineOrigin, SOCKET_POLL};
use crate::types::Result;
use std::io::{ErrorKind, Read};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Pause between accept polls when no connection is pending
const ACCEPT_IDLE: Duration = Duration::from_millis(10);

/// Non-blocking accept loop with one handler thread per connection
pub struct TcpServer {
    listener: TcpListener,
}

impl TcpServer {
    pub fn bind(addr: SocketAddr) -> Result<Self> {
        let listener = TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        log::info!("TCP server listening on {}", listener.local_addr()?);
        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until `running` is cleared
    ///
    /// Connection threads are joined before returning.
    pub fn run(self, handler: Arc<dyn LineHandler>, running: Arc<AtomicBool>) {
        let mut connections = Vec::new();

        while running.load(Ordering::SeqCst) {
            match self.listener.accept() {
                Ok((stream, addr)) => {
                    log::info!("TCP client connected: {}", addr);
                    let handler = Arc::clone(&handler);
                    let conn_running = Arc::clone(&running);
                    let spawned = thread::Builder::new()
                        .name(format!("tcp-{}", addr))
                        .spawn(move || serve_connection(stream, addr, handler, conn_running));
                    match spawned {
                        Ok(handle) => connections.push(handle),
                        Err(e) => log::error!("Failed to spawn handler for {}: {}", addr, e),
                    }
                }
                Err(ref e) if e.kind() == ErrorKind::WouldBlock => thread::sleep(ACCEPT_IDLE),
                Err(e) => {
                    log::error!("Accept error: {}", e);
                    thread::sleep(ACCEPT_IDLE);
                }
            }
            connections.retain(|h: &thread::JoinHandle<()>| !h.is_finished());
        }

        for handle in connections {
            let _ = handle.join();
        }
        log::info!("TCP server stopped");
    }
}

fn serve_connection(
    mut stream: TcpStream,
    addr: SocketAddr,
    handler: Arc<dyn LineHandler>,
    running: Arc<AtomicBool>,
) {
    let mut seen: Vec<String> = Vec::new();

    if let Err(e) = stream
        .set_nonblocking(false)
        .and_then(|_| stream.set_read_timeout(Some(SOCKET_POLL)))
    {
        log::error!("Cannot configure connection {}: {}", addr, e);
        return;
    }

    let mut buf = [0u8; 1024];
    let mut pending: Vec<u8> = Vec::new();

    let mut closed = false;

    while running.load(Ordering::SeqCst) && !closed {
        let mut lines = match stream.read(&mut buf) {
            Ok(0) => {
                log::info!("TCP client {} closed the connection", addr);
                closed = true;
                pending.push(b'\n');
                drain_lines(&mut pending)
            }
            Ok(n) => {
                pending.extend_from_slice(&buf[..n]);
                drain_lines(&mut pending)
            }
            Err(ref e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                // Quiet socket: treat an unterminated remainder as a whole line
                if pending.is_empty() {
                    continue;
                }
                pending.push(b'\n');
                drain_lines(&mut pending)
            }
            Err(e) => {
                log::warn!("TCP connection error with {}: {}", addr, e);
                break;
            }
        };

        for line in lines.drain(..) {
            match handler.handle_line(&line, LineOrigin::Tcp(addr)) {
                Ok(device_id) => {
                    if !seen.contains(&device_id) {
                        seen.push(device_id);
                    }
                }
                Err(e) => log::warn!("[TCP {}] {}", addr, e),
            }
        }
    }

    handler.connection_closed(&seen);
}
