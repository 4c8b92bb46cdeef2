//! Radio worker: owns the serial handle to the LoRa module
//!
//! The link is the only code that touches the port. Every other thread talks
//! to the radio through the [`TxQueueHandle`] and hears from it through a
//! [`PacketSink`].

use super::at::{self, AtResponse, RadioPacket, ERR_BUSY};
use super::tx_queue::{TransmitQueue, TxQueueHandle};
use crate::clock::SharedClock;
use crate::codec::FrameBuilder;
use crate::config::RadioConfig;
use crate::protocol::{Command, FIELD_COMMAND};
use crate::transport::Transport;
use crate::types::{LinkError, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// Longest line kept while waiting for a terminator
const MAX_LINE_LEN: usize = 1024;

/// Receiver of radio traffic and link lifecycle events
pub trait PacketSink: Send + Sync {
    fn on_packet(&self, packet: RadioPacket);

    /// The module finished initialisation
    fn on_connect(&self) {}

    /// The serial link failed or was closed
    fn on_disconnect(&self) {}
}

/// One open connection to the LoRa module
pub struct RadioLink<T: Transport> {
    transport: T,
    config: RadioConfig,
    queue: TransmitQueue,
    line_buf: String,
}

impl<T: Transport> RadioLink<T> {
    pub fn new(transport: T, config: RadioConfig, tx: TxQueueHandle, clock: SharedClock) -> Self {
        let queue = TransmitQueue::new(tx, clock, config.tx_timing());
        Self {
            transport,
            config,
            queue,
            line_buf: String::new(),
        }
    }

    /// Send the setup sequence, waiting for `+OK` after each command
    ///
    /// On success a `NAME_SYNC_REQ` is queued so the device re-announces its
    /// signal names.
    pub fn initialize(&mut self) -> Result<()> {
        for command in at::init_commands(&self.config) {
            log::debug!("Radio init: {}", command);
            self.transport.write_line(&command)?;
            self.wait_for_ok(&command)?;
        }

        let request = FrameBuilder::new()
            .command(FIELD_COMMAND, Command::NameSyncReq.as_byte())
            .build();
        self.queue.handle().enqueue(request)?;

        log::info!(
            "Radio initialised: address {} network {} band {}",
            self.config.address,
            self.config.network_id,
            self.config.band
        );
        Ok(())
    }

    fn wait_for_ok(&mut self, command: &str) -> Result<()> {
        let deadline = Instant::now() + self.config.init_timeout();
        let mut buf = [0u8; 256];

        while Instant::now() < deadline {
            let n = self.transport.read(&mut buf)?;
            if n == 0 {
                continue;
            }
            for line in self.push_bytes(&buf[..n]) {
                match at::parse_line(&line) {
                    AtResponse::Ok => return Ok(()),
                    AtResponse::Error(code) => {
                        log::warn!("Radio rejected '{}' with +ERR={}", command, code);
                        return Err(LinkError::Radio(code));
                    }
                    other => log::debug!("Ignoring during init: {:?}", other),
                }
            }
        }

        Err(LinkError::Timeout(format!("+OK after '{}'", command)))
    }

    /// Service the queue and the port until `running` is cleared
    ///
    /// Returns an error when the transport fails; the caller decides whether
    /// to reconnect.
    pub fn run(&mut self, running: &AtomicBool, sink: &dyn PacketSink) -> Result<()> {
        let mut buf = [0u8; 512];
        while running.load(Ordering::SeqCst) {
            self.poll_once(&mut buf, sink)?;
        }

        log::debug!("Radio link stopping");
        Ok(())
    }

    /// One pass of the worker loop: offer the queue one send, then read once
    fn poll_once(&mut self, buf: &mut [u8], sink: &dyn PacketSink) -> Result<()> {
        let peer = self.config.peer_address;
        let transport = &mut self.transport;
        self.queue.tick(|entry| {
            let command = at::send_hex_command(peer, &entry.hex)?;
            log::trace!(">> {}", command);
            transport.write_line(&command)
        });

        let n = self.transport.read(buf)?;
        if n > 0 {
            for line in self.push_bytes(&buf[..n]) {
                self.handle_line(&line, sink);
            }
        }
        Ok(())
    }

    fn handle_line(&mut self, line: &str, sink: &dyn PacketSink) {
        log::trace!("<< {}", line);
        match at::parse_line(line) {
            AtResponse::Received(packet) => {
                self.queue.note_rx();
                sink.on_packet(packet);
            }
            AtResponse::Error(ERR_BUSY) => self.queue.radio_busy(),
            AtResponse::Error(code) => self.queue.radio_error(code),
            AtResponse::Ok => {}
            AtResponse::Other(text) => {
                if !text.is_empty() {
                    log::debug!("Unrecognised radio line: {}", text);
                }
            }
        }
    }

    /// Append raw bytes and return every completed line
    fn push_bytes(&mut self, bytes: &[u8]) -> Vec<String> {
        self.line_buf.push_str(&String::from_utf8_lossy(bytes));

        // A new +RCV means anything before it was an unterminated fragment
        if let Some(pos) = self.line_buf.rfind("+RCV") {
            if pos > 0 && !self.line_buf[..pos].contains('\n') {
                log::debug!("Discarding fragment: {:?}", &self.line_buf[..pos]);
                self.line_buf.drain(..pos);
            }
        }

        let mut lines = Vec::new();
        while let Some(pos) = self.line_buf.find('\n') {
            let line: String = self.line_buf.drain(..=pos).collect();
            let line = line.trim();
            if !line.is_empty() {
                lines.push(line.to_string());
            }
        }

        if self.line_buf.len() > MAX_LINE_LEN {
            log::warn!("Dropping {} bytes without line terminator", self.line_buf.len());
            self.line_buf.clear();
        }
        lines
    }
}

/// Keep a radio link alive until shutdown
///
/// `open` is called for every connection attempt. Open, initialisation and
/// transport failures are logged and retried after `reconnect_delay`.
pub fn run_supervised<T, F>(
    mut open: F,
    config: &RadioConfig,
    tx: TxQueueHandle,
    clock: SharedClock,
    running: &AtomicBool,
    sink: &dyn PacketSink,
) where
    T: Transport,
    F: FnMut() -> Result<T>,
{
    while running.load(Ordering::SeqCst) {
        match open() {
            Ok(transport) => {
                let mut link = RadioLink::new(transport, config.clone(), tx.clone(), clock.clone());
                match link.initialize() {
                    Ok(()) => {
                        sink.on_connect();
                        let result = link.run(running, sink);
                        sink.on_disconnect();
                        match result {
                            Ok(()) => break,
                            Err(e) => log::warn!("Radio link lost: {}", e),
                        }
                    }
                    Err(e) => log::warn!("Radio initialisation failed: {}", e),
                }
            }
            Err(e) => log::warn!("Cannot open radio: {}", e),
        }

        sleep_while_running(config.reconnect_delay(), running);
    }
    log::info!("Radio worker stopped");
}

fn sleep_while_running(total: Duration, running: &AtomicBool) {
    let step = Duration::from_millis(50);
    let deadline = Instant::now() + total;
    while running.load(Ordering::SeqCst) {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        thread::sleep(remaining.min(step));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{ManualClock, MonotonicClock};
    use crate::radio::TxState;
    use crate::transport::MockTransport;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Recorder {
        packets: Mutex<Vec<RadioPacket>>,
    }

    impl PacketSink for Recorder {
        fn on_packet(&self, packet: RadioPacket) {
            self.packets.lock().unwrap().push(packet);
        }
    }

    fn send_count(mock: &MockTransport) -> usize {
        mock.written_lines()
            .iter()
            .filter(|line| line.starts_with("AT+SEND="))
            .count()
    }

    fn link(mock: &MockTransport) -> RadioLink<MockTransport> {
        let config = RadioConfig {
            init_timeout_ms: 100,
            ..RadioConfig::default()
        };
        RadioLink::new(mock.clone(), config, TxQueueHandle::new(), MonotonicClock::shared())
    }

    #[test]
    fn test_initialize_sends_setup_and_name_request() {
        let mock = MockTransport::new().with_auto_ok();
        let mut link = link(&mock);
        link.initialize().unwrap();

        let lines = mock.written_lines();
        assert_eq!(lines.len(), 5);
        assert_eq!(lines[4], "AT+PARAMETER=7,9,1,8");
        assert_eq!(link.queue.handle().len(), 1);
    }

    #[test]
    fn test_initialize_fails_on_error() {
        let mock = MockTransport::new();
        mock.inject_line("+ERR=2");
        let mut link = link(&mock);
        assert!(matches!(link.initialize(), Err(LinkError::Radio(2))));
    }

    #[test]
    fn test_initialize_times_out() {
        let mock = MockTransport::new();
        let mut link = link(&mock);
        assert!(matches!(link.initialize(), Err(LinkError::Timeout(_))));
    }

    #[test]
    fn test_module_replies_drive_the_transmit_queue() {
        let mock = MockTransport::new();
        let clock = Arc::new(ManualClock::new());
        clock.set(Duration::from_secs(1));
        let tx = TxQueueHandle::new();
        let mut link = RadioLink::new(
            mock.clone(),
            RadioConfig::default(),
            tx.clone(),
            clock.clone(),
        );
        let sink = Recorder::default();
        let mut buf = [0u8; 256];

        tx.enqueue(vec![0x01]).unwrap();
        tx.enqueue(vec![0x02]).unwrap();
        link.poll_once(&mut buf, &sink).unwrap();
        assert_eq!(send_count(&mock), 1);

        // +ERR=5 restarts the TX guard, so the original 50 ms window no longer frees it
        clock.advance(Duration::from_millis(40));
        mock.inject_line("+ERR=5");
        link.poll_once(&mut buf, &sink).unwrap();
        clock.advance(Duration::from_millis(30));
        link.poll_once(&mut buf, &sink).unwrap();
        assert_eq!(link.queue.state(), TxState::Busy);
        assert_eq!(send_count(&mock), 1);

        // Any other error releases the radio at once
        mock.inject_line("+ERR=1");
        link.poll_once(&mut buf, &sink).unwrap();
        assert_eq!(link.queue.state(), TxState::Idle);
        link.poll_once(&mut buf, &sink).unwrap();
        assert_eq!(send_count(&mock), 2);
        assert!(mock.written_lines()[1].ends_with(",02"));

        // A receive split across two reads reaches the sink and opens the RX guard
        clock.advance(Duration::from_millis(60));
        mock.inject_read(b"+RCV=2,4,0A0B");
        link.poll_once(&mut buf, &sink).unwrap();
        assert!(sink.packets.lock().unwrap().is_empty());
        mock.inject_read(b",-50,7\r\n");
        link.poll_once(&mut buf, &sink).unwrap();
        {
            let packets = sink.packets.lock().unwrap();
            assert_eq!(packets.len(), 1);
            assert_eq!(packets[0].address, 2);
            assert_eq!(packets[0].payload_hex, "0A0B");
        }

        tx.enqueue(vec![0x03]).unwrap();
        link.poll_once(&mut buf, &sink).unwrap();
        assert_eq!(send_count(&mock), 2);
        clock.advance(Duration::from_millis(10));
        link.poll_once(&mut buf, &sink).unwrap();
        assert_eq!(send_count(&mock), 3);
    }

    #[test]
    fn test_push_bytes_splits_and_resyncs() {
        let mock = MockTransport::new();
        let mut link = link(&mock);

        assert!(link.push_bytes(b"+RCV=1,4,01").is_empty());
        let lines = link.push_bytes(b"+RCV=1,6,010101,-40,8\r\n+OK\r\n");
        assert_eq!(lines, vec!["+RCV=1,6,010101,-40,8", "+OK"]);
    }
}
