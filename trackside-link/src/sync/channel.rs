use super::SyncTransport;
use crate::types::{LinkError, Result};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

/// In-process link between two sync endpoints
///
/// Used to simulate a device talking to the ground station. Each end can
/// delay its outgoing frames and drop a fixed fraction of them.
#[derive(Debug)]
pub struct ChannelTransport {
    tx: Sender<Vec<u8>>,
    rx: Receiver<Vec<u8>>,
    latency: Duration,
    drop_every: Option<usize>,
    sent: AtomicUsize,
}

impl ChannelTransport {
    /// Two connected endpoints
    pub fn pair() -> (Self, Self) {
        let (a_tx, b_rx) = unbounded();
        let (b_tx, a_rx) = unbounded();
        (Self::new(a_tx, a_rx), Self::new(b_tx, b_rx))
    }

    fn new(tx: Sender<Vec<u8>>, rx: Receiver<Vec<u8>>) -> Self {
        Self {
            tx,
            rx,
            latency: Duration::ZERO,
            drop_every: None,
            sent: AtomicUsize::new(0),
        }
    }

    /// Sleep this long before each outgoing frame
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Silently drop every `n`th outgoing frame (`1` drops everything)
    pub fn with_drop_every(mut self, n: usize) -> Self {
        self.drop_every = (n > 0).then_some(n);
        self
    }
}

impl SyncTransport for ChannelTransport {
    fn send(&self, frame: &[u8]) -> Result<()> {
        let count = self.sent.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(n) = self.drop_every {
            if count % n == 0 {
                log::trace!("Simulated loss of frame {}", count);
                return Ok(());
            }
        }
        if !self.latency.is_zero() {
            thread::sleep(self.latency);
        }
        self.tx.send(frame.to_vec()).map_err(|_| LinkError::Closed)
    }

    fn recv(&self, timeout: Duration) -> Result<Option<Vec<u8>>> {
        match self.rx.recv_timeout(timeout) {
            Ok(frame) => Ok(Some(frame)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(LinkError::Closed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{ManualClock, SharedClock};
    use crate::sync::{SyncClient, SyncResponse, SyncServer};
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;

    fn spawn_server(
        transport: ChannelTransport,
        clock: SharedClock,
    ) -> (Arc<AtomicBool>, thread::JoinHandle<usize>) {
        let running = Arc::new(AtomicBool::new(true));
        let flag = running.clone();
        let handle = thread::spawn(move || {
            let server = SyncServer::new(transport, clock);
            server.serve(&flag, Duration::from_millis(10)).unwrap_or(0)
        });
        (running, handle)
    }

    #[test]
    fn test_client_recovers_server_offset() {
        let (client_end, server_end) = ChannelTransport::pair();

        let server_clock = Arc::new(ManualClock::new());
        server_clock.set(Duration::from_secs(5));
        let client_clock = Arc::new(ManualClock::new());
        client_clock.set(Duration::from_secs(1));

        let (running, server) = spawn_server(server_end, server_clock);
        let mut client = SyncClient::new(client_end, client_clock);
        let estimate = client.sync(5, Duration::from_millis(500)).unwrap();

        running.store(false, Ordering::SeqCst);
        assert_eq!(server.join().unwrap(), 5);

        assert_eq!(estimate.attempts, 5);
        assert_eq!(estimate.samples.len(), 5);
        assert_eq!(estimate.offset_us, Some(4_000_000));
        assert_eq!(estimate.delay_us, Some(0));
    }

    #[test]
    fn test_dropped_requests_contribute_no_sample() {
        let (client_end, server_end) = ChannelTransport::pair();
        let client_end = client_end.with_drop_every(2);

        let clock: SharedClock = Arc::new(ManualClock::new());
        let (running, server) = spawn_server(server_end, clock.clone());
        let mut client = SyncClient::new(client_end, clock);
        let estimate = client.sync(4, Duration::from_millis(100)).unwrap();

        running.store(false, Ordering::SeqCst);
        server.join().unwrap();

        assert_eq!(estimate.attempts, 4);
        assert_eq!(estimate.samples.len(), 2);
        assert!(estimate.is_valid());
    }

    #[test]
    fn test_all_lost_gives_no_estimate() {
        let (client_end, _server_end) = ChannelTransport::pair();
        let client_end = client_end.with_drop_every(1);
        let mut client = SyncClient::new(client_end, Arc::new(ManualClock::new()));

        let estimate = client.sync(3, Duration::from_millis(20)).unwrap();
        assert_eq!(estimate.offset_us, None);
        assert_eq!(estimate.delay_us, None);
        assert_eq!(estimate.attempts, 3);
    }

    #[test]
    fn test_stale_response_is_discarded() {
        let (client_end, server_end) = ChannelTransport::pair();
        let clock = Arc::new(ManualClock::new());

        // Leftover answer to a request this client never sent
        let stale = SyncResponse {
            request_id: 999,
            t1: 0,
            t2: 50_000_000,
            t3: 50_000_000,
        };
        server_end.send(&stale.encode()).unwrap();

        let (running, server) = spawn_server(server_end, clock.clone());
        let mut client = SyncClient::new(client_end, clock);
        let sample = client.exchange_once(Duration::from_millis(500)).unwrap();

        running.store(false, Ordering::SeqCst);
        server.join().unwrap();

        // Matching the stale frame would have produced a 50 s offset
        assert_eq!(sample.unwrap().offset_us, 0);
    }

    #[test]
    fn test_disconnected_peer_is_closed() {
        let (a, b) = ChannelTransport::pair();
        drop(b);
        assert!(matches!(
            a.recv(Duration::from_millis(1)),
            Err(LinkError::Closed)
        ));
    }
}
