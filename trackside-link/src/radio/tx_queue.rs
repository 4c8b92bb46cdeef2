//! Half-duplex transmit queue
//!
//! The LoRa module can either listen or transmit, never both. Outgoing
//! frames wait here until the radio is idle and the channel has been quiet
//! for a short guard interval, then go out one at a time.
//!
//! Producers on any thread hold a cloneable [`TxQueueHandle`]. Only the radio
//! thread owns the [`TransmitQueue`] state machine and calls [`TransmitQueue::tick`].

use super::at::MAX_SEND_HEX_CHARS;
use crate::clock::SharedClock;
use crate::types::{LinkError, Result};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Time after a transmission before the radio is assumed idle again
pub const DEFAULT_TX_GUARD: Duration = Duration::from_millis(50);
/// Quiet time required after a receive before transmitting
pub const DEFAULT_RX_GUARD: Duration = Duration::from_millis(10);
/// How often the radio thread services the queue
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// One queued frame: raw bytes plus the upper-case hex sent on the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxEntry {
    pub payload: Vec<u8>,
    pub hex: String,
}

impl TxEntry {
    pub fn new(payload: Vec<u8>) -> Self {
        let hex = hex::encode_upper(&payload);
        Self { payload, hex }
    }
}

/// Producer side of the queue
#[derive(Debug, Clone, Default)]
pub struct TxQueueHandle {
    entries: Arc<Mutex<VecDeque<TxEntry>>>,
}

impl TxQueueHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a frame to the back of the queue
    ///
    /// Frames too large for a single `AT+SEND` are rejected here so they can
    /// never wedge the head of the queue.
    pub fn enqueue(&self, payload: Vec<u8>) -> Result<()> {
        let entry = TxEntry::new(payload);
        if entry.hex.len() > MAX_SEND_HEX_CHARS {
            return Err(LinkError::PayloadTooLarge(entry.hex.len(), MAX_SEND_HEX_CHARS));
        }
        log::trace!("Queued frame {}", entry.hex);
        self.lock().push_back(entry);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn pop_front(&self) -> Option<TxEntry> {
        self.lock().pop_front()
    }

    fn push_front(&self, entry: TxEntry) {
        self.lock().push_front(entry);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<TxEntry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Radio transmit state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    Idle,
    Busy,
}

/// What one call to [`TransmitQueue::tick`] did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// A frame was handed to the radio
    Sent,
    /// A receive happened within the RX guard
    Suppressed,
    /// The radio is still transmitting
    Busy,
    /// Nothing queued
    Empty,
    /// The send callback failed; the frame is back at the head
    Failed,
}

/// Guard intervals for the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxTiming {
    pub tx_guard: Duration,
    pub rx_guard: Duration,
}

impl Default for TxTiming {
    fn default() -> Self {
        Self {
            tx_guard: DEFAULT_TX_GUARD,
            rx_guard: DEFAULT_RX_GUARD,
        }
    }
}

/// Consumer side: the half-duplex state machine
pub struct TransmitQueue {
    handle: TxQueueHandle,
    clock: SharedClock,
    timing: TxTiming,
    state: TxState,
    last_tx: Option<Duration>,
    last_rx: Option<Duration>,
}

impl TransmitQueue {
    pub fn new(handle: TxQueueHandle, clock: SharedClock, timing: TxTiming) -> Self {
        Self {
            handle,
            clock,
            timing,
            state: TxState::Idle,
            last_tx: None,
            last_rx: None,
        }
    }

    pub fn handle(&self) -> &TxQueueHandle {
        &self.handle
    }

    pub fn state(&self) -> TxState {
        self.state
    }

    /// Service the queue once, sending at most one frame through `send`
    pub fn tick<F>(&mut self, send: F) -> TickOutcome
    where
        F: FnOnce(&TxEntry) -> Result<()>,
    {
        let now = self.clock.now();

        if self.state == TxState::Busy && self.elapsed_since(self.last_tx, now) > self.timing.tx_guard
        {
            log::trace!("TX guard elapsed, radio idle");
            self.state = TxState::Idle;
        }

        if let Some(last_rx) = self.last_rx {
            if now.saturating_sub(last_rx) < self.timing.rx_guard {
                return TickOutcome::Suppressed;
            }
        }

        if self.state == TxState::Busy {
            return TickOutcome::Busy;
        }

        let Some(entry) = self.handle.pop_front() else {
            return TickOutcome::Empty;
        };

        match send(&entry) {
            Ok(()) => {
                log::debug!("Sent {} byte frame", entry.payload.len());
                self.state = TxState::Busy;
                self.last_tx = Some(now);
                TickOutcome::Sent
            }
            Err(e) => {
                log::warn!("Radio send failed, frame kept at head: {}", e);
                self.handle.push_front(entry);
                TickOutcome::Failed
            }
        }
    }

    /// Record that a frame was just received
    pub fn note_rx(&mut self) {
        self.last_rx = Some(self.clock.now());
    }

    /// `+ERR=5`: the module is still transmitting
    pub fn radio_busy(&mut self) {
        log::debug!("Radio reported busy");
        self.state = TxState::Busy;
        self.last_tx = Some(self.clock.now());
    }

    /// Any other `+ERR`: the module gave up on the frame
    pub fn radio_error(&mut self, code: u8) {
        log::warn!("Radio error {}, clearing busy", code);
        self.state = TxState::Idle;
    }

    fn elapsed_since(&self, at: Option<Duration>, now: Duration) -> Duration {
        at.map(|t| now.saturating_sub(t)).unwrap_or(Duration::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn queue() -> (TransmitQueue, TxQueueHandle, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let handle = TxQueueHandle::new();
        let queue = TransmitQueue::new(handle.clone(), clock.clone(), TxTiming::default());
        (queue, handle, clock)
    }

    #[test]
    fn test_fifo_one_frame_per_guard_window() {
        let (mut queue, handle, clock) = queue();
        handle.enqueue(vec![1]).unwrap();
        handle.enqueue(vec![2]).unwrap();
        handle.enqueue(vec![3]).unwrap();

        let mut sent = Vec::new();
        let mut send = |e: &TxEntry| -> Result<()> {
            sent.push(e.payload[0]);
            Ok(())
        };

        assert_eq!(queue.tick(&mut send), TickOutcome::Sent);
        clock.advance(Duration::from_millis(20));
        assert_eq!(queue.tick(&mut send), TickOutcome::Busy);
        clock.advance(Duration::from_millis(31));
        assert_eq!(queue.tick(&mut send), TickOutcome::Sent);
        clock.advance(Duration::from_millis(51));
        assert_eq!(queue.tick(&mut send), TickOutcome::Sent);
        clock.advance(Duration::from_millis(51));
        assert_eq!(queue.tick(&mut send), TickOutcome::Empty);

        assert_eq!(sent, vec![1, 2, 3]);
        assert_eq!(queue.state(), TxState::Idle);
    }

    #[test]
    fn test_rx_guard_suppresses() {
        let (mut queue, handle, clock) = queue();
        handle.enqueue(vec![0xAA]).unwrap();
        clock.advance(Duration::from_secs(1));

        queue.note_rx();
        clock.advance(Duration::from_millis(5));
        assert_eq!(queue.tick(|_| Ok(())), TickOutcome::Suppressed);
        assert_eq!(handle.len(), 1);

        clock.advance(Duration::from_millis(6));
        assert_eq!(queue.tick(|_| Ok(())), TickOutcome::Sent);
        assert!(handle.is_empty());
    }

    #[test]
    fn test_radio_busy_extends_guard() {
        let (mut queue, handle, clock) = queue();
        handle.enqueue(vec![1]).unwrap();
        handle.enqueue(vec![2]).unwrap();
        assert_eq!(queue.tick(|_| Ok(())), TickOutcome::Sent);

        clock.advance(Duration::from_millis(40));
        queue.radio_busy();
        clock.advance(Duration::from_millis(40));
        assert_eq!(queue.tick(|_| Ok(())), TickOutcome::Busy);

        clock.advance(Duration::from_millis(11));
        assert_eq!(queue.tick(|_| Ok(())), TickOutcome::Sent);
    }

    #[test]
    fn test_radio_error_clears_busy() {
        let (mut queue, handle, _clock) = queue();
        handle.enqueue(vec![1]).unwrap();
        handle.enqueue(vec![2]).unwrap();
        assert_eq!(queue.tick(|_| Ok(())), TickOutcome::Sent);
        assert_eq!(queue.state(), TxState::Busy);

        queue.radio_error(4);
        assert_eq!(queue.state(), TxState::Idle);
        assert_eq!(queue.tick(|_| Ok(())), TickOutcome::Sent);
    }

    #[test]
    fn test_failed_send_requeues_at_head() {
        let (mut queue, handle, _clock) = queue();
        handle.enqueue(vec![1]).unwrap();
        handle.enqueue(vec![2]).unwrap();

        assert_eq!(queue.tick(|_| Err(LinkError::Closed)), TickOutcome::Failed);
        assert_eq!(queue.state(), TxState::Idle);

        let mut first = None;
        queue.tick(|e| {
            first = Some(e.payload.clone());
            Ok(())
        });
        assert_eq!(first, Some(vec![1]));
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let handle = TxQueueHandle::new();
        assert!(handle.enqueue(vec![0u8; 120]).is_ok());
        assert!(matches!(
            handle.enqueue(vec![0u8; 121]),
            Err(LinkError::PayloadTooLarge(242, 240))
        ));
        assert_eq!(handle.len(), 1);
    }

    #[test]
    fn test_entry_hex_is_upper_case() {
        assert_eq!(TxEntry::new(vec![0x01, 0xab]).hex, "01AB");
    }
}
