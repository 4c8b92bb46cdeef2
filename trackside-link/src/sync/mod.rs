//! NTP-style clock synchronisation
//!
//! Four timestamps per exchange, all in microseconds:
//!
//! ```text
//! t1  client sends request      (client clock)
//! t2  server receives request   (server clock)
//! t3  server sends response     (server clock)
//! t4  client receives response  (client clock)
//!
//! offset = ((t2 - t1) + (t3 - t4)) / 2
//! delay  = (t4 - t1) - (t3 - t2)
//! ```
//!
//! The server side runs on the ground station ([`SyncResponder`] on the radio
//! path, [`SyncServer`] over any [`SyncTransport`]). [`SyncClient`] is the
//! device side, used for simulation and peer testing.

mod channel;
mod client;
mod server;

pub use channel::ChannelTransport;
pub use client::{SyncClient, SyncEstimate};
pub use server::{SyncResponder, SyncServer};

use crate::codec::FrameBuilder;
use crate::protocol::{Command, FIELD_COMMAND, FIELD_REQUEST_ID, FIELD_T1, FIELD_T2, FIELD_T3};
use crate::types::{Result, TlvMap};
use std::time::Duration;

/// Point-to-point frame transport used by the sync roles
pub trait SyncTransport: Send {
    fn send(&self, frame: &[u8]) -> Result<()>;

    /// Wait up to `timeout` for a frame; `Ok(None)` on timeout
    fn recv(&self, timeout: Duration) -> Result<Option<Vec<u8>>>;
}

/// Result of one completed exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncSample {
    /// Server clock minus client clock
    pub offset_us: i64,
    /// Round-trip network delay excluding server processing
    pub delay_us: i64,
}

/// Offset and delay for one exchange; division rounds toward negative infinity
///
/// Timestamps come off the wire, so the sums are taken in `i128`. `None` when
/// either result does not fit an `i64`.
pub fn compute_offset_delay(t1: u64, t2: u64, t3: u64, t4: u64) -> Option<SyncSample> {
    let (t1, t2, t3, t4) = (t1 as i128, t2 as i128, t3 as i128, t4 as i128);
    let offset = ((t2 - t1) + (t3 - t4)).div_euclid(2);
    let delay = (t4 - t1) - (t3 - t2);
    Some(SyncSample {
        offset_us: i64::try_from(offset).ok()?,
        delay_us: i64::try_from(delay).ok()?,
    })
}

/// Sync request fields
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncRequest {
    pub request_id: u16,
    pub t1: u64,
}

impl SyncRequest {
    pub fn from_fields(fields: &TlvMap) -> Option<Self> {
        if fields.get_u64(FIELD_COMMAND) != Some(Command::SyncReq.as_byte() as u64) {
            return None;
        }
        Some(Self {
            request_id: u16::try_from(fields.get_u64(FIELD_REQUEST_ID).unwrap_or(0)).ok()?,
            t1: fields.get_u64(FIELD_T1).unwrap_or(0),
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        FrameBuilder::new()
            .command(FIELD_COMMAND, Command::SyncReq.as_byte())
            .u16(FIELD_REQUEST_ID, self.request_id)
            .u64(FIELD_T1, self.t1)
            .build()
    }
}

/// Sync response fields
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncResponse {
    pub request_id: u16,
    pub t1: u64,
    pub t2: u64,
    pub t3: u64,
}

impl SyncResponse {
    pub fn from_fields(fields: &TlvMap) -> Option<Self> {
        if fields.get_u64(FIELD_COMMAND) != Some(Command::SyncResp.as_byte() as u64) {
            return None;
        }
        Some(Self {
            request_id: u16::try_from(fields.get_u64(FIELD_REQUEST_ID)?).ok()?,
            t1: fields.get_u64(FIELD_T1)?,
            t2: fields.get_u64(FIELD_T2)?,
            t3: fields.get_u64(FIELD_T3)?,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        FrameBuilder::new()
            .command(FIELD_COMMAND, Command::SyncResp.as_byte())
            .u16(FIELD_REQUEST_ID, self.request_id)
            .u64(FIELD_T1, self.t1)
            .u64(FIELD_T2, self.t2)
            .u64(FIELD_T3, self.t3)
            .build()
    }

    /// Complete the exchange with the client's receive time
    pub fn sample(&self, t4: u64) -> Option<SyncSample> {
        compute_offset_delay(self.t1, self.t2, self.t3, t4)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::decode;

    #[test]
    fn test_offset_delay_literal() {
        let sample = compute_offset_delay(0, 1000, 1200, 2500).unwrap();
        assert_eq!(sample.offset_us, -150);
        assert_eq!(sample.delay_us, 2300);
    }

    #[test]
    fn test_offset_delay_large_timestamps() {
        let sample = compute_offset_delay(1000, 1 << 63, 1 << 63, 2000).unwrap();
        assert_eq!(sample.offset_us, i64::MAX - 1499);
        assert_eq!(sample.delay_us, 1000);

        assert_eq!(compute_offset_delay(0, u64::MAX, u64::MAX, 0), None);
        assert_eq!(compute_offset_delay(u64::MAX, 0, 0, 0), None);
    }

    #[test]
    fn test_offset_floors_odd_sums() {
        // (1 + -4) / 2 = -1.5 -> -2
        let sample = compute_offset_delay(10, 11, 12, 16).unwrap();
        assert_eq!(sample.offset_us, -2);
        // (3 + 0) / 2 = 1.5 -> 1
        let sample = compute_offset_delay(0, 3, 3, 3).unwrap();
        assert_eq!(sample.offset_us, 1);
    }

    #[test]
    fn test_response_frame_layout() {
        let response = SyncResponse {
            request_id: 7,
            t1: 1,
            t2: 2,
            t3: 3,
        };
        let outcome = decode(&response.encode());
        assert!(outcome.is_clean());
        assert_eq!(SyncResponse::from_fields(&outcome.fields), Some(response));
        assert_eq!(SyncRequest::from_fields(&outcome.fields), None);
    }

    #[test]
    fn test_request_defaults_missing_fields_to_zero() {
        let frame = FrameBuilder::new()
            .command(FIELD_COMMAND, Command::SyncReq.as_byte())
            .build();
        let request = SyncRequest::from_fields(&decode(&frame).fields).unwrap();
        assert_eq!(request, SyncRequest { request_id: 0, t1: 0 });
    }
}
