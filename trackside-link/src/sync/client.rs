use super::{SyncRequest, SyncResponse, SyncSample, SyncTransport};
use crate::clock::SharedClock;
use crate::codec;
use crate::types::Result;
use std::thread;
use std::time::{Duration, Instant};

/// Pause between exchanges so requests do not queue up behind each other
const EXCHANGE_SPACING: Duration = Duration::from_millis(10);

/// Outcome of a multi-exchange sync
#[derive(Debug, Clone, PartialEq)]
pub struct SyncEstimate {
    /// Median offset of the valid samples, `None` if every exchange failed
    pub offset_us: Option<i64>,
    /// Median delay of the valid samples
    pub delay_us: Option<i64>,
    /// Valid samples in exchange order
    pub samples: Vec<SyncSample>,
    /// Exchanges attempted
    pub attempts: usize,
}

impl SyncEstimate {
    fn from_samples(samples: Vec<SyncSample>, attempts: usize) -> Self {
        let offsets: Vec<i64> = samples.iter().map(|s| s.offset_us).collect();
        let delays: Vec<i64> = samples.iter().map(|s| s.delay_us).collect();
        Self {
            offset_us: median(offsets),
            delay_us: median(delays),
            samples,
            attempts,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.offset_us.is_some()
    }
}

/// Median; even counts average the two middle values, rounding down
fn median(mut values: Vec<i64>) -> Option<i64> {
    if values.is_empty() {
        return None;
    }
    values.sort_unstable();
    let mid = values.len() / 2;
    if values.len() % 2 == 1 {
        Some(values[mid])
    } else {
        let sum = i128::from(values[mid - 1]) + i128::from(values[mid]);
        i64::try_from(sum.div_euclid(2)).ok()
    }
}

/// Device-side sync client
pub struct SyncClient<T: SyncTransport> {
    transport: T,
    clock: SharedClock,
    next_id: u16,
}

impl<T: SyncTransport> SyncClient<T> {
    pub fn new(transport: T, clock: SharedClock) -> Self {
        Self {
            transport,
            clock,
            next_id: 1,
        }
    }

    /// One request/response exchange
    ///
    /// `Ok(None)` when no matching response arrived within `timeout`.
    /// Responses carrying other request ids are discarded.
    pub fn exchange_once(&mut self, timeout: Duration) -> Result<Option<SyncSample>> {
        let request_id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);

        let t1 = self.clock.now_micros();
        self.transport.send(&SyncRequest { request_id, t1 }.encode())?;

        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                log::debug!("Sync request {} timed out", request_id);
                return Ok(None);
            }

            let Some(frame) = self.transport.recv(remaining)? else {
                log::debug!("Sync request {} timed out", request_id);
                return Ok(None);
            };
            let t4 = self.clock.now_micros();

            let outcome = codec::decode(&frame);
            match SyncResponse::from_fields(&outcome.fields) {
                Some(response) if response.request_id == request_id => {
                    let Some(sample) = response.sample(t4) else {
                        log::debug!(
                            "Sync {}: timestamps out of range, sample discarded",
                            request_id
                        );
                        return Ok(None);
                    };
                    log::trace!(
                        "Sync {}: offset {} us, delay {} us",
                        request_id,
                        sample.offset_us,
                        sample.delay_us
                    );
                    return Ok(Some(sample));
                }
                Some(response) => {
                    log::debug!(
                        "Discarding response for request {} while waiting on {}",
                        response.request_id,
                        request_id
                    );
                }
                None => log::trace!("Ignoring non sync frame"),
            }
        }
    }

    /// Run `exchanges` exchanges and take the median of the valid ones
    pub fn sync(&mut self, exchanges: usize, timeout: Duration) -> Result<SyncEstimate> {
        let mut samples = Vec::with_capacity(exchanges);
        for i in 0..exchanges {
            if let Some(sample) = self.exchange_once(timeout)? {
                samples.push(sample);
            }
            if i + 1 < exchanges {
                thread::sleep(EXCHANGE_SPACING);
            }
        }

        let estimate = SyncEstimate::from_samples(samples, exchanges);
        log::info!(
            "Clock sync: {}/{} exchanges valid, offset {:?} us, delay {:?} us",
            estimate.samples.len(),
            estimate.attempts,
            estimate.offset_us,
            estimate.delay_us
        );
        Ok(estimate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MonotonicClock;
    use crate::sync::ChannelTransport;

    #[test]
    fn test_median_odd_and_even() {
        assert_eq!(median(vec![]), None);
        assert_eq!(median(vec![5, 1, 3]), Some(3));
        assert_eq!(median(vec![4, 1, 3, 2]), Some(2));
        assert_eq!(median(vec![-3, -2]), Some(-3));
        assert_eq!(median(vec![i64::MAX, i64::MAX - 2]), Some(i64::MAX - 1));
        assert_eq!(median(vec![i64::MIN, i64::MIN]), Some(i64::MIN));
    }

    #[test]
    fn test_out_of_range_response_is_discarded() {
        let (client_end, device_end) = ChannelTransport::pair();
        let response = SyncResponse {
            request_id: 1,
            t1: 0,
            t2: u64::MAX,
            t3: u64::MAX,
        };
        device_end.send(&response.encode()).unwrap();

        let mut client = SyncClient::new(client_end, MonotonicClock::shared());
        let sample = client.exchange_once(Duration::from_millis(100)).unwrap();
        assert_eq!(sample, None);
    }

    #[test]
    fn test_huge_but_valid_response_is_kept() {
        let (client_end, device_end) = ChannelTransport::pair();
        let response = SyncResponse {
            request_id: 1,
            t1: 0,
            t2: 1 << 62,
            t3: 1 << 62,
        };
        device_end.send(&response.encode()).unwrap();

        let mut client = SyncClient::new(client_end, MonotonicClock::shared());
        let sample = client.exchange_once(Duration::from_millis(100)).unwrap();
        assert!(sample.is_some());
    }

    #[test]
    fn test_estimate_without_samples() {
        let estimate = SyncEstimate::from_samples(Vec::new(), 4);
        assert!(!estimate.is_valid());
        assert_eq!(estimate.attempts, 4);
    }
}
