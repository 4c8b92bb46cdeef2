//! Latest-value signal store
//!
//! Holds the most recent value of every named signal together with the
//! monotonic instant it was observed. There is no history: an update simply
//! overwrites the previous value.

use crate::clock::SharedClock;
use crate::types::SignalFrame;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
struct Sample {
    value: f64,
    observed_at: Duration,
}

/// Thread-safe `name -> latest value` store
pub struct SignalStore {
    clock: SharedClock,
    signals: Mutex<HashMap<String, Sample>>,
}

impl SignalStore {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            clock,
            signals: Mutex::new(HashMap::new()),
        }
    }

    /// Record a value, stamped with the current monotonic time
    pub fn update(&self, name: &str, value: f64) {
        let observed_at = self.clock.now();
        let mut signals = self.signals.lock().unwrap_or_else(|e| e.into_inner());
        match signals.get_mut(name) {
            Some(sample) => *sample = Sample { value, observed_at },
            None => {
                signals.insert(name.to_string(), Sample { value, observed_at });
            }
        }
    }

    /// Record every value in a frame under a single timestamp
    pub fn update_frame(&self, frame: &SignalFrame) {
        if frame.is_empty() {
            return;
        }
        let observed_at = self.clock.now();
        let mut signals = self.signals.lock().unwrap_or_else(|e| e.into_inner());
        for (name, value) in frame.iter() {
            signals.insert(name.to_string(), Sample { value, observed_at });
        }
        log::trace!("Stored frame of {} signals", frame.len());
    }

    /// Latest value of `name`
    ///
    /// `None` if the signal was never seen, `NaN` if it is older than
    /// `max_age`. A `max_age` of `None` disables the staleness check.
    pub fn get(&self, name: &str, max_age: Option<Duration>) -> Option<f64> {
        let now = self.clock.now();
        let signals = self.signals.lock().unwrap_or_else(|e| e.into_inner());
        signals
            .get(name)
            .map(|sample| fresh_value(sample, now, max_age))
    }

    /// Time since `name` was last updated
    pub fn age(&self, name: &str) -> Option<Duration> {
        let now = self.clock.now();
        let signals = self.signals.lock().unwrap_or_else(|e| e.into_inner());
        signals
            .get(name)
            .map(|sample| now.saturating_sub(sample.observed_at))
    }

    /// Sorted copy of every signal; stale entries read as NaN
    pub fn snapshot(&self, max_age: Option<Duration>) -> BTreeMap<String, f64> {
        let now = self.clock.now();
        let signals = self.signals.lock().unwrap_or_else(|e| e.into_inner());
        signals
            .iter()
            .map(|(name, sample)| (name.clone(), fresh_value(sample, now, max_age)))
            .collect()
    }

    /// Names of every signal seen so far, sorted
    pub fn names(&self) -> Vec<String> {
        let signals = self.signals.lock().unwrap_or_else(|e| e.into_inner());
        let mut names: Vec<String> = signals.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.signals.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn fresh_value(sample: &Sample, now: Duration, max_age: Option<Duration>) -> f64 {
    match max_age {
        Some(limit) if now.saturating_sub(sample.observed_at) > limit => f64::NAN,
        _ => sample.value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::sync::Arc;

    fn store_with_clock() -> (SignalStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        (SignalStore::new(clock.clone()), clock)
    }

    #[test]
    fn test_update_overwrites() {
        let (store, _clock) = store_with_clock();
        store.update("RPM", 6000.0);
        store.update("RPM", 6500.0);
        assert_eq!(store.get("RPM", None), Some(6500.0));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_never_seen_is_none() {
        let (store, _clock) = store_with_clock();
        assert_eq!(store.get("Gear", None), None);
        assert_eq!(store.age("Gear"), None);
    }

    #[test]
    fn test_stale_signal_is_nan_and_key_stays() {
        let (store, clock) = store_with_clock();
        store.update("Speed", 88.0);
        store.update("OilTemp", 96.5);

        clock.advance(Duration::from_secs(3));
        store.update("OilTemp", 97.0);

        let snapshot = store.snapshot(Some(Duration::from_secs(2)));
        assert_eq!(snapshot.len(), 2);
        assert!(snapshot["Speed"].is_nan());
        assert_eq!(snapshot["OilTemp"], 97.0);

        assert!(store.get("Speed", Some(Duration::from_secs(2))).unwrap().is_nan());
        assert_eq!(store.get("Speed", None), Some(88.0));
        assert_eq!(store.age("Speed"), Some(Duration::from_secs(3)));
    }

    #[test]
    fn test_update_frame_shares_timestamp() {
        let (store, clock) = store_with_clock();
        let mut frame = SignalFrame::new();
        frame.push("AccelX", 0.5);
        frame.push("AccelY", -0.25);

        clock.advance(Duration::from_millis(400));
        store.update_frame(&frame);
        clock.advance(Duration::from_millis(100));

        assert_eq!(store.age("AccelX"), store.age("AccelY"));
        assert_eq!(store.names(), vec!["AccelX", "AccelY"]);
    }
}
