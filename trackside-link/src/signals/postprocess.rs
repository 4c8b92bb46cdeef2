//! Per-signal post-processing applied before values reach the store

use crate::types::SignalFrame;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Raw accelerometer counts per g
pub const ACCEL_COUNTS_PER_G: f64 = 2048.0;

/// A transform applied to one named signal
pub trait SignalTransform: Send + Sync {
    fn apply(&self, value: f64) -> f64;
}

impl<F> SignalTransform for F
where
    F: Fn(f64) -> f64 + Send + Sync,
{
    fn apply(&self, value: f64) -> f64 {
        self(value)
    }
}

/// Divide by a constant
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scale {
    pub divisor: f64,
}

impl SignalTransform for Scale {
    fn apply(&self, value: f64) -> f64 {
        value / self.divisor
    }
}

/// Configured scale rule, as written in `[[signals.scale]]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScaleRule {
    /// Signal name the rule applies to
    pub signal: String,
    /// Value the raw reading is divided by
    pub divisor: f64,
}

impl ScaleRule {
    pub fn new(signal: impl Into<String>, divisor: f64) -> Self {
        Self {
            signal: signal.into(),
            divisor,
        }
    }
}

/// Default rules: accelerometer axes from raw ADC counts to g
pub fn default_scale_rules() -> Vec<ScaleRule> {
    ["AccelX", "AccelY", "AccelZ"]
        .into_iter()
        .map(|axis| ScaleRule::new(axis, ACCEL_COUNTS_PER_G))
        .collect()
}

/// Name-keyed table of transforms
#[derive(Default)]
pub struct PostProcessor {
    transforms: HashMap<String, Box<dyn SignalTransform>>,
}

impl PostProcessor {
    /// Create a processor with no rules
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from configured scale rules; zero divisors are skipped
    pub fn from_rules(rules: &[ScaleRule]) -> Self {
        let mut processor = Self::new();
        for rule in rules {
            if rule.divisor == 0.0 {
                log::warn!("Ignoring scale rule for {} with zero divisor", rule.signal);
                continue;
            }
            processor.register(
                rule.signal.clone(),
                Scale {
                    divisor: rule.divisor,
                },
            );
        }
        processor
    }

    pub fn register(&mut self, signal: impl Into<String>, transform: impl SignalTransform + 'static) {
        self.transforms.insert(signal.into(), Box::new(transform));
    }

    /// Transformed value for `signal`, unchanged when no rule applies
    pub fn apply(&self, signal: &str, value: f64) -> f64 {
        match self.transforms.get(signal) {
            Some(transform) => transform.apply(value),
            None => value,
        }
    }

    /// Apply every matching rule to a frame in place
    pub fn apply_frame(&self, frame: SignalFrame) -> SignalFrame {
        if self.transforms.is_empty() {
            return frame;
        }
        let mut out = SignalFrame::new();
        for (name, value) in frame.iter() {
            out.push(name, self.apply(name, value));
        }
        out
    }

    pub fn len(&self) -> usize {
        self.transforms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transforms.is_empty()
    }
}

impl std::fmt::Debug for PostProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&String> = self.transforms.keys().collect();
        names.sort();
        f.debug_struct("PostProcessor").field("signals", &names).finish()
    }
}
