//! Timing gate trigger messages
//!
//! A gate reports a crossing as a DATA payload of label/value pairs, e.g.
//! `TIME (UTC),14:03:22.125,TRIGGER,83.412`. Labels are matched
//! case-insensitively and unknown labels are skipped.

use chrono::NaiveTime;
use serde::Serialize;

/// A decoded gate crossing
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GateTrigger {
    /// UTC time of day reported by the gate's GPS
    pub utc_time: Option<NaiveTime>,
    /// Gate-local trigger time in seconds
    pub trigger: Option<f64>,
}

/// Decode a trigger payload; `None` if it carries neither label
pub fn parse_trigger(parts: &[&str]) -> Option<GateTrigger> {
    let mut result = GateTrigger {
        utc_time: None,
        trigger: None,
    };

    let mut i = 0;
    while i < parts.len() {
        let label = parts[i].trim().to_ascii_uppercase();
        let value = parts.get(i + 1).map(|v| v.trim());

        match (label.as_str(), value) {
            ("TIME (UTC)", Some(value)) => {
                result.utc_time = Some(parse_time(value)?);
                i += 2;
            }
            ("TRIGGER", Some(value)) => {
                result.trigger = Some(value.parse().ok()?);
                i += 2;
            }
            _ => i += 1,
        }
    }

    if result.utc_time.is_none() && result.trigger.is_none() {
        return None;
    }
    Some(result)
}

fn parse_time(value: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(value, "%H:%M:%S%.f")
        .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M:%S"))
        .map_err(|e| log::debug!("Bad trigger time {:?}: {}", value, e))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    #[test]
    fn test_time_and_trigger() {
        let trigger = parse_trigger(&["TIME (UTC)", "14:03:22.125", "TRIGGER", "83.412"]).unwrap();
        let time = trigger.utc_time.unwrap();
        assert_eq!((time.hour(), time.minute(), time.second()), (14, 3, 22));
        assert_eq!(time.nanosecond(), 125_000_000);
        assert_eq!(trigger.trigger, Some(83.412));
    }

    #[test]
    fn test_time_without_fraction_and_lowercase_label() {
        let trigger = parse_trigger(&["time (utc)", "09:00:01"]).unwrap();
        assert_eq!(trigger.utc_time, NaiveTime::from_hms_opt(9, 0, 1));
        assert_eq!(trigger.trigger, None);
    }

    #[test]
    fn test_unknown_labels_skipped() {
        let trigger = parse_trigger(&["GATE", "2", "TRIGGER", "1.5"]).unwrap();
        assert_eq!(trigger.trigger, Some(1.5));
    }

    #[test]
    fn test_not_a_trigger() {
        assert_eq!(parse_trigger(&["88.5", "6200"]), None);
        assert_eq!(parse_trigger(&["TRIGGER"]), None);
    }

    #[test]
    fn test_bad_values_rejected() {
        assert_eq!(parse_trigger(&["TRIGGER", "soon"]), None);
        assert_eq!(parse_trigger(&["TIME (UTC)", "25:99"]), None);
    }
}
