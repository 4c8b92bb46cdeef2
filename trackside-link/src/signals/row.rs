//! DATA row to signal frame mapping
//!
//! Socket devices send DATA payloads as comma-separated values in a fixed
//! order. A [`RowParser`] holds that order and turns each row into a
//! [`SignalFrame`].

use crate::types::{LinkError, Result, SignalFrame};

/// Positional mapping from row values to signal names
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowParser {
    names: Vec<String>,
}

impl RowParser {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Map `values` onto the configured names
    ///
    /// `NaN`, `nan` and empty values become NaN. A value count that differs
    /// from the name count, or a value that is not a number, is an error.
    pub fn parse(&self, values: &[&str]) -> Result<SignalFrame> {
        if values.len() != self.names.len() {
            return Err(LinkError::MalformedLine(format!(
                "expected {} values, got {}",
                self.names.len(),
                values.len()
            )));
        }

        let mut frame = SignalFrame::new();
        for (name, raw) in self.names.iter().zip(values) {
            frame.push(name.as_str(), parse_value(raw).ok_or_else(|| {
                LinkError::MalformedLine(format!("bad value {:?} for {}", raw, name))
            })?);
        }
        Ok(frame)
    }
}

fn parse_value(raw: &str) -> Option<f64> {
    let raw = raw.trim();
    if raw.is_empty() || raw.eq_ignore_ascii_case("nan") {
        return Some(f64::NAN);
    }
    raw.parse().ok()
}
