//! Signal names, latest values and value transforms
//!
//! This module contains the id-to-name registry fed by TLV name
//! announcements, the latest-value store, the per-signal post-processing
//! table and the positional DATA row parser.

pub mod names;
pub mod postprocess;
pub mod row;
pub mod store;

// Re-export key types for convenience
pub use names::NameRegistry;
pub use postprocess::{default_scale_rules, PostProcessor, Scale, ScaleRule, SignalTransform};
pub use row::RowParser;
pub use store::SignalStore;
