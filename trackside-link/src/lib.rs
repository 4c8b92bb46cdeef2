//! Trackside Link Library
//!
//! Ground-station side of a race telemetry link. Field devices reach the
//! ground station over a LoRa radio module (AT command set on a serial port)
//! or over the LAN (TCP and UDP line protocols).
//!
//! # Architecture
//!
//! - [`codec`] encodes and decodes the compact TLV frames carried over the radio
//! - [`radio`] drives the module: init sequence, receive parsing, guarded
//!   half-duplex transmit queue and reconnects
//! - [`net`] runs the TCP server, UDP listener and LAN discovery responder
//! - [`hub::TelemetryHub`] ties them together: names, scaling, the latest-value
//!   [`signals::SignalStore`], the [`devices::DeviceRegistry`] and command dispatch
//! - [`sync`] implements the four-timestamp clock synchronisation exchange
//!
//! The library does NOT:
//! - Persist telemetry history
//! - Render anything
//! - Encrypt or authenticate frames
//!
//! # Example Usage
//!
//! ```no_run
//! use std::sync::atomic::AtomicBool;
//! use trackside_link::clock::MonotonicClock;
//! use trackside_link::hub::TelemetryHub;
//! use trackside_link::radio::RadioLink;
//! use trackside_link::transport::SerialTransport;
//! use trackside_link::LinkConfig;
//!
//! let config = LinkConfig::new().with_row_names(["Speed", "RPM"]);
//! let clock = MonotonicClock::shared();
//! let (events, rx) = crossbeam_channel::unbounded();
//! let hub = TelemetryHub::new(&config, clock.clone(), events);
//!
//! let port = SerialTransport::open("/dev/ttyUSB0", 115200, config.radio.poll_interval()).unwrap();
//! let mut link = RadioLink::new(port, config.radio.clone(), hub.tx().clone(), clock);
//! link.initialize().unwrap();
//!
//! let running = AtomicBool::new(true);
//! link.run(&running, &hub).unwrap();
//!
//! for event in rx.try_iter() {
//!     println!("{:?}", event);
//! }
//! ```

// Public modules
pub mod clock;
pub mod codec;
pub mod config;
pub mod devices;
pub mod dispatcher;
pub mod hub;
pub mod net;
pub mod protocol;
pub mod radio;
pub mod signals;
pub mod sync;
pub mod transport;
pub mod types;

// Re-export main types for convenience
pub use config::{LinkConfig, RadioConfig, SignalsConfig, SyncConfig};
pub use devices::{DeviceHandle, DeviceRegistry, HealthPolicy};
pub use hub::{LinkEvent, TelemetryHub};
pub use protocol::Command;
pub use types::{
    DeviceStatus, LinkError, Result, SignalFrame, Timestamp, TlvField, TlvMap, TlvValue,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_basics() {
        let (events, _rx) = crossbeam_channel::unbounded();
        let hub = TelemetryHub::new(&LinkConfig::new(), clock::MonotonicClock::shared(), events);
        assert!(hub.store().is_empty());
        assert!(hub.devices().is_empty());
        assert!(!VERSION.is_empty());
    }
}
