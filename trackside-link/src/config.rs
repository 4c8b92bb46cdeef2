//! Link configuration types
//!
//! This module defines the configuration consumed by the library: radio
//! module parameters, liveness policy, signal processing rules and clock
//! sync settings. Where sockets bind and where the serial port lives is the
//! application's business and stays out of here.

use crate::devices::HealthPolicy;
use crate::radio::TxTiming;
use crate::signals::{default_scale_rules, ScaleRule};
use crate::types::{LinkError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the link library
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LinkConfig {
    #[serde(default)]
    pub radio: RadioConfig,

    #[serde(default)]
    pub health: HealthPolicy,

    #[serde(default)]
    pub signals: SignalsConfig,

    #[serde(default)]
    pub sync: SyncConfig,
}

impl LinkConfig {
    /// Create a new configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method: replace the radio section
    pub fn with_radio(mut self, radio: RadioConfig) -> Self {
        self.radio = radio;
        self
    }

    /// Builder method: set the ordered names for DATA rows
    pub fn with_row_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.signals.row_names = names.into_iter().map(Into::into).collect();
        self
    }

    /// Builder method: add a scale rule
    pub fn add_scale_rule(mut self, signal: impl Into<String>, divisor: f64) -> Self {
        self.signals.scale.push(ScaleRule::new(signal, divisor));
        self
    }

    /// Reject values that would make the workers misbehave
    pub fn validate(&self) -> Result<()> {
        self.radio.validate()?;
        self.health.validate()?;
        if self.sync.exchanges == 0 {
            return Err(LinkError::InvalidConfig(
                "sync.exchanges must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// LoRa module parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RadioConfig {
    /// This station's radio address
    #[serde(default = "default_address")]
    pub address: u16,

    /// Network id shared with the field devices
    #[serde(default = "default_network_id")]
    pub network_id: u8,

    /// Carrier frequency in Hz
    #[serde(default = "default_band")]
    pub band: u64,

    #[serde(default = "default_spreading_factor")]
    pub spreading_factor: u8,

    #[serde(default = "default_bandwidth")]
    pub bandwidth: u8,

    #[serde(default = "default_coding_rate")]
    pub coding_rate: u8,

    #[serde(default = "default_preamble")]
    pub preamble: u8,

    /// Address outgoing frames are sent to
    #[serde(default = "default_peer_address")]
    pub peer_address: u16,

    /// Time after a send before the module is assumed idle (default: 50ms)
    #[serde(default = "default_tx_guard")]
    pub tx_guard_ms: u64,

    /// Quiet time after a receive before sending (default: 10ms)
    #[serde(default = "default_rx_guard")]
    pub rx_guard_ms: u64,

    /// Transmit queue service interval and serial read timeout (default: 20ms)
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Per-command wait for `+OK` during initialisation (default: 2000ms)
    #[serde(default = "default_init_timeout")]
    pub init_timeout_ms: u64,

    /// Wait before reopening a failed serial link (default: 2000ms)
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_ms: u64,

    /// Minimum spacing of name requests triggered by unknown ids (default: 5000ms)
    #[serde(default = "default_name_request_interval")]
    pub name_request_interval_ms: u64,
}

fn default_address() -> u16 {
    2
}

fn default_network_id() -> u8 {
    18
}

fn default_band() -> u64 {
    915_000_000
}

fn default_spreading_factor() -> u8 {
    7
}

fn default_bandwidth() -> u8 {
    9
}

fn default_coding_rate() -> u8 {
    1
}

fn default_preamble() -> u8 {
    8
}

fn default_peer_address() -> u16 {
    1
}

fn default_tx_guard() -> u64 {
    50
}

fn default_rx_guard() -> u64 {
    10
}

fn default_poll_interval() -> u64 {
    20
}

fn default_init_timeout() -> u64 {
    2000
}

fn default_reconnect_delay() -> u64 {
    2000
}

fn default_name_request_interval() -> u64 {
    5000
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            network_id: default_network_id(),
            band: default_band(),
            spreading_factor: default_spreading_factor(),
            bandwidth: default_bandwidth(),
            coding_rate: default_coding_rate(),
            preamble: default_preamble(),
            peer_address: default_peer_address(),
            tx_guard_ms: default_tx_guard(),
            rx_guard_ms: default_rx_guard(),
            poll_interval_ms: default_poll_interval(),
            init_timeout_ms: default_init_timeout(),
            reconnect_delay_ms: default_reconnect_delay(),
            name_request_interval_ms: default_name_request_interval(),
        }
    }
}

impl RadioConfig {
    /// Builder method: set local and peer addresses
    pub fn with_addresses(mut self, address: u16, peer_address: u16) -> Self {
        self.address = address;
        self.peer_address = peer_address;
        self
    }

    pub fn tx_timing(&self) -> TxTiming {
        TxTiming {
            tx_guard: Duration::from_millis(self.tx_guard_ms),
            rx_guard: Duration::from_millis(self.rx_guard_ms),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn init_timeout(&self) -> Duration {
        Duration::from_millis(self.init_timeout_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn name_request_interval(&self) -> Duration {
        Duration::from_millis(self.name_request_interval_ms)
    }

    fn validate(&self) -> Result<()> {
        if !(5..=12).contains(&self.spreading_factor) {
            return Err(LinkError::InvalidConfig(format!(
                "radio.spreading_factor {} outside 5..=12",
                self.spreading_factor
            )));
        }
        if self.poll_interval_ms == 0 {
            return Err(LinkError::InvalidConfig(
                "radio.poll_interval_ms must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Signal processing configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalsConfig {
    /// Divisor rules applied before values reach the store
    #[serde(default = "default_scale_rules")]
    pub scale: Vec<ScaleRule>,

    /// Ordered signal names for DATA rows from socket devices
    #[serde(default)]
    pub row_names: Vec<String>,

    /// Values older than this read as NaN in snapshots (default: 2000ms)
    #[serde(default = "default_stale_after")]
    pub stale_after_ms: Option<u64>,

    /// Optional JSON file the name registry is persisted to
    #[serde(default)]
    pub name_cache: Option<PathBuf>,
}

fn default_stale_after() -> Option<u64> {
    Some(2000)
}

impl Default for SignalsConfig {
    fn default() -> Self {
        Self {
            scale: default_scale_rules(),
            row_names: Vec::new(),
            stale_after_ms: default_stale_after(),
            name_cache: None,
        }
    }
}

impl SignalsConfig {
    pub fn stale_after(&self) -> Option<Duration> {
        self.stale_after_ms.map(Duration::from_millis)
    }
}

/// Clock sync self-check settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Exchanges per sync run (default: 11)
    #[serde(default = "default_exchanges")]
    pub exchanges: usize,

    /// Wait for each response (default: 1000ms)
    #[serde(default = "default_sync_timeout")]
    pub timeout_ms: u64,

    /// One-way latency of the simulated link (default: 5ms)
    #[serde(default = "default_simulated_latency")]
    pub simulated_latency_ms: u64,
}

fn default_exchanges() -> usize {
    11
}

fn default_sync_timeout() -> u64 {
    1000
}

fn default_simulated_latency() -> u64 {
    5
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            exchanges: default_exchanges(),
            timeout_ms: default_sync_timeout(),
            simulated_latency_ms: default_simulated_latency(),
        }
    }
}

impl SyncConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn simulated_latency(&self) -> Duration {
        Duration::from_millis(self.simulated_latency_ms)
    }
}
