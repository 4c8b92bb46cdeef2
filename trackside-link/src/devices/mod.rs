//! Device liveness registry
//!
//! Tracks every field device seen on any transport, the addresses it was seen
//! at and when it was last heard from. Health is derived on demand from the
//! age of the last receive, so nothing has to sweep the registry.
//!
//! Devices are never removed. A closed connection only marks the device
//! disconnected, and a later registration brings it back.

use crate::clock::SharedClock;
use crate::types::{DeviceStatus, LinkError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::net::{IpAddr, SocketAddr};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// Heartbeat thresholds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HealthPolicy {
    /// Expected heartbeat period in seconds (default: 1.0)
    #[serde(default = "default_interval")]
    pub interval_secs: f64,

    /// Ages below `up_factor * interval` are UP (default: 1.2)
    #[serde(default = "default_up_factor")]
    pub up_factor: f64,

    /// Ages below `down_factor * interval` are DEGRADED (default: 3.0)
    #[serde(default = "default_down_factor")]
    pub down_factor: f64,
}

fn default_interval() -> f64 {
    1.0
}

fn default_up_factor() -> f64 {
    1.2
}

fn default_down_factor() -> f64 {
    3.0
}

impl Default for HealthPolicy {
    fn default() -> Self {
        Self {
            interval_secs: default_interval(),
            up_factor: default_up_factor(),
            down_factor: default_down_factor(),
        }
    }
}

impl HealthPolicy {
    pub fn status(&self, connected: bool, age: Option<Duration>) -> DeviceStatus {
        if !connected {
            return DeviceStatus::Down;
        }
        let Some(age) = age else {
            return DeviceStatus::Degraded;
        };

        let age = age.as_secs_f64();
        if age < self.up_factor * self.interval_secs {
            DeviceStatus::Up
        } else if age < self.down_factor * self.interval_secs {
            DeviceStatus::Degraded
        } else {
            DeviceStatus::Down
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.interval_secs > 0.0) {
            return Err(LinkError::InvalidConfig(
                "health.interval_secs must be positive".to_string(),
            ));
        }
        if !(self.up_factor > 0.0 && self.up_factor <= self.down_factor) {
            return Err(LinkError::InvalidConfig(format!(
                "health factors must satisfy 0 < up ({}) <= down ({})",
                self.up_factor, self.down_factor
            )));
        }
        Ok(())
    }
}

/// Where a device can be reached
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ChannelAddress {
    pub tcp: Option<SocketAddr>,
    pub udp: Option<IpAddr>,
    pub radio: Option<u16>,
}

impl ChannelAddress {
    pub fn tcp(addr: SocketAddr) -> Self {
        Self {
            tcp: Some(addr),
            ..Self::default()
        }
    }

    pub fn udp(ip: IpAddr) -> Self {
        Self {
            udp: Some(ip),
            ..Self::default()
        }
    }

    pub fn radio(address: u16) -> Self {
        Self {
            radio: Some(address),
            ..Self::default()
        }
    }

    /// Overwrite the channels `other` knows about, keep the rest
    fn merge(&mut self, other: ChannelAddress) {
        if other.tcp.is_some() {
            self.tcp = other.tcp;
        }
        if other.udp.is_some() {
            self.udp = other.udp;
        }
        if other.radio.is_some() {
            self.radio = other.radio;
        }
    }
}

#[derive(Debug, Clone)]
struct Device {
    device_type: String,
    channels: ChannelAddress,
    last_rx: Option<Duration>,
    connected: bool,
}

/// Point-in-time view of one device
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceHandle {
    pub id: String,
    pub device_type: String,
    pub channels: ChannelAddress,
    /// Time since the last receive, `None` if never heard from
    pub age: Option<Duration>,
    pub connected: bool,
    pub status: DeviceStatus,
}

/// Thread-safe registry of all devices
pub struct DeviceRegistry {
    clock: SharedClock,
    policy: HealthPolicy,
    devices: Mutex<HashMap<String, Device>>,
}

impl DeviceRegistry {
    pub fn new(clock: SharedClock, policy: HealthPolicy) -> Self {
        Self {
            clock,
            policy,
            devices: Mutex::new(HashMap::new()),
        }
    }

    pub fn policy(&self) -> &HealthPolicy {
        &self.policy
    }

    /// Add a device or refresh an existing one
    ///
    /// Marks the device connected and merges in the given addresses. The
    /// device type is kept from the first registration.
    pub fn register(&self, id: &str, device_type: &str, channels: ChannelAddress) -> DeviceHandle {
        let now = self.clock.now();
        let mut devices = self.lock();
        let device = devices.entry(id.to_string()).or_insert_with(|| {
            log::info!("New device {} ({})", id, device_type);
            Device {
                device_type: device_type.to_string(),
                channels: ChannelAddress::default(),
                last_rx: None,
                connected: true,
            }
        });
        if !device.connected {
            log::info!("Device {} reconnected", id);
        }
        device.connected = true;
        device.channels.merge(channels);
        self.handle(id, device, now)
    }

    /// Record a receive from `id`
    ///
    /// Returns `false` if the device was never registered.
    pub fn touch_heartbeat(&self, id: &str, ip: Option<IpAddr>) -> bool {
        let now = self.clock.now();
        let mut devices = self.lock();
        match devices.get_mut(id) {
            Some(device) => {
                device.last_rx = Some(now);
                if ip.is_some() {
                    device.channels.udp = ip;
                }
                true
            }
            None => {
                log::debug!("Heartbeat from unregistered device {}", id);
                false
            }
        }
    }

    /// Mark `id` as disconnected; it stays in the registry as DOWN
    pub fn mark_disconnected(&self, id: &str) -> bool {
        let mut devices = self.lock();
        match devices.get_mut(id) {
            Some(device) => {
                if device.connected {
                    log::info!("Device {} disconnected", id);
                }
                device.connected = false;
                true
            }
            None => false,
        }
    }

    pub fn status(&self, id: &str) -> Option<DeviceStatus> {
        let now = self.clock.now();
        let devices = self.lock();
        devices
            .get(id)
            .map(|device| self.policy.status(device.connected, age_of(device, now)))
    }

    /// Status of every device, sorted by id
    pub fn snapshot(&self) -> BTreeMap<String, DeviceStatus> {
        let now = self.clock.now();
        let devices = self.lock();
        devices
            .iter()
            .map(|(id, device)| {
                (
                    id.clone(),
                    self.policy.status(device.connected, age_of(device, now)),
                )
            })
            .collect()
    }

    /// Full view of every device, sorted by id
    pub fn devices(&self) -> Vec<DeviceHandle> {
        let now = self.clock.now();
        let devices = self.lock();
        let mut handles: Vec<DeviceHandle> = devices
            .iter()
            .map(|(id, device)| self.handle(id, device, now))
            .collect();
        handles.sort_by(|a, b| a.id.cmp(&b.id));
        handles
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn handle(&self, id: &str, device: &Device, now: Duration) -> DeviceHandle {
        let age = age_of(device, now);
        DeviceHandle {
            id: id.to_string(),
            device_type: device.device_type.clone(),
            channels: device.channels,
            age,
            connected: device.connected,
            status: self.policy.status(device.connected, age),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Device>> {
        self.devices.lock().unwrap_or_else(|e| {
            log::warn!("Device registry lock poisoned, recovering");
            e.into_inner()
        })
    }
}

fn age_of(device: &Device, now: Duration) -> Option<Duration> {
    device.last_rx.map(|t| now.saturating_sub(t))
}
