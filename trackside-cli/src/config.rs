//! Configuration loading and parsing
//!
//! Every section is optional; a missing file section falls back to the same
//! defaults the library uses.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;
use trackside_link::{HealthPolicy, LinkConfig, RadioConfig, SignalsConfig, SyncConfig};

/// Main application configuration (loaded from config.toml)
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub radio: RadioSection,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub signals: SignalsConfig,
    #[serde(default)]
    pub health: HealthPolicy,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub report: ReportConfig,
}

/// Serial port settings plus the module parameters
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RadioSection {
    /// Serial port of the LoRa module; the radio worker is skipped when unset
    #[serde(default)]
    pub port: Option<String>,

    #[serde(default = "default_baud")]
    pub baud: u32,

    #[serde(flatten)]
    pub link: RadioConfig,
}

fn default_baud() -> u32 {
    115_200
}

impl Default for RadioSection {
    fn default() -> Self {
        Self {
            port: None,
            baud: default_baud(),
            link: RadioConfig::default(),
        }
    }
}

/// LAN listeners
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct NetworkConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,
    #[serde(default = "default_tcp_port")]
    pub tcp_port: u16,
    #[serde(default = "default_udp_port")]
    pub udp_port: u16,
    #[serde(default = "default_discovery_port")]
    pub discovery_port: u16,
    /// Answer `DISCOVER_SERVER` broadcasts
    #[serde(default = "default_true")]
    pub discovery: bool,
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_tcp_port() -> u16 {
    5000
}

fn default_udp_port() -> u16 {
    5002
}

fn default_discovery_port() -> u16 {
    4999
}

fn default_true() -> bool {
    true
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            tcp_port: default_tcp_port(),
            udp_port: default_udp_port(),
            discovery_port: default_discovery_port(),
            discovery: true,
        }
    }
}

impl NetworkConfig {
    pub fn tcp_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.tcp_port)
    }

    pub fn udp_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.udp_port)
    }

    pub fn discovery_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.discovery_port)
    }
}

/// Console status report
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ReportConfig {
    /// Time between status reports (default: 1000ms, 0 disables)
    #[serde(default = "default_report_interval")]
    pub interval_ms: u64,

    /// Print reports and events as JSON lines
    #[serde(default)]
    pub json: bool,
}

fn default_report_interval() -> u64 {
    1000
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_report_interval(),
            json: false,
        }
    }
}

impl ReportConfig {
    pub fn interval(&self) -> Option<Duration> {
        (self.interval_ms > 0).then(|| Duration::from_millis(self.interval_ms))
    }
}

impl AppConfig {
    /// Library configuration carried by this file
    pub fn link_config(&self) -> LinkConfig {
        LinkConfig {
            radio: self.radio.link.clone(),
            health: self.health,
            signals: self.signals.clone(),
            sync: self.sync.clone(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.link_config()
            .validate()
            .context("Invalid link configuration")?;
        if self.radio.baud == 0 {
            anyhow::bail!("radio.baud must be non-zero");
        }
        if self.network.discovery && self.network.udp_port == self.network.discovery_port {
            anyhow::bail!("network.udp_port and network.discovery_port must differ");
        }
        Ok(())
    }
}

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config: AppConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    config
        .validate()
        .with_context(|| format!("Invalid config file: {:?}", path))?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_config_deserialization() {
        let toml_content = r#"
            [radio]
            port = "/dev/ttyUSB0"
            address = 3
            tx_guard_ms = 80

            [network]
            host = "127.0.0.1"
            udp_port = 6002

            [signals]
            row_names = ["Speed", "RPM", "AccelX"]
            stale_after_ms = 500

            [health]
            interval_secs = 2.0

            [report]
            json = true
        "#;

        let config: AppConfig = toml::from_str(toml_content).unwrap();
        assert_eq!(config.radio.port.as_deref(), Some("/dev/ttyUSB0"));
        assert_eq!(config.radio.baud, 115_200);
        assert_eq!(config.radio.link.address, 3);
        assert_eq!(config.radio.link.tx_guard_ms, 80);
        assert_eq!(config.radio.link.rx_guard_ms, 10);
        assert_eq!(config.network.tcp_port, 5000);
        assert_eq!(config.network.udp_addr(), "127.0.0.1:6002".parse().unwrap());
        assert_eq!(config.signals.row_names.len(), 3);
        assert_eq!(config.signals.stale_after(), Some(Duration::from_millis(500)));
        assert_eq!(config.health.interval_secs, 2.0);
        assert!(config.report.json);
        assert_eq!(config.report.interval(), Some(Duration::from_secs(1)));
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: AppConfig = toml::from_str("").unwrap();
        assert_eq!(config, AppConfig::default());
        assert!(config.radio.port.is_none());
        assert_eq!(config.network.discovery_port, 4999);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[report]\ninterval_ms = 0").unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.report.interval(), None);
    }

    #[test]
    fn test_load_config_rejects_bad_values() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[radio]\nbaud = 0").unwrap();
        assert!(load_config(file.path()).is_err());

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[radio\nport = ").unwrap();
        assert!(load_config(file.path()).is_err());
    }
}
