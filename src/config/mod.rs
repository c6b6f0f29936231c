//! Configuration management: a small TOML file describing the serial port,
//! protocol tuning, and logging.
//!
//! ```toml
//! [serial]
//! port = "/dev/ttyUSB0"
//! baud_rate = 115200
//!
//! [protocol]
//! fragment_payload = 30
//!
//! [logging]
//! level = "info"
//! # file = "xbmesh.log"
//! ```
//!
//! CLI arguments override config values, which override the defaults.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::protocol::MAX_FRAGMENT_PAYLOAD;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub serial: SerialConfig,
    #[serde(default)]
    pub protocol: ProtocolConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerialConfig {
    /// Serial device path, e.g. `/dev/ttyUSB0` or `COM3`. May stay empty when
    /// the port always comes from the command line.
    #[serde(default)]
    pub port: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
}

impl Default for SerialConfig {
    fn default() -> Self {
        SerialConfig {
            port: String::new(),
            baud_rate: default_baud_rate(),
        }
    }
}

fn default_baud_rate() -> u32 {
    115_200
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolConfig {
    /// Payload bytes carried per fragment. 30 by default; up to 34 when the
    /// radio's frame budget allows it (encryption disabled).
    #[serde(default = "default_fragment_payload")]
    pub fragment_payload: usize,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        ProtocolConfig {
            fragment_payload: default_fragment_payload(),
        }
    }
}

fn default_fragment_payload() -> usize {
    crate::protocol::DEFAULT_FRAGMENT_PAYLOAD
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Base log level when no -v flags are given: error, warn, info, debug,
    /// trace.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Optional log file; console output continues when attached to a TTY.
    #[serde(default)]
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: default_log_level(),
            file: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

const DEFAULT_CONFIG: &str = r#"# xbmesh configuration

[serial]
# Serial device the XBee radio is attached to.
port = "/dev/ttyUSB0"
baud_rate = 115200

[protocol]
# Payload bytes per fragment (1-34). 30 leaves headroom for radios with
# encryption enabled; raise to 34 otherwise.
fragment_payload = 30

[logging]
level = "info"
# file = "xbmesh.log"
"#;

impl Config {
    /// Load and validate a configuration file.
    pub async fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| anyhow!("failed to read config file {}: {}", path, e))?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow!("failed to parse config file {}: {}", path, e))?;
        config.validate()?;
        Ok(config)
    }

    /// Write the commented default configuration. Refuses to overwrite.
    pub async fn create_default(path: &str) -> Result<()> {
        if fs::try_exists(path).await.unwrap_or(false) {
            return Err(anyhow!("{} already exists", path));
        }
        fs::write(path, DEFAULT_CONFIG)
            .await
            .map_err(|e| anyhow!("failed to write {}: {}", path, e))?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.serial.baud_rate == 0 {
            return Err(anyhow!("serial.baud_rate must be non-zero"));
        }
        let payload = self.protocol.fragment_payload;
        if payload == 0 || payload > MAX_FRAGMENT_PAYLOAD {
            return Err(anyhow!(
                "protocol.fragment_payload must be between 1 and {}",
                MAX_FRAGMENT_PAYLOAD
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_template_parses_back() {
        let config: Config = toml::from_str(DEFAULT_CONFIG).unwrap();
        config.validate().unwrap();
        assert_eq!(config.serial.baud_rate, 115_200);
        assert_eq!(config.protocol.fragment_payload, 30);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn oversize_fragment_payload_is_rejected() {
        let mut config = Config::default();
        config.protocol.fragment_payload = 35;
        assert!(config.validate().is_err());
        config.protocol.fragment_payload = 34;
        assert!(config.validate().is_ok());
    }
}
