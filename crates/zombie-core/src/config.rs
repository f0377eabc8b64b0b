//! Node configuration
//!
//! Stored on the SD card as a postcard-encoded `config.bin`. Missing or
//! unreadable configuration falls back to [`NodeConfig::default`].

use alloc::vec::Vec;
use core::time::Duration;

use heapless::String;
use serde::{Deserialize, Serialize};
use thiserror_no_std::Error;

/// Error types for configuration loading
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    /// Configuration bytes could not be decoded
    #[error("Failed to decode configuration: {details}")]
    Decode {
        /// Underlying decoder error
        details: &'static str,
    },

    /// Configuration could not be encoded
    #[error("Failed to encode configuration")]
    Encode,

    /// Configuration decoded but holds inconsistent values
    #[error("Invalid configuration: {details}")]
    Invalid {
        /// What is wrong with it
        details: &'static str,
    },
}

/// Supply voltage thresholds deciding how much work a wake cycle does
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct PowerThresholds {
    /// Below this voltage the radio stays off and records are buffered (V)
    pub wifi_down_voltage: f32,
    /// Below this voltage no measurement is taken at all (V)
    pub stop_measuring_voltage: f32,
}

impl Default for PowerThresholds {
    fn default() -> Self {
        Self {
            wifi_down_voltage: 3.3,
            stop_measuring_voltage: 2.9,
        }
    }
}

/// How records travel to the telemetry server
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportProtocol {
    /// One short TCP connection per record
    #[default]
    Tcp,
    /// One datagram per record, without acknowledgement
    Udp,
}

/// Telemetry server and static IPv4 addressing of the node
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct ServerConfig {
    pub address: [u8; 4],
    pub protocol: TransportProtocol,
    pub tcp_port: u16,
    pub udp_port: u16,
    pub local_address: [u8; 4],
    pub gateway: [u8; 4],
    pub prefix_len: u8,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: [192, 168, 8, 100],
            protocol: TransportProtocol::Tcp,
            tcp_port: 6819,
            udp_port: 6819,
            local_address: [192, 168, 8, 112],
            gateway: [192, 168, 8, 1],
            prefix_len: 24,
        }
    }
}

impl ServerConfig {
    /// Server port of the selected protocol
    pub fn port(&self) -> u16 {
        match self.protocol {
            TransportProtocol::Tcp => self.tcp_port,
            TransportProtocol::Udp => self.udp_port,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct InternetConfig {
    pub ssid: String<32>,
    pub password: String<64>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct NodeConfig {
    pub power: PowerThresholds,
    /// Deep sleep duration between two wake cycles
    pub sleep_seconds: u32,
    pub server: ServerConfig,
    pub internet: InternetConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            power: PowerThresholds::default(),
            sleep_seconds: 300,
            server: ServerConfig::default(),
            internet: InternetConfig::default(),
        }
    }
}

impl NodeConfig {
    /// Decode a postcard-encoded configuration and validate it.
    pub fn from_postcard(bytes: &[u8]) -> Result<Self, ConfigError> {
        let config: Self = postcard::from_bytes(bytes).map_err(|e| ConfigError::Decode {
            details: postcard_error_details(&e),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_postcard(&self) -> Result<Vec<u8>, ConfigError> {
        postcard::to_allocvec(self).map_err(|_| ConfigError::Encode)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let power = &self.power;
        if !(power.stop_measuring_voltage < power.wifi_down_voltage) {
            return Err(ConfigError::Invalid {
                details: "stop_measuring_voltage must be below wifi_down_voltage",
            });
        }
        if self.sleep_seconds == 0 {
            return Err(ConfigError::Invalid {
                details: "sleep_seconds must be positive",
            });
        }
        if self.server.prefix_len > 32 {
            return Err(ConfigError::Invalid {
                details: "prefix_len must be at most 32",
            });
        }
        if self.server.port() == 0 {
            return Err(ConfigError::Invalid {
                details: "server port must be non-zero",
            });
        }
        Ok(())
    }

    pub fn sleep_duration(&self) -> Duration {
        Duration::from_secs(self.sleep_seconds as u64)
    }
}

fn postcard_error_details(error: &postcard::Error) -> &'static str {
    match error {
        postcard::Error::DeserializeUnexpectedEnd => "unexpected end of input",
        postcard::Error::DeserializeBadUtf8 => "invalid UTF-8 in string",
        postcard::Error::DeserializeBadVarint => "invalid varint",
        _ => "malformed configuration",
    }
}
