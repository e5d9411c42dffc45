use crate::gpio::PinLevel;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Only MQTT 5 sessions are negotiated.
pub const SUPPORTED_PROTOCOL_VERSION: u8 = 5;
const MIN_KEEP_ALIVE_SECS: u64 = 5;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Topic path must not be empty")]
    EmptyTopic,

    #[error("Topic path must not contain wildcards: {0}")]
    WildcardTopic(String),

    #[error("Client id must not be empty")]
    EmptyClientId,

    #[error("Keep alive of {0}s is below the minimum of 5s")]
    KeepAliveTooShort(u64),

    #[error("Unsupported MQTT protocol version {0}")]
    UnsupportedProtocol(u8),

    #[error("Network interface name must not be empty")]
    EmptyInterface,

    #[error("Invalid broker uri: {0}")]
    BrokerUri(String),

    #[error("Broker uri must not embed credentials, set username and password instead")]
    BrokerUriCredentials,
}

/// Complete device configuration, stored as one TOML document.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub network: NetworkConfig,
    pub broker: BrokerConfig,
    pub topic: TopicConfig,
    pub pin: PinConfig,
}

/// Link the device is expected to come up on. Joining the wireless network is
/// the operating system's job; `ssid` is only reported.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct NetworkConfig {
    pub interface: String,
    pub ssid: String,
    pub sysfs_root: PathBuf,
    /// 0 means check once and fail if the link is not up
    pub link_timeout_secs: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            interface: "wlan0".to_string(),
            ssid: String::new(),
            sysfs_root: PathBuf::from("/sys/class/net"),
            link_timeout_secs: 30,
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct BrokerConfig {
    pub uri: String,
    /// Overrides the port from the uri
    pub port: Option<u16>,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub protocol_version: u8,
    pub keep_alive_secs: u64,
    pub reconnect_delay_ms: u64,
    /// PEM trust anchors; the platform roots are used when unset
    pub ca_bundle: Option<PathBuf>,
    pub capacity: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            uri: "mqtts://localhost".to_string(),
            port: None,
            client_id: "ledcontroller".to_string(),
            username: None,
            password: None,
            protocol_version: SUPPORTED_PROTOCOL_VERSION,
            keep_alive_secs: 30,
            reconnect_delay_ms: 10_000,
            ca_bundle: None,
            capacity: 10,
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct TopicConfig {
    pub path: String,
}

impl Default for TopicConfig {
    fn default() -> Self {
        Self {
            path: "/ifpe/ads/embarcados/esp32/led".to_string(),
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct PinConfig {
    /// BCM numbering
    pub gpio: u8,
    pub initial_level: PinLevel,
}

impl Default for PinConfig {
    fn default() -> Self {
        Self {
            gpio: 2,
            initial_level: PinLevel::Low,
        }
    }
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let topic = &self.topic.path;
        if topic.is_empty() {
            return Err(ConfigError::EmptyTopic);
        }
        if topic.contains(['+', '#']) {
            return Err(ConfigError::WildcardTopic(topic.clone()));
        }

        if self.broker.client_id.is_empty() {
            return Err(ConfigError::EmptyClientId);
        }
        if self.broker.keep_alive_secs < MIN_KEEP_ALIVE_SECS {
            return Err(ConfigError::KeepAliveTooShort(self.broker.keep_alive_secs));
        }
        if self.broker.protocol_version != SUPPORTED_PROTOCOL_VERSION {
            return Err(ConfigError::UnsupportedProtocol(
                self.broker.protocol_version,
            ));
        }

        if self.network.interface.is_empty() {
            return Err(ConfigError::EmptyInterface);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = AppConfig::default();
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn partial_document_falls_back_to_defaults() {
        let config: AppConfig = toml::from_str(
            r#"
            [broker]
            uri = "mqtts://broker.example.net"
            username = "device"
            password = "secret"

            [pin]
            gpio = 17
            initial_level = "high"
            "#,
        )
        .unwrap();

        assert_eq!(config.broker.uri, "mqtts://broker.example.net");
        assert_eq!(config.broker.username.as_deref(), Some("device"));
        assert_eq!(config.broker.keep_alive_secs, 30);
        assert_eq!(config.pin.gpio, 17);
        assert_eq!(config.pin.initial_level, PinLevel::High);
        assert_eq!(config.topic, TopicConfig::default());
        assert_eq!(config.network.interface, "wlan0");
    }

    #[test]
    fn wildcard_topics_are_rejected() {
        let mut config = AppConfig::default();
        config.topic.path = "devices/+/led".to_string();
        assert_eq!(
            config.validate(),
            Err(ConfigError::WildcardTopic("devices/+/led".to_string()))
        );

        config.topic.path = String::new();
        assert_eq!(config.validate(), Err(ConfigError::EmptyTopic));
    }

    #[test]
    fn only_protocol_five_is_accepted() {
        let mut config = AppConfig::default();
        config.broker.protocol_version = 4;
        assert_eq!(config.validate(), Err(ConfigError::UnsupportedProtocol(4)));
    }

    #[test]
    fn short_keep_alive_and_empty_names_are_rejected() {
        let mut config = AppConfig::default();
        config.broker.keep_alive_secs = 1;
        assert_eq!(config.validate(), Err(ConfigError::KeepAliveTooShort(1)));

        let mut config = AppConfig::default();
        config.broker.client_id = String::new();
        assert_eq!(config.validate(), Err(ConfigError::EmptyClientId));

        let mut config = AppConfig::default();
        config.network.interface = String::new();
        assert_eq!(config.validate(), Err(ConfigError::EmptyInterface));
    }

    #[test]
    fn default_document_round_trips_through_toml() {
        let text = toml::to_string_pretty(&AppConfig::default()).unwrap();
        let parsed: AppConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed, AppConfig::default());
    }
}
