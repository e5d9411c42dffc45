use crate::config::{BrokerConfig, ConfigError, SUPPORTED_PROTOCOL_VERSION};
use std::path::PathBuf;
use std::time::Duration;

const SECURE_PORT: u16 = 8883;
const PLAIN_PORT: u16 = 1883;

/// How the broker's certificate chain is verified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrustPolicy {
    /// Native root store of the platform
    SystemRoots,
    /// PEM bundle on disk
    CaBundle(PathBuf),
    /// No TLS at all (`mqtt://` uris)
    Plaintext,
}

/// Everything needed to open the broker session, resolved from the static
/// configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDescriptor {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub credentials: Option<(String, String)>,
    pub protocol_version: u8,
    pub keep_alive: Duration,
    pub reconnect_delay: Duration,
    pub trust: TrustPolicy,
    pub capacity: usize,
}

/// Splits `host[:port]` or `[v6addr][:port]`, dropping the brackets.
fn split_authority(authority: &str) -> Option<(&str, Option<u16>)> {
    let (host, port) = match authority.strip_prefix('[') {
        Some(bracketed) => {
            let (host, tail) = bracketed.split_once(']')?;
            match tail {
                "" => (host, None),
                _ => (host, Some(tail.strip_prefix(':')?)),
            }
        }
        None => match authority.rsplit_once(':') {
            Some((host, port)) => (host, Some(port)),
            None => (authority, None),
        },
    };
    let port = match port {
        Some(port) => Some(port.parse::<u16>().ok()?),
        None => None,
    };
    Some((host, port))
}

impl SessionDescriptor {
    pub fn from_config(config: &BrokerConfig) -> Result<Self, ConfigError> {
        let (scheme, rest) = config
            .uri
            .split_once("://")
            .ok_or_else(|| ConfigError::BrokerUri(config.uri.clone()))?;

        let secure = match scheme.to_ascii_lowercase().as_str() {
            "mqtts" | "ssl" => true,
            "mqtt" | "tcp" => false,
            _ => return Err(ConfigError::BrokerUri(config.uri.clone())),
        };

        let authority = rest.split('/').next().unwrap_or_default();
        if authority.contains('@') {
            return Err(ConfigError::BrokerUriCredentials);
        }
        let (host, uri_port) = split_authority(authority)
            .ok_or_else(|| ConfigError::BrokerUri(config.uri.clone()))?;
        if host.is_empty() {
            return Err(ConfigError::BrokerUri(config.uri.clone()));
        }

        let default_port = if secure { SECURE_PORT } else { PLAIN_PORT };
        let port = config.port.or(uri_port).unwrap_or(default_port);

        let trust = match (&config.ca_bundle, secure) {
            (_, false) => TrustPolicy::Plaintext,
            (Some(path), true) => TrustPolicy::CaBundle(path.clone()),
            (None, true) => TrustPolicy::SystemRoots,
        };

        if config.protocol_version != SUPPORTED_PROTOCOL_VERSION {
            return Err(ConfigError::UnsupportedProtocol(config.protocol_version));
        }

        let credentials = config
            .username
            .clone()
            .map(|user| (user, config.password.clone().unwrap_or_default()));

        Ok(SessionDescriptor {
            host: host.to_string(),
            port,
            client_id: config.client_id.clone(),
            credentials,
            protocol_version: config.protocol_version,
            keep_alive: Duration::from_secs(config.keep_alive_secs),
            reconnect_delay: Duration::from_millis(config.reconnect_delay_ms),
            trust,
            capacity: config.capacity.max(1),
        })
    }
}
