//! Configuration types for the RPC client

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use turul_rpc_json_rpc::{Capability, CapabilitySet};

/// Main client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,

    /// Identity presented in the handshake
    pub credentials: Credentials,

    /// Capabilities requested during the handshake
    pub capabilities: CapabilitySet,

    /// Automatic reconnection after the connection drops
    pub reconnect: ReconnectPolicy,

    /// Timeout configurations
    pub timeouts: TimeoutConfig,

    /// Longest accepted frame in bytes
    pub max_frame_length: usize,
}

/// Client id and shared secret
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    pub client_id: String,
    pub secret: String,
}

impl Credentials {
    pub fn new(client_id: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            secret: secret.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("client_id", &self.client_id)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Reconnection policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    pub enabled: bool,

    /// Delay before each attempt
    #[serde(with = "duration_serde")]
    pub delay: Duration,

    /// Give up after this many attempts (None = keep trying)
    pub max_attempts: Option<u32>,
}

/// Timeout configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// TCP connect timeout
    #[serde(with = "duration_serde")]
    pub connect: Duration,

    /// Default timeout for individual requests
    #[serde(with = "duration_serde")]
    pub request: Duration,

    /// Time allowed for the handshake reply
    #[serde(with = "duration_serde")]
    pub handshake: Duration,

    /// Longest gap between two chunks of a stream
    #[serde(with = "duration_serde")]
    pub stream: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            credentials: Credentials::default(),
            capabilities: CapabilitySet::from([Capability::Streaming, Capability::BatchRequests]),
            reconnect: ReconnectPolicy::default(),
            timeouts: TimeoutConfig::default(),
            max_frame_length: 1024 * 1024, // 1MB
        }
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            delay: Duration::from_secs(1),
            max_attempts: None,
        }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(10),
            request: Duration::from_secs(30),
            handshake: Duration::from_secs(10),
            stream: Duration::from_secs(60),
        }
    }
}

impl ClientConfig {
    /// `host:port` string to connect to
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl ReconnectPolicy {
    /// Reconnect with a fixed delay and no attempt limit
    pub fn fixed(delay: Duration) -> Self {
        Self {
            enabled: true,
            delay,
            ..Default::default()
        }
    }

    /// Delay before a given attempt (1-based)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            Duration::ZERO
        } else {
            self.delay
        }
    }

    /// Check whether another attempt is allowed after `attempts` failures
    pub fn should_retry(&self, attempts: u32) -> bool {
        self.enabled && self.max_attempts.is_none_or(|max| attempts < max)
    }
}

// Helper module for Duration serialization
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_fixed_delay_by_default() {
        let policy = ReconnectPolicy::fixed(Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(0));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(5), Duration::from_millis(200));
    }

    #[test]
    fn test_retry_attempts() {
        let limited = ReconnectPolicy {
            max_attempts: Some(3),
            ..ReconnectPolicy::fixed(Duration::from_millis(10))
        };
        assert!(limited.should_retry(0));
        assert!(limited.should_retry(2));
        assert!(!limited.should_retry(3));

        let unlimited = ReconnectPolicy::fixed(Duration::from_millis(10));
        assert!(unlimited.should_retry(1_000));

        assert!(!ReconnectPolicy::default().should_retry(0));
    }

    #[test]
    fn test_config_serialization() {
        let config = ClientConfig {
            credentials: Credentials::new("worker", "s3cret"),
            ..Default::default()
        };
        let value = serde_json::to_value(&config).unwrap();
        assert_eq!(value["timeouts"]["request"], json!(30_000));
        assert_eq!(value["credentials"]["clientId"], json!("worker"));

        let back: ClientConfig = serde_json::from_value(value).unwrap();
        assert_eq!(back.credentials.client_id, "worker");
        assert_eq!(back.address(), "127.0.0.1:8000");
    }

    #[test]
    fn test_reconnect_options_from_json() {
        let config: ClientConfig = serde_json::from_value(json!({
            "host": "rpc.internal",
            "port": 7400,
            "reconnect": {"enabled": true, "delay": 250}
        }))
        .unwrap();
        assert!(config.reconnect.enabled);
        assert_eq!(config.reconnect.delay, Duration::from_millis(250));
        assert_eq!(config.reconnect.max_attempts, None);
        assert_eq!(config.address(), "rpc.internal:7400");
    }

    #[test]
    fn test_debug_redacts_secret() {
        let rendered = format!("{:?}", Credentials::new("worker", "hunter2"));
        assert!(rendered.contains("worker"));
        assert!(!rendered.contains("hunter2"));
    }
}
