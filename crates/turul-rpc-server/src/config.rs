//! Configuration types for the RPC server

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;
use turul_rpc_json_rpc::{Capability, CapabilitySet};

use crate::auth::AuthConfig;

/// Main server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to listen on; port 0 picks a free port
    pub bind_address: SocketAddr,

    /// Capabilities offered to clients during the handshake
    pub advertised_capabilities: CapabilitySet,

    /// How long a new socket may take to complete the handshake
    #[serde(with = "duration_serde")]
    pub handshake_timeout: Duration,

    /// How long `stop` waits for in-flight requests before closing sockets
    #[serde(with = "duration_serde")]
    pub shutdown_grace: Duration,

    /// Maximum simultaneous connections (None = unlimited)
    pub max_connections: Option<usize>,

    /// Longest accepted frame in bytes
    pub max_frame_length: usize,

    /// Register the built-in `rpc.ping` method
    pub enable_ping: bool,

    /// Put handler error text into `error.data` of internal errors
    pub expose_internal_errors: bool,

    pub auth: AuthConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([127, 0, 0, 1], 8000)),
            advertised_capabilities: CapabilitySet::from([
                Capability::Streaming,
                Capability::BatchRequests,
            ]),
            handshake_timeout: Duration::from_secs(10),
            shutdown_grace: Duration::from_secs(5),
            max_connections: None,
            max_frame_length: 1024 * 1024, // 1MB
            enable_ping: true,
            expose_internal_errors: false,
            auth: AuthConfig::default(),
        }
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
