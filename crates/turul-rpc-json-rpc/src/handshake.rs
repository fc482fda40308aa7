use serde::{Deserialize, Serialize};
use std::fmt;

use crate::capability::CapabilitySet;

/// Method name of the handshake request, always the first frame a client sends
pub const HANDSHAKE_METHOD: &str = "rpc.handshake";

/// Built-in liveness method answered with `"pong"`
pub const PING_METHOD: &str = "rpc.ping";

/// Handshake request params
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandshakeRequest {
    pub client_id: String,
    pub secret: String,
    #[serde(default)]
    pub requested_capabilities: CapabilitySet,
}

impl HandshakeRequest {
    pub fn new(
        client_id: impl Into<String>,
        secret: impl Into<String>,
        requested_capabilities: CapabilitySet,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            secret: secret.into(),
            requested_capabilities,
        }
    }
}

// Secrets never reach logs.
impl fmt::Debug for HandshakeRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandshakeRequest")
            .field("client_id", &self.client_id)
            .field("secret", &"<redacted>")
            .field("requested_capabilities", &self.requested_capabilities)
            .finish()
    }
}

/// Successful handshake result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandshakeReply {
    pub session_id: String,
    pub negotiated_capabilities: CapabilitySet,
}
