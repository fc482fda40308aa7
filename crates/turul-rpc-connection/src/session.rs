use chrono::{DateTime, Utc};
use turul_rpc_json_rpc::{Capability, CapabilitySet, SessionContext};

/// Authenticated session bound to one connection
///
/// A session lives exactly as long as its connection; a reconnect always
/// produces a new one with a new id.
#[derive(Debug, Clone)]
pub struct Session {
    pub session_id: String,
    pub client_id: String,
    pub capabilities: CapabilitySet,
    pub created_at: DateTime<Utc>,
}

impl Session {
    pub fn new(
        session_id: impl Into<String>,
        client_id: impl Into<String>,
        capabilities: CapabilitySet,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            client_id: client_id.into(),
            capabilities,
            created_at: Utc::now(),
        }
    }

    pub fn supports(&self, capability: &Capability) -> bool {
        self.capabilities.contains(capability)
    }

    /// Context handed to handlers serving this session
    pub fn context(&self) -> SessionContext {
        SessionContext::new(
            self.session_id.clone(),
            self.client_id.clone(),
            self.capabilities.clone(),
        )
    }
}
