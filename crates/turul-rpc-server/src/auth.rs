//! Client credentials and session issuance.
//!
//! Secrets are stored as salted SHA-256 digests and compared in constant
//! time. Lookups for unknown clients still hash against a dummy credential,
//! so a rejection takes the same work whether or not the client exists.

use std::collections::HashMap;
use std::fmt;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info, warn};
use turul_rpc_json_rpc::HandshakeRequest;

/// What to do when a client id is registered again with a different secret
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    #[default]
    Reject,
    Replace,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// When false, any client id is accepted and the secret is ignored
    pub require_auth: bool,
    pub duplicate_policy: DuplicatePolicy,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            require_auth: true,
            duplicate_policy: DuplicatePolicy::Reject,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("Authentication failed")]
    InvalidCredentials,

    #[error("Client '{0}' is already registered with a different secret")]
    DuplicateClient(String),

    #[error("Client id must not be empty")]
    InvalidClientId,
}

struct Credential {
    salt: [u8; 16],
    digest: [u8; 32],
}

impl Credential {
    fn new(secret: &str) -> Self {
        let salt = rand::random::<[u8; 16]>();
        Self {
            salt,
            digest: digest(&salt, secret),
        }
    }

    fn matches(&self, secret: &str) -> bool {
        constant_time_eq(&digest(&self.salt, secret), &self.digest)
    }
}

fn digest(salt: &[u8], secret: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(salt);
    hasher.update(secret.as_bytes());
    hasher.finalize().into()
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Registry of client credentials, shared by every connection of a server
pub struct AuthManager {
    config: AuthConfig,
    clients: RwLock<HashMap<String, Credential>>,
    dummy: Credential,
}

impl AuthManager {
    pub fn new(config: AuthConfig) -> Self {
        Self {
            config,
            clients: RwLock::new(HashMap::new()),
            dummy: Credential::new("unregistered"),
        }
    }

    /// Anonymous mode: every handshake succeeds
    pub fn anonymous() -> Self {
        Self::new(AuthConfig {
            require_auth: false,
            ..Default::default()
        })
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    /// Register a client. Registering the same pair again is a no-op.
    pub fn register_client(&self, client_id: &str, secret: &str) -> Result<(), AuthError> {
        if client_id.trim().is_empty() {
            return Err(AuthError::InvalidClientId);
        }

        let mut clients = self.clients.write();
        if let Some(existing) = clients.get(client_id) {
            if existing.matches(secret) {
                return Ok(());
            }
            match self.config.duplicate_policy {
                DuplicatePolicy::Reject => {
                    warn!(client_id = %client_id, "Refusing to overwrite registered client");
                    return Err(AuthError::DuplicateClient(client_id.to_string()));
                }
                DuplicatePolicy::Replace => {
                    info!(client_id = %client_id, "Replacing client credentials");
                }
            }
        }
        clients.insert(client_id.to_string(), Credential::new(secret));
        debug!(client_id = %client_id, "Client registered");
        Ok(())
    }

    pub fn client_count(&self) -> usize {
        self.clients.read().len()
    }

    /// Check a client id and secret pair
    pub fn validate(&self, client_id: &str, secret: &str) -> bool {
        if !self.config.require_auth {
            return true;
        }
        let clients = self.clients.read();
        match clients.get(client_id) {
            Some(credential) => credential.matches(secret),
            None => {
                let _ = self.dummy.matches(secret);
                false
            }
        }
    }

    /// Fresh session id: 256 random bits, hex encoded
    pub fn issue_session(&self, client_id: &str) -> String {
        let session_id = hex::encode(rand::random::<[u8; 32]>());
        debug!(client_id = %client_id, session_id = %session_id, "Session issued");
        session_id
    }

    /// Validate handshake credentials and issue a session in one step
    pub fn authenticate(&self, handshake: &HandshakeRequest) -> Result<String, AuthError> {
        if !self.validate(&handshake.client_id, &handshake.secret) {
            debug!(client_id = %handshake.client_id, "Credentials rejected");
            return Err(AuthError::InvalidCredentials);
        }
        Ok(self.issue_session(&handshake.client_id))
    }
}

impl Default for AuthManager {
    fn default() -> Self {
        Self::new(AuthConfig::default())
    }
}

impl fmt::Debug for AuthManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthManager")
            .field("config", &self.config)
            .field("clients", &self.client_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;
    use turul_rpc_json_rpc::CapabilitySet;

    #[test]
    fn test_valid_and_invalid_credentials() {
        let auth = AuthManager::default();
        auth.register_client("alice", "s3cret").unwrap();

        assert!(auth.validate("alice", "s3cret"));
        assert!(!auth.validate("alice", "wrong"));
        assert!(!auth.validate("bob", "s3cret"));
        assert!(!auth.validate("alice", ""));
    }

    #[test]
    fn test_reregistering_the_same_secret_is_idempotent() {
        let auth = AuthManager::default();
        auth.register_client("alice", "s3cret").unwrap();
        auth.register_client("alice", "s3cret").unwrap();
        assert_eq!(auth.client_count(), 1);
        assert!(auth.validate("alice", "s3cret"));
    }

    #[test]
    fn test_conflicting_registration_is_rejected_by_default() {
        let auth = AuthManager::default();
        auth.register_client("alice", "one").unwrap();

        let err = auth.register_client("alice", "two").unwrap_err();
        assert_eq!(err, AuthError::DuplicateClient("alice".to_string()));
        assert!(auth.validate("alice", "one"));
        assert!(!auth.validate("alice", "two"));
    }

    #[test]
    fn test_replace_policy_overwrites() {
        let auth = AuthManager::new(AuthConfig {
            duplicate_policy: DuplicatePolicy::Replace,
            ..Default::default()
        });
        auth.register_client("alice", "one").unwrap();
        auth.register_client("alice", "two").unwrap();
        assert!(!auth.validate("alice", "one"));
        assert!(auth.validate("alice", "two"));
    }

    #[test]
    fn test_empty_client_id_is_invalid() {
        let auth = AuthManager::default();
        assert_eq!(auth.register_client("  ", "x"), Err(AuthError::InvalidClientId));
    }

    #[test]
    fn test_session_ids_are_fresh() {
        let auth = AuthManager::default();
        let ids: HashSet<String> = (0..100).map(|_| auth.issue_session("alice")).collect();
        assert_eq!(ids.len(), 100);
        for id in &ids {
            assert_eq!(id.len(), 64);
            assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        }
    }

    #[test]
    fn test_authenticate_handshake() {
        let auth = AuthManager::default();
        auth.register_client("alice", "s3cret").unwrap();

        let good = HandshakeRequest::new("alice", "s3cret", CapabilitySet::new());
        let first = auth.authenticate(&good).unwrap();
        let second = auth.authenticate(&good).unwrap();
        assert_ne!(first, second);

        let bad = HandshakeRequest::new("alice", "nope", CapabilitySet::new());
        assert_eq!(auth.authenticate(&bad), Err(AuthError::InvalidCredentials));
    }

    #[test]
    fn test_anonymous_mode_accepts_anyone() {
        let auth = AuthManager::anonymous();
        let handshake = HandshakeRequest::new("whoever", "", CapabilitySet::new());
        assert!(auth.authenticate(&handshake).is_ok());
    }

    #[test]
    fn test_concurrent_registration_of_distinct_clients() {
        let auth = Arc::new(AuthManager::default());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let auth = Arc::clone(&auth);
                std::thread::spawn(move || {
                    for j in 0..25 {
                        auth.register_client(&format!("client-{i}-{j}"), "pw").unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(auth.client_count(), 200);
        assert!(auth.validate("client-7-24", "pw"));
    }

    #[test]
    fn test_debug_never_shows_secrets() {
        let auth = AuthManager::default();
        auth.register_client("alice", "hunter2").unwrap();
        let rendered = format!("{:?}", auth);
        assert!(!rendered.contains("hunter2"));
    }
}
