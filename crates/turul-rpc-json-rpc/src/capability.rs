//! Capability tokens and negotiation

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Optional protocol feature a peer may support
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Capability {
    Streaming,
    BatchRequests,
    Compression,
    /// Any token the runtime does not interpret itself
    Custom(String),
}

impl Capability {
    pub fn as_str(&self) -> &str {
        match self {
            Capability::Streaming => "STREAMING",
            Capability::BatchRequests => "BATCH_REQUESTS",
            Capability::Compression => "COMPRESSION",
            Capability::Custom(token) => token,
        }
    }
}

impl From<String> for Capability {
    fn from(token: String) -> Self {
        match token.as_str() {
            "STREAMING" => Capability::Streaming,
            "BATCH_REQUESTS" => Capability::BatchRequests,
            "COMPRESSION" => Capability::Compression,
            _ => Capability::Custom(token),
        }
    }
}

impl From<&str> for Capability {
    fn from(token: &str) -> Self {
        Capability::from(token.to_string())
    }
}

impl From<Capability> for String {
    fn from(capability: Capability) -> Self {
        match capability {
            Capability::Custom(token) => token,
            other => other.as_str().to_string(),
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Set of capabilities, serialized as a JSON array of tokens
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CapabilitySet(BTreeSet<Capability>);

impl CapabilitySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, capability: Capability) -> bool {
        self.0.insert(capability)
    }

    pub fn contains(&self, capability: &Capability) -> bool {
        self.0.contains(capability)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Capability> {
        self.0.iter()
    }

    /// Capabilities both sides support. Never larger than either input.
    pub fn negotiate(&self, advertised: &CapabilitySet) -> CapabilitySet {
        CapabilitySet(self.0.intersection(&advertised.0).cloned().collect())
    }
}

impl FromIterator<Capability> for CapabilitySet {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<const N: usize> From<[Capability; N]> for CapabilitySet {
    fn from(capabilities: [Capability; N]) -> Self {
        capabilities.into_iter().collect()
    }
}

impl IntoIterator for CapabilitySet {
    type Item = Capability;
    type IntoIter = std::collections::btree_set::IntoIter<Capability>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl fmt::Display for CapabilitySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tokens: Vec<&str> = self.0.iter().map(Capability::as_str).collect();
        write!(f, "{{{}}}", tokens.join(","))
    }
}
