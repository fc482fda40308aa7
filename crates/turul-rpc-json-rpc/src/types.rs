use serde::{Deserialize, Serialize};
use std::fmt;

/// Correlation id carried by requests and their responses.
///
/// Ids are strings chosen by the sender and must be unique among the
/// sender's outstanding requests on one connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for RequestId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for RequestId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// JSON-RPC protocol version marker
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum JsonRpcVersion {
    #[default]
    #[serde(rename = "2.0")]
    V2_0,
}

impl fmt::Display for JsonRpcVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("2.0")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_id_is_a_plain_string_on_the_wire() {
        let id = RequestId::from("req_7");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"req_7\"");

        let parsed: RequestId = serde_json::from_str("\"abc\"").unwrap();
        assert_eq!(parsed.as_str(), "abc");
    }

    #[test]
    fn test_numeric_ids_are_rejected() {
        assert!(serde_json::from_str::<RequestId>("42").is_err());
    }

    #[test]
    fn test_version_only_accepts_2_0() {
        assert_eq!(serde_json::to_string(&JsonRpcVersion::V2_0).unwrap(), "\"2.0\"");
        assert!(serde_json::from_str::<JsonRpcVersion>("\"1.0\"").is_err());
    }
}
