//! Multiplexer configuration.

use crate::auth::ClaimPolicy;
use crate::error::{MuxError, Result};
use crate::types::CollectionKey;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;

/// Collections that require an authorization claim by default.
pub const DEFAULT_RESTRICTED_COLLECTIONS: &[&str] = &["security_logs"];

/// Multiplexer configuration.
///
/// Durations are written as integer milliseconds in JSON
/// (`ready_timeout_ms`, `ready_poll_interval_ms`, `identity_poll_interval_ms`).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MuxConfig {
    /// How long `init` waits for the remote store's ready signal.
    /// Default: 5000ms
    #[serde(rename = "ready_timeout_ms", with = "millis")]
    pub ready_timeout: Duration,

    /// Poll interval backing up the ready signal.
    /// Default: 100ms
    #[serde(rename = "ready_poll_interval_ms", with = "millis")]
    pub ready_poll_interval: Duration,

    /// Poll interval backing up identity-change notifications.
    /// Default: 500ms
    #[serde(rename = "identity_poll_interval_ms", with = "millis")]
    pub identity_poll_interval: Duration,

    /// Collections gated on an authorization claim.
    pub restricted_collections: BTreeSet<CollectionKey>,

    /// Claim that grants access to restricted collections.
    /// Default: "admin"
    pub authorization_claim: String,
}

impl Default for MuxConfig {
    fn default() -> Self {
        Self {
            ready_timeout: Duration::from_millis(5000),
            ready_poll_interval: Duration::from_millis(100),
            identity_poll_interval: Duration::from_millis(500),
            restricted_collections: DEFAULT_RESTRICTED_COLLECTIONS
                .iter()
                .map(|name| CollectionKey::from(*name))
                .collect(),
            authorization_claim: "admin".to_string(),
        }
    }
}

impl MuxConfig {
    /// Parse from JSON; missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("ready_timeout_ms", self.ready_timeout),
            ("ready_poll_interval_ms", self.ready_poll_interval),
            ("identity_poll_interval_ms", self.identity_poll_interval),
        ] {
            if value.is_zero() {
                return Err(MuxError::Config(format!("{} must be greater than zero", name)));
            }
        }
        if let Some(key) = self.restricted_collections.iter().find(|k| !k.is_valid()) {
            return Err(MuxError::InvalidCollection(key.as_str().to_string()));
        }
        if self.authorization_claim.is_empty() {
            return Err(MuxError::Config("authorization_claim must not be empty".to_string()));
        }
        Ok(())
    }

    /// Policy to hand to [`IdentitySdk::into_provider`](crate::auth::IdentitySdk::into_provider).
    pub fn claim_policy(&self) -> ClaimPolicy {
        ClaimPolicy::new(self.authorization_claim.clone())
    }

    pub fn with_restricted(mut self, collection: impl Into<CollectionKey>) -> Self {
        self.restricted_collections.insert(collection.into());
        self
    }

    pub fn with_authorization_claim(mut self, claim: impl Into<String>) -> Self {
        self.authorization_claim = claim.into();
        self
    }

    pub fn with_ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }

    pub fn with_identity_poll_interval(mut self, interval: Duration) -> Self {
        self.identity_poll_interval = interval;
        self
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = MuxConfig::default();
        assert_eq!(config.ready_timeout, Duration::from_millis(5000));
        assert_eq!(config.identity_poll_interval, Duration::from_millis(500));
        assert!(config.restricted_collections.contains("security_logs"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_json_partial() {
        let config = MuxConfig::from_json_str(
            r#"{ "ready_timeout_ms": 250, "restricted_collections": ["audit", "payouts"] }"#,
        )
        .unwrap();
        assert_eq!(config.ready_timeout, Duration::from_millis(250));
        assert_eq!(config.ready_poll_interval, Duration::from_millis(100));
        assert_eq!(config.restricted_collections.len(), 2);
        assert!(!config.restricted_collections.contains("security_logs"));
    }

    #[test]
    fn test_round_trip_uses_millis() {
        let json = serde_json::to_value(MuxConfig::default()).unwrap();
        assert_eq!(json["identity_poll_interval_ms"], 500);
    }

    #[test]
    fn test_rejects_invalid() {
        let err = MuxConfig::from_json_str(r#"{ "identity_poll_interval_ms": 0 }"#).unwrap_err();
        assert!(matches!(err, MuxError::Config(_)));

        let err = MuxConfig::from_json_str(r#"{ "restricted_collections": [""] }"#).unwrap_err();
        assert!(matches!(err, MuxError::InvalidCollection(_)));

        let err = MuxConfig::from_json_str("{ not json").unwrap_err();
        assert!(matches!(err, MuxError::Config(_)));
    }
}
