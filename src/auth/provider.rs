//! Authentication provider boundary and per-SDK adapters.
//!
//! The multiplexer only needs three things from an identity SDK: the current
//! identity, a change notification, and an authorization claim check for
//! restricted collections. Two SDK shapes are supported:
//!
//! - **Modular**: listener registration returns its own unsubscribe, and
//!   fresh token claims can be fetched asynchronously.
//! - **Namespaced**: listeners are registered and removed by id, and claims
//!   are read from the cached identity.
//!
//! The shape is chosen once, when the provider is built from an
//! [`IdentitySdk`], and never re-detected per call.

use crate::error::AuthError;
use crate::types::{CollectionKey, Unsubscribe};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// An authenticated user.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub uid: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub claims: BTreeMap<String, Value>,
}

impl Identity {
    pub fn new(uid: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            email: None,
            claims: BTreeMap::new(),
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn with_claim(mut self, name: impl Into<String>, value: Value) -> Self {
        self.claims.insert(name.into(), value);
        self
    }
}

/// Receives the new identity (or `None` on sign-out).
pub type IdentityHandler = Arc<dyn Fn(Option<Identity>) + Send + Sync>;

#[async_trait]
pub trait AuthProvider: Send + Sync {
    fn current_identity(&self) -> Option<Identity>;

    /// Register for identity changes. The returned handle removes the listener.
    fn on_identity_changed(&self, handler: IdentityHandler) -> Unsubscribe;

    /// Whether `identity` may read `resource`. Providers without claim support
    /// deny everything.
    async fn check_authorization(
        &self,
        identity: &Identity,
        resource: &CollectionKey,
    ) -> Result<bool, AuthError> {
        let _ = (identity, resource);
        Ok(false)
    }
}

/// Which claims grant access to restricted collections.
///
/// Access is granted when the claim named `claim` is `true`, or when the
/// `roles` claim is an array containing the collection name.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimPolicy {
    pub claim: String,
}

impl ClaimPolicy {
    pub fn new(claim: impl Into<String>) -> Self {
        Self {
            claim: claim.into(),
        }
    }

    pub fn permits(&self, claims: &BTreeMap<String, Value>, resource: &CollectionKey) -> bool {
        if claims.get(&self.claim) == Some(&Value::Bool(true)) {
            return true;
        }
        match claims.get("roles") {
            Some(Value::Array(roles)) => roles
                .iter()
                .any(|r| r.as_str() == Some(resource.as_str())),
            _ => false,
        }
    }
}

impl Default for ClaimPolicy {
    fn default() -> Self {
        Self::new("admin")
    }
}

/// An identity SDK whose listener registration returns an unsubscribe.
#[async_trait]
pub trait ModularAuthSdk: Send + Sync {
    fn current_user(&self) -> Option<Identity>;

    fn on_auth_state_changed(&self, handler: IdentityHandler) -> Unsubscribe;

    /// Claims from the user's ID token, refreshed from the server when asked.
    async fn id_token_claims(
        &self,
        identity: &Identity,
        force_refresh: bool,
    ) -> Result<BTreeMap<String, Value>, AuthError>;
}

/// An identity SDK with id-based listener registration.
pub trait NamespacedAuthSdk: Send + Sync {
    fn user(&self) -> Option<Identity>;

    fn add_auth_listener(&self, handler: IdentityHandler) -> u64;

    fn remove_auth_listener(&self, listener_id: u64);
}

/// The identity SDK backing a deployment.
#[derive(Clone)]
pub enum IdentitySdk {
    Modular(Arc<dyn ModularAuthSdk>),
    Namespaced(Arc<dyn NamespacedAuthSdk>),
}

impl IdentitySdk {
    /// Build the provider adapter for this SDK.
    pub fn into_provider(self, policy: ClaimPolicy) -> Arc<dyn AuthProvider> {
        match self {
            IdentitySdk::Modular(sdk) => Arc::new(ModularAuth { sdk, policy }),
            IdentitySdk::Namespaced(sdk) => Arc::new(NamespacedAuth { sdk, policy }),
        }
    }
}

struct ModularAuth {
    sdk: Arc<dyn ModularAuthSdk>,
    policy: ClaimPolicy,
}

#[async_trait]
impl AuthProvider for ModularAuth {
    fn current_identity(&self) -> Option<Identity> {
        self.sdk.current_user()
    }

    fn on_identity_changed(&self, handler: IdentityHandler) -> Unsubscribe {
        self.sdk.on_auth_state_changed(handler)
    }

    async fn check_authorization(
        &self,
        identity: &Identity,
        resource: &CollectionKey,
    ) -> Result<bool, AuthError> {
        let claims = self.sdk.id_token_claims(identity, true).await?;
        Ok(self.policy.permits(&claims, resource))
    }
}

struct NamespacedAuth {
    sdk: Arc<dyn NamespacedAuthSdk>,
    policy: ClaimPolicy,
}

#[async_trait]
impl AuthProvider for NamespacedAuth {
    fn current_identity(&self) -> Option<Identity> {
        self.sdk.user()
    }

    fn on_identity_changed(&self, handler: IdentityHandler) -> Unsubscribe {
        let listener_id = self.sdk.add_auth_listener(handler);
        let sdk = Arc::clone(&self.sdk);
        Unsubscribe::new(move || sdk.remove_auth_listener(listener_id))
    }

    async fn check_authorization(
        &self,
        identity: &Identity,
        resource: &CollectionKey,
    ) -> Result<bool, AuthError> {
        Ok(self.policy.permits(&identity.claims, resource))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[derive(Default)]
    struct FakeNamespaced {
        user: Mutex<Option<Identity>>,
        listeners: Mutex<HashMap<u64, IdentityHandler>>,
        next_id: AtomicU64,
    }

    impl NamespacedAuthSdk for FakeNamespaced {
        fn user(&self) -> Option<Identity> {
            self.user.lock().clone()
        }

        fn add_auth_listener(&self, handler: IdentityHandler) -> u64 {
            let id = self.next_id.fetch_add(1, Ordering::SeqCst);
            self.listeners.lock().insert(id, handler);
            id
        }

        fn remove_auth_listener(&self, listener_id: u64) {
            self.listeners.lock().remove(&listener_id);
        }
    }

    struct FakeModular {
        user: Option<Identity>,
        server_claims: BTreeMap<String, Value>,
    }

    #[async_trait]
    impl ModularAuthSdk for FakeModular {
        fn current_user(&self) -> Option<Identity> {
            self.user.clone()
        }

        fn on_auth_state_changed(&self, _handler: IdentityHandler) -> Unsubscribe {
            Unsubscribe::noop()
        }

        async fn id_token_claims(
            &self,
            _identity: &Identity,
            force_refresh: bool,
        ) -> Result<BTreeMap<String, Value>, AuthError> {
            assert!(force_refresh);
            Ok(self.server_claims.clone())
        }
    }

    #[test]
    fn test_claim_policy() {
        let policy = ClaimPolicy::default();
        let logs = CollectionKey::from("security_logs");

        let admin = Identity::new("u1").with_claim("admin", json!(true));
        assert!(policy.permits(&admin.claims, &logs));

        let role = Identity::new("u2").with_claim("roles", json!(["security_logs"]));
        assert!(policy.permits(&role.claims, &logs));

        let stringly = Identity::new("u3").with_claim("admin", json!("true"));
        assert!(!policy.permits(&stringly.claims, &logs));
        assert!(!policy.permits(&BTreeMap::new(), &logs));
    }

    #[test]
    fn test_namespaced_listener_removed_by_id() {
        let sdk = Arc::new(FakeNamespaced::default());
        let provider = IdentitySdk::Namespaced(sdk.clone()).into_provider(ClaimPolicy::default());

        let handle = provider.on_identity_changed(Arc::new(|_| {}));
        assert_eq!(sdk.listeners.lock().len(), 1);
        handle.unsubscribe();
        assert!(sdk.listeners.lock().is_empty());

        *sdk.user.lock() = Some(Identity::new("u1"));
        assert_eq!(provider.current_identity().map(|i| i.uid), Some("u1".to_string()));
    }

    #[tokio::test]
    async fn test_modular_uses_fresh_claims() {
        // Cached identity lacks the claim; the refreshed token carries it.
        let identity = Identity::new("u1");
        let sdk = FakeModular {
            user: Some(identity.clone()),
            server_claims: [("admin".to_string(), json!(true))].into_iter().collect(),
        };
        let provider = IdentitySdk::Modular(Arc::new(sdk)).into_provider(ClaimPolicy::default());

        let allowed = provider
            .check_authorization(&identity, &"security_logs".into())
            .await
            .unwrap();
        assert!(allowed);
    }
}
