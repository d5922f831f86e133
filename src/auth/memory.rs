//! In-memory authentication provider.

use super::provider::{AuthProvider, ClaimPolicy, Identity, IdentityHandler};
use crate::error::AuthError;
use crate::types::{CollectionKey, Unsubscribe};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Default)]
struct AuthState {
    identity: Option<Identity>,
    listeners: HashMap<u64, IdentityHandler>,
    grants: HashSet<(String, CollectionKey)>,
}

/// Authentication provider backed by process memory.
///
/// Authorization succeeds when the identity has an explicit grant for the
/// collection, or when its claims satisfy the [`ClaimPolicy`].
pub struct MemoryAuth {
    state: Arc<Mutex<AuthState>>,
    policy: ClaimPolicy,
    next_id: AtomicU64,
    checks: AtomicUsize,
    failing_checks: AtomicBool,
}

impl MemoryAuth {
    /// Signed out.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(AuthState::default())),
            policy: ClaimPolicy::default(),
            next_id: AtomicU64::new(1),
            checks: AtomicUsize::new(0),
            failing_checks: AtomicBool::new(false),
        }
    }

    /// Already signed in as `identity`.
    pub fn signed_in(identity: Identity) -> Self {
        let auth = Self::new();
        auth.state.lock().identity = Some(identity);
        auth
    }

    pub fn with_policy(mut self, policy: ClaimPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Sign in and notify listeners.
    pub fn sign_in(&self, identity: Identity) {
        self.set_identity(Some(identity), true);
    }

    /// Sign in without notifying listeners; only a poll will notice.
    pub fn sign_in_silently(&self, identity: Identity) {
        self.set_identity(Some(identity), false);
    }

    pub fn sign_out(&self) {
        self.set_identity(None, true);
    }

    /// Allow `uid` to read the restricted `collection`.
    pub fn grant(&self, uid: impl Into<String>, collection: impl Into<CollectionKey>) {
        self.state
            .lock()
            .grants
            .insert((uid.into(), collection.into()));
    }

    /// Make every authorization check return an error.
    pub fn fail_checks(&self, failing: bool) {
        self.failing_checks.store(failing, Ordering::SeqCst);
    }

    pub fn listener_count(&self) -> usize {
        self.state.lock().listeners.len()
    }

    pub fn check_count(&self) -> usize {
        self.checks.load(Ordering::SeqCst)
    }

    fn set_identity(&self, identity: Option<Identity>, notify: bool) {
        let handlers: Vec<IdentityHandler> = {
            let mut state = self.state.lock();
            state.identity = identity.clone();
            if !notify {
                return;
            }
            state.listeners.values().cloned().collect()
        };
        for handler in handlers {
            handler(identity.clone());
        }
    }
}

impl Default for MemoryAuth {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AuthProvider for MemoryAuth {
    fn current_identity(&self) -> Option<Identity> {
        self.state.lock().identity.clone()
    }

    fn on_identity_changed(&self, handler: IdentityHandler) -> Unsubscribe {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.state.lock().listeners.insert(id, handler);

        let state = Arc::clone(&self.state);
        Unsubscribe::new(move || {
            state.lock().listeners.remove(&id);
        })
    }

    async fn check_authorization(
        &self,
        identity: &Identity,
        resource: &CollectionKey,
    ) -> Result<bool, AuthError> {
        self.checks.fetch_add(1, Ordering::SeqCst);
        if self.failing_checks.load(Ordering::SeqCst) {
            return Err(AuthError("claims service unavailable".to_string()));
        }
        let granted = self
            .state
            .lock()
            .grants
            .contains(&(identity.uid.clone(), resource.clone()));
        Ok(granted || self.policy.permits(&identity.claims, resource))
    }
}
