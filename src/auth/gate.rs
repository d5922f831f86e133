//! Authentication gate for first subscriptions.
//!
//! Per collection: `NoAuth -> Waiting -> Active`, or `Waiting -> NoAuth` when
//! every waiter unsubscribes first. While waiting, the collection holds a
//! [`PendingAuth`] entry in the registry; the gate itself owns only the
//! temporary identity listener and poll timer, both of which live inside
//! [`AuthGate::clear`] and are gone before it returns.

use super::provider::{AuthProvider, Identity};
use crate::error::AuthError;
use crate::subscriptions::Registration;
use crate::types::{CollectionKey, QueryOptions};
use crate::wait::{wait_until_ready, WaitError, WaitPolicy};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Whether a first subscription may open its watch right away.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Clearance {
    Immediate,
    Deferred,
}

#[derive(Debug, Error)]
pub enum GateError {
    #[error("Gate wait cancelled")]
    Cancelled,
    #[error("Authorization denied")]
    Denied,
    #[error(transparent)]
    Check(#[from] AuthError),
}

/// A collection's deferred first subscription.
pub(crate) struct PendingAuth {
    /// Distinguishes this attempt from a later one for the same collection.
    pub id: u64,
    pub query: QueryOptions,
    /// Subscribers in arrival order.
    pub waiters: Vec<Registration>,
    pub cancel: CancellationToken,
}

impl PendingAuth {
    /// Stop the wait; drops its listener and timer.
    pub fn cancel(&self) {
        self.cancel.cancel();
        for waiter in &self.waiters {
            waiter.retire();
        }
    }
}

pub struct AuthGate {
    provider: Arc<dyn AuthProvider>,
    restricted: BTreeSet<CollectionKey>,
    poll_interval: Duration,
}

impl AuthGate {
    pub fn new(
        provider: Arc<dyn AuthProvider>,
        restricted: BTreeSet<CollectionKey>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            provider,
            restricted,
            poll_interval,
        }
    }

    pub fn is_restricted(&self, collection: &CollectionKey) -> bool {
        self.restricted.contains(collection)
    }

    pub fn clearance(&self, collection: &CollectionKey) -> Clearance {
        if self.is_restricted(collection) || self.provider.current_identity().is_none() {
            Clearance::Deferred
        } else {
            Clearance::Immediate
        }
    }

    /// Wait for an identity and, for restricted collections, authorization.
    pub async fn clear(
        &self,
        collection: &CollectionKey,
        cancel: &CancellationToken,
    ) -> Result<Identity, GateError> {
        let identity = self.await_identity(collection, cancel).await?;

        if self.is_restricted(collection) {
            let allowed = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(GateError::Cancelled),
                result = self.provider.check_authorization(&identity, collection) => result?,
            };
            if !allowed {
                return Err(GateError::Denied);
            }
        }

        Ok(identity)
    }

    async fn await_identity(
        &self,
        collection: &CollectionKey,
        cancel: &CancellationToken,
    ) -> Result<Identity, GateError> {
        if let Some(identity) = self.provider.current_identity() {
            return Ok(identity);
        }

        debug!(collection = %collection, "waiting for identity");
        let wake = Arc::new(Notify::new());
        let listener = {
            let wake = Arc::clone(&wake);
            self.provider
                .on_identity_changed(Arc::new(move |_| wake.notify_one()))
        };

        let outcome = wait_until_ready(
            || self.provider.current_identity(),
            &wake,
            WaitPolicy {
                poll_interval: Some(self.poll_interval),
                timeout: None,
            },
            cancel,
        )
        .await;
        listener.unsubscribe();

        match outcome {
            Ok(identity) => {
                debug!(collection = %collection, uid = %identity.uid, "identity resolved");
                Ok(identity)
            }
            Err(WaitError::Cancelled) | Err(WaitError::TimedOut(_)) => Err(GateError::Cancelled),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::MemoryAuth;
    use serde_json::json;

    fn gate(auth: Arc<MemoryAuth>) -> AuthGate {
        AuthGate::new(
            auth,
            [CollectionKey::from("security_logs")].into_iter().collect(),
            Duration::from_millis(500),
        )
    }

    #[test]
    fn test_clearance() {
        let auth = Arc::new(MemoryAuth::new());
        let gate = gate(Arc::clone(&auth));
        assert_eq!(gate.clearance(&"orders".into()), Clearance::Deferred);

        auth.sign_in(Identity::new("u1"));
        assert_eq!(gate.clearance(&"orders".into()), Clearance::Immediate);
        assert_eq!(gate.clearance(&"security_logs".into()), Clearance::Deferred);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_via_notification_removes_listener() {
        let auth = Arc::new(MemoryAuth::new());
        let gate = gate(Arc::clone(&auth));

        let signer = Arc::clone(&auth);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            signer.sign_in(Identity::new("u1"));
        });

        let identity = gate
            .clear(&"orders".into(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(identity.uid, "u1");
        assert_eq!(auth.listener_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_via_poll() {
        let auth = Arc::new(MemoryAuth::new());
        let gate = gate(Arc::clone(&auth));

        let signer = Arc::clone(&auth);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            signer.sign_in_silently(Identity::new("u1"));
        });

        let start = tokio::time::Instant::now();
        let identity = gate
            .clear(&"orders".into(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(identity.uid, "u1");
        assert_eq!(start.elapsed(), Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_while_waiting() {
        let auth = Arc::new(MemoryAuth::new());
        let gate = gate(Arc::clone(&auth));
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let result = gate.clear(&"orders".into(), &cancel).await;
        assert!(matches!(result, Err(GateError::Cancelled)));
        assert_eq!(auth.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_restricted_denied_and_allowed() {
        let auth = Arc::new(MemoryAuth::signed_in(Identity::new("u1")));
        let gate = gate(Arc::clone(&auth));
        let cancel = CancellationToken::new();

        let result = gate.clear(&"security_logs".into(), &cancel).await;
        assert!(matches!(result, Err(GateError::Denied)));

        auth.sign_in(Identity::new("u1").with_claim("admin", json!(true)));
        assert!(gate.clear(&"security_logs".into(), &cancel).await.is_ok());

        // Unrestricted collections skip the check.
        assert!(gate.clear(&"orders".into(), &cancel).await.is_ok());
        assert_eq!(auth.check_count(), 2);
    }

    #[tokio::test]
    async fn test_check_error_fails_closed() {
        let auth = Arc::new(MemoryAuth::signed_in(
            Identity::new("u1").with_claim("admin", json!(true)),
        ));
        auth.fail_checks(true);
        let gate = gate(Arc::clone(&auth));

        let result = gate
            .clear(&"security_logs".into(), &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(GateError::Check(_))));
    }
}
