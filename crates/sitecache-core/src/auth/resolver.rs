//! Credential resolution with per-key coalescing of broker exchanges.
//!
//! `CredentialResolver` answers "give me a usable bearer credential for this
//! session" from the store when it can and from the broker when it must. For a
//! given key at most one broker exchange is in flight: later callers join the
//! pending exchange instead of starting their own.
//!
//! The exchange runs as its own task, so a caller that gives up waiting does
//! not cancel it for the others, and its result still lands in the store.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::{BoxFuture, FutureExt, Shared};
use tracing::{debug, info, warn};

use super::{BrokerError, CacheKey, Credential, SessionHandle, TokenBroker};
use crate::cache::CredentialStore;

type Exchange = Shared<BoxFuture<'static, Result<Credential, BrokerError>>>;
type Registry = Arc<Mutex<HashMap<CacheKey, Exchange>>>;

enum Lookup {
    Cached(Credential),
    Pending(Exchange),
}

/// Removes a finished exchange from the registry when dropped
struct Deregister {
    registry: Registry,
    key: CacheKey,
}

impl Drop for Deregister {
    fn drop(&mut self) {
        lock(&self.registry).remove(&self.key);
    }
}

pub struct CredentialResolver {
    store: Arc<CredentialStore>,
    broker: Arc<dyn TokenBroker>,
    provider: String,
    in_flight: Registry,
}

fn lock(registry: &Registry) -> MutexGuard<'_, HashMap<CacheKey, Exchange>> {
    // The map is only ever touched in short, non-panicking sections
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

impl CredentialResolver {
    pub fn new(
        store: Arc<CredentialStore>,
        broker: Arc<dyn TokenBroker>,
        provider: impl Into<String>,
    ) -> Self {
        Self {
            store,
            broker,
            provider: provider.into(),
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn store(&self) -> &Arc<CredentialStore> {
        &self.store
    }

    pub fn key_for(&self, session: &SessionHandle) -> CacheKey {
        CacheKey::derive(&self.provider, session)
    }

    /// Number of broker exchanges currently running
    pub fn pending_exchanges(&self) -> usize {
        lock(&self.in_flight).len()
    }

    /// A usable credential for `session`: cached if possible, else exchanged.
    /// Broker failures are returned unchanged.
    pub async fn resolve(&self, session: &SessionHandle) -> Result<Credential, BrokerError> {
        let key = self.key_for(session);
        if let Some(credential) = self.store.get(&key) {
            return Ok(credential);
        }
        self.resolve_uncached(&key, session).await
    }

    /// Drop the cached credential for `session`, then resolve again.
    /// Used after the upstream API rejected the cached credential.
    pub async fn force_refresh(&self, session: &SessionHandle) -> Result<Credential, BrokerError> {
        let key = self.key_for(session);
        info!(session = %session.redacted(), "Forcing credential refresh");
        if let Err(e) = self.store.invalidate(&key) {
            warn!(key = %key.short(), error = %e, "Failed to invalidate cached credential");
        }
        self.resolve_uncached(&key, session).await
    }

    async fn resolve_uncached(
        &self,
        key: &CacheKey,
        session: &SessionHandle,
    ) -> Result<Credential, BrokerError> {
        match self.join_or_start(key, session) {
            Lookup::Cached(credential) => Ok(credential),
            Lookup::Pending(exchange) => exchange.await,
        }
    }

    fn join_or_start(&self, key: &CacheKey, session: &SessionHandle) -> Lookup {
        let mut in_flight = lock(&self.in_flight);
        if let Some(existing) = in_flight.get(key) {
            debug!(key = %key.short(), "Joining in-flight broker exchange");
            return Lookup::Pending(existing.clone());
        }

        // An exchange may have finished between the caller's cache check and
        // taking the lock; its result is in the store by now.
        if let Some(credential) = self.store.get(key) {
            return Lookup::Cached(credential);
        }

        debug!(key = %key.short(), "Starting broker exchange");
        let broker = Arc::clone(&self.broker);
        let store = Arc::clone(&self.store);
        let registry = Arc::clone(&self.in_flight);
        let task_key = key.clone();
        let session = session.clone();

        // The task cannot deregister itself until this lock is released,
        // so the insert below always happens first.
        let task = tokio::spawn(async move {
            // Deregisters on every exit, including a panicking broker
            let _pending = Deregister {
                registry,
                key: task_key.clone(),
            };
            let result = broker.exchange(&session).await;
            if let Ok(ref credential) = result {
                if let Err(e) = store.put(&task_key, credential) {
                    warn!(key = %task_key.short(), error = %e, "Failed to persist credential");
                }
            }
            result
        });

        let exchange: Exchange = async move {
            task.await.unwrap_or_else(|e| {
                Err(BrokerError::TransientUnavailable(format!(
                    "broker exchange task failed: {}",
                    e
                )))
            })
        }
        .boxed()
        .shared();

        in_flight.insert(key.clone(), exchange.clone());
        Lookup::Pending(exchange)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use chrono::{Duration, Utc};
    use tokio::sync::Notify;

    /// Broker that counts exchanges and can be held open until released
    struct CountingBroker {
        calls: AtomicUsize,
        gate: Option<Arc<Notify>>,
        outcome: Result<(), BrokerError>,
        lifetime: Duration,
        panic_first: bool,
    }

    impl CountingBroker {
        fn ok() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                gate: None,
                outcome: Ok(()),
                lifetime: Duration::hours(1),
                panic_first: false,
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TokenBroker for CountingBroker {
        async fn exchange(&self, session: &SessionHandle) -> Result<Credential, BrokerError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some(ref gate) = self.gate {
                gate.notified().await;
            }
            if self.panic_first && n == 1 {
                panic!("broker blew up");
            }
            self.outcome.clone()?;
            Ok(Credential::new(
                format!("bearer-{}-{}", session.expose(), n),
                Utc::now() + self.lifetime,
                "microsoft_graph",
            ))
        }
    }

    fn resolver_with(broker: Arc<CountingBroker>, dir: &std::path::Path) -> CredentialResolver {
        let store = CredentialStore::open(dir, Duration::minutes(5)).unwrap();
        CredentialResolver::new(Arc::new(store), broker, "microsoft_graph")
    }

    #[tokio::test]
    async fn test_second_resolve_is_served_from_cache() {
        let dir = tempfile::tempdir().unwrap();
        let broker = Arc::new(CountingBroker::ok());
        let resolver = resolver_with(Arc::clone(&broker), dir.path());
        let session = SessionHandle::new("S1");

        let first = resolver.resolve(&session).await.unwrap();
        let second = resolver.resolve(&session).await.unwrap();
        assert_eq!(first.secret(), second.secret());
        assert_eq!(broker.calls(), 1);
    }

    #[tokio::test]
    async fn test_expired_entry_triggers_exactly_one_exchange() {
        let dir = tempfile::tempdir().unwrap();
        let broker = Arc::new(CountingBroker::ok());
        let resolver = resolver_with(Arc::clone(&broker), dir.path());
        let session = SessionHandle::new("S1");
        let key = resolver.key_for(&session);
        // Inside the 5 minute margin
        resolver
            .store()
            .put(&key, &Credential::new("stale", Utc::now() + Duration::minutes(2), "microsoft_graph"))
            .unwrap();

        let credential = resolver.resolve(&session).await.unwrap();
        assert_eq!(credential.secret(), "bearer-S1-1");
        assert_eq!(broker.calls(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_resolves_share_one_exchange() {
        let dir = tempfile::tempdir().unwrap();
        let gate = Arc::new(Notify::new());
        let broker = Arc::new(CountingBroker {
            gate: Some(Arc::clone(&gate)),
            ..CountingBroker::ok()
        });
        let resolver = Arc::new(resolver_with(Arc::clone(&broker), dir.path()));
        let session = SessionHandle::new("S1");

        let mut handles = Vec::new();
        for _ in 0..8 {
            let resolver = Arc::clone(&resolver);
            let session = session.clone();
            handles.push(tokio::spawn(async move { resolver.resolve(&session).await }));
        }
        while broker.calls() == 0 {
            tokio::task::yield_now().await;
        }
        // Let the waiters pile up on the pending exchange before releasing it
        for _ in 0..50 {
            tokio::task::yield_now().await;
        }
        gate.notify_one();

        for handle in handles {
            let credential = handle.await.unwrap().unwrap();
            assert_eq!(credential.secret(), "bearer-S1-1");
        }
        assert_eq!(broker.calls(), 1);
        assert_eq!(resolver.pending_exchanges(), 0);
    }

    #[tokio::test]
    async fn test_different_keys_are_not_serialized() {
        let dir = tempfile::tempdir().unwrap();
        let gate = Arc::new(Notify::new());
        let broker = Arc::new(CountingBroker {
            gate: Some(Arc::clone(&gate)),
            ..CountingBroker::ok()
        });
        let resolver = Arc::new(resolver_with(Arc::clone(&broker), dir.path()));

        let a = {
            let resolver = Arc::clone(&resolver);
            tokio::spawn(async move { resolver.resolve(&SessionHandle::new("A")).await })
        };
        let b = {
            let resolver = Arc::clone(&resolver);
            tokio::spawn(async move { resolver.resolve(&SessionHandle::new("B")).await })
        };
        while broker.calls() < 2 {
            tokio::task::yield_now().await;
        }
        assert_eq!(resolver.pending_exchanges(), 2);
        gate.notify_waiters();

        assert!(a.await.unwrap().is_ok());
        assert!(b.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_failure_is_propagated_unchanged_and_not_cached() {
        let dir = tempfile::tempdir().unwrap();
        let broker = Arc::new(CountingBroker {
            outcome: Err(BrokerError::ProviderNotConfigured),
            ..CountingBroker::ok()
        });
        let resolver = resolver_with(Arc::clone(&broker), dir.path());
        let session = SessionHandle::new("S1");

        assert_eq!(
            resolver.resolve(&session).await.unwrap_err(),
            BrokerError::ProviderNotConfigured
        );
        assert!(resolver.store().get(&resolver.key_for(&session)).is_none());
        // Nothing cached, so the next call asks the broker again
        let _ = resolver.resolve(&session).await;
        assert_eq!(broker.calls(), 2);
    }

    #[tokio::test]
    async fn test_force_refresh_replaces_cached_credential() {
        let dir = tempfile::tempdir().unwrap();
        let broker = Arc::new(CountingBroker::ok());
        let resolver = resolver_with(Arc::clone(&broker), dir.path());
        let session = SessionHandle::new("S1");

        let first = resolver.resolve(&session).await.unwrap();
        let refreshed = resolver.force_refresh(&session).await.unwrap();
        assert_ne!(first.secret(), refreshed.secret());
        assert_eq!(broker.calls(), 2);
        assert_eq!(
            resolver.resolve(&session).await.unwrap().secret(),
            refreshed.secret()
        );
    }

    #[tokio::test]
    async fn test_cancelled_waiter_does_not_cancel_exchange() {
        let dir = tempfile::tempdir().unwrap();
        let gate = Arc::new(Notify::new());
        let broker = Arc::new(CountingBroker {
            gate: Some(Arc::clone(&gate)),
            ..CountingBroker::ok()
        });
        let resolver = Arc::new(resolver_with(Arc::clone(&broker), dir.path()));
        let session = SessionHandle::new("S1");

        let abandoned = {
            let resolver = Arc::clone(&resolver);
            let session = session.clone();
            tokio::spawn(async move { resolver.resolve(&session).await })
        };
        while broker.calls() == 0 {
            tokio::task::yield_now().await;
        }
        let waiter = {
            let resolver = Arc::clone(&resolver);
            let session = session.clone();
            tokio::spawn(async move { resolver.resolve(&session).await })
        };
        for _ in 0..50 {
            tokio::task::yield_now().await;
        }
        abandoned.abort();
        gate.notify_one();

        assert_eq!(waiter.await.unwrap().unwrap().secret(), "bearer-S1-1");
        assert_eq!(broker.calls(), 1);
        assert!(resolver.store().get(&resolver.key_for(&session)).is_some());
    }

    #[tokio::test]
    async fn test_panicked_exchange_is_not_left_pending() {
        let dir = tempfile::tempdir().unwrap();
        let broker = Arc::new(CountingBroker {
            panic_first: true,
            ..CountingBroker::ok()
        });
        let resolver = resolver_with(Arc::clone(&broker), dir.path());
        let session = SessionHandle::new("S1");

        let err = resolver.resolve(&session).await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(resolver.pending_exchanges(), 0);

        // The next call reaches the broker again instead of replaying the failure
        let credential = resolver.resolve(&session).await.unwrap();
        assert_eq!(credential.secret(), "bearer-S1-2");
        assert_eq!(broker.calls(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_force_refresh_shares_one_exchange() {
        let dir = tempfile::tempdir().unwrap();
        let gate = Arc::new(Notify::new());
        let broker = Arc::new(CountingBroker {
            gate: Some(Arc::clone(&gate)),
            ..CountingBroker::ok()
        });
        let resolver = Arc::new(resolver_with(Arc::clone(&broker), dir.path()));
        let session = SessionHandle::new("S1");
        resolver
            .store()
            .put(
                &resolver.key_for(&session),
                &Credential::new("rejected", Utc::now() + Duration::hours(1), "microsoft_graph"),
            )
            .unwrap();

        let refreshes: Vec<_> = (0..2)
            .map(|_| {
                let resolver = Arc::clone(&resolver);
                let session = session.clone();
                tokio::spawn(async move { resolver.force_refresh(&session).await })
            })
            .collect();
        while broker.calls() == 0 {
            tokio::task::yield_now().await;
        }
        for _ in 0..50 {
            tokio::task::yield_now().await;
        }
        assert_eq!(resolver.pending_exchanges(), 1);
        assert_eq!(broker.calls(), 1);
        gate.notify_one();

        for refresh in refreshes {
            assert_eq!(refresh.await.unwrap().unwrap().secret(), "bearer-S1-1");
        }
        assert_eq!(broker.calls(), 1);
        assert_eq!(resolver.resolve(&session).await.unwrap().secret(), "bearer-S1-1");
    }
}
