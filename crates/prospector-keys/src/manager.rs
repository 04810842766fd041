//! Thread-safe registry of key pools.

use crate::error::{KeyError, Result, ServiceError};
use crate::key::ApiKey;
use crate::pool::{KeyLease, KeyPool, PoolStatus, Selection};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;
use tracing::{debug, info, warn};

/// A service whose keys can be checked with a cheap call.
#[async_trait]
pub trait KeyedService: Send + Sync {
    /// Name of the key pool this service draws from.
    fn service_id(&self) -> &str;

    /// Issue the cheapest call that tells whether `key` is usable again.
    async fn probe(&self, key: &ApiKey) -> std::result::Result<(), ServiceError>;
}

/// Owns every service's key pool.
///
/// Pool state is behind a synchronous mutex that is never held across an
/// await; probes run with the lock released. Callers arriving while a reset
/// probe is in flight park on `probe_settled` until it resolves.
#[derive(Debug, Default)]
pub struct KeyRotationManager {
    pools: Mutex<HashMap<String, KeyPool>>,
    probe_settled: Notify,
}

impl KeyRotationManager {
    /// Create an empty manager.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build pools from configured credentials, skipping blank entries.
    #[must_use]
    pub fn from_credentials(credentials: &BTreeMap<String, Vec<String>>) -> Self {
        let manager = Self::new();
        for (service, keys) in credentials {
            let keys: Vec<ApiKey> = keys
                .iter()
                .map(|k| k.trim())
                .filter(|k| !k.is_empty())
                .map(ApiKey::from)
                .collect();
            if !keys.is_empty() {
                manager.register(service, keys);
            }
        }
        manager
    }

    /// Builder form of [`KeyRotationManager::register`].
    #[must_use]
    pub fn with_pool(self, service: &str, keys: Vec<ApiKey>) -> Self {
        self.register(service, keys);
        self
    }

    /// Register or replace the pool for `service`.
    pub fn register(&self, service: &str, keys: Vec<ApiKey>) {
        debug!("Registering {} key(s) for {}", keys.len(), service);
        self.lock().insert(service.to_string(), KeyPool::new(service, keys));
    }

    /// Whether `service` has at least one key.
    #[must_use]
    pub fn has_keys(&self, service: &str) -> bool {
        self.lock().get(service).is_some_and(|p| !p.is_empty())
    }

    /// Whether every key for `service` is currently exhausted.
    #[must_use]
    pub fn is_exhausted(&self, service: &str) -> bool {
        self.lock().get(service).map_or(true, KeyPool::all_exhausted)
    }

    /// Get the next usable key for `service`.
    ///
    /// When every key is exhausted the most recently exhausted key is probed
    /// once. A successful probe clears the pool and returns that key;
    /// otherwise the pool reports [`KeyError::AllExhausted`]. A pool of `k`
    /// keys that keeps failing therefore yields at most `k + 1` keys.
    ///
    /// Concurrent callers wait for an in-flight probe and then share its
    /// verdict instead of failing early.
    pub async fn next_key<S>(&self, service: &str, prober: &S) -> Result<KeyLease>
    where
        S: KeyedService + ?Sized,
    {
        loop {
            // Registered before looking at the pool so a verdict landing in
            // between is not missed.
            let settled = self.probe_settled.notified();
            let selection = {
                let mut pools = self.lock();
                let pool = pools
                    .get_mut(service)
                    .ok_or_else(|| KeyError::UnknownService {
                        service: service.to_string(),
                    })?;
                pool.select()
            };

            match selection {
                Selection::Key(lease) => return Ok(lease),
                Selection::Exhausted => {
                    return Err(KeyError::AllExhausted {
                        service: service.to_string(),
                    })
                }
                Selection::Probing => {
                    debug!("Waiting for the reset probe of {}", service);
                    settled.await;
                }
                Selection::ResetProbe(lease) => {
                    info!(
                        "All keys for {} exhausted, probing key #{} for a reset",
                        service, lease.index
                    );
                    let mut in_flight = ProbeInFlight {
                        manager: self,
                        service,
                        settled: false,
                    };
                    let result = self.finish_probe(lease, prober).await;
                    in_flight.settled = true;
                    return result;
                }
            }
        }
    }

    /// Probe the first key of `service` regardless of pool state.
    ///
    /// Used as the last resort of a fallback chain.
    pub async fn reprobe_first<S>(&self, service: &str, prober: &S) -> Result<KeyLease>
    where
        S: KeyedService + ?Sized,
    {
        let lease = self
            .lock()
            .get(service)
            .and_then(|p| p.lease_at(0))
            .ok_or_else(|| KeyError::AllExhausted {
                service: service.to_string(),
            })?;
        info!("Re-probing primary key for {}", service);
        self.finish_probe(lease, prober).await
    }

    /// Record that the leased key hit a limit or was rejected.
    pub fn mark_exhausted(&self, lease: &KeyLease, reason: &str) {
        warn!(
            "Key #{} for {} exhausted: {}",
            lease.index, lease.service, reason
        );
        if let Some(pool) = self.lock().get_mut(&lease.service) {
            pool.mark_exhausted(lease.index, reason);
        }
    }

    /// Allow every pool one more reset probe. Called at the start of a run.
    pub fn rearm_all(&self) {
        for pool in self.lock().values_mut() {
            pool.rearm();
        }
    }

    /// Snapshot of one pool.
    #[must_use]
    pub fn status(&self, service: &str) -> Option<PoolStatus> {
        self.lock().get(service).map(KeyPool::status)
    }

    async fn finish_probe<S>(&self, lease: KeyLease, prober: &S) -> Result<KeyLease>
    where
        S: KeyedService + ?Sized,
    {
        match prober.probe(&lease.key).await {
            Ok(()) => {
                info!("Key #{} for {} is usable again", lease.index, lease.service);
                if let Some(pool) = self.lock().get_mut(&lease.service) {
                    pool.reset(lease.index);
                }
                Ok(lease)
            }
            Err(err) => {
                debug!("Reset probe for {} failed: {}", lease.service, err);
                if let Some(pool) = self.lock().get_mut(&lease.service) {
                    pool.mark_exhausted(lease.index, &err.to_string());
                }
                Err(KeyError::AllExhausted {
                    service: lease.service,
                })
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, KeyPool>> {
        self.pools.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Releases the callers parked behind a reset probe.
///
/// A probe dropped before it settles (its caller was cancelled) leaves the
/// pool armed for another attempt.
struct ProbeInFlight<'a> {
    manager: &'a KeyRotationManager,
    service: &'a str,
    settled: bool,
}

impl Drop for ProbeInFlight<'_> {
    fn drop(&mut self) {
        if let Some(pool) = self.manager.lock().get_mut(self.service) {
            pool.end_probe();
            if !self.settled {
                pool.rearm();
            }
        }
        self.manager.probe_settled.notify_waiters();
    }
}
