//! Ordered multi-service fallback.
//!
//! A chain walks its services in order. Each service rotates through its own
//! keys; once a service's pool is exhausted the chain moves on. When every
//! service is exhausted, steps marked `probe_on_exhaustion` get one more try
//! with their first key before the chain reports hard exhaustion.

use crate::error::{KeyError, Result, ServiceError};
use crate::manager::{KeyRotationManager, KeyedService};
use crate::pool::KeyLease;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// One service in a fallback chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FallbackStep {
    /// Service name, matching a key pool and a service implementation
    pub service: String,
    /// Re-probe this service's first key after the whole chain is exhausted
    #[serde(default)]
    pub probe_on_exhaustion: bool,
}

impl FallbackStep {
    /// Create a step.
    #[must_use]
    pub fn new(service: impl Into<String>, probe_on_exhaustion: bool) -> Self {
        Self {
            service: service.into(),
            probe_on_exhaustion,
        }
    }
}

/// Ordered list of services that can serve the same capability.
#[derive(Debug, Clone)]
pub struct FallbackChain {
    name: String,
    steps: Vec<FallbackStep>,
}

impl FallbackChain {
    /// Create a chain named after the capability it serves.
    #[must_use]
    pub fn new(name: impl Into<String>, steps: Vec<FallbackStep>) -> Self {
        Self {
            name: name.into(),
            steps,
        }
    }

    /// Chain name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Steps in order.
    #[must_use]
    pub fn steps(&self) -> &[FallbackStep] {
        &self.steps
    }

    /// Whether the chain has no steps.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Run `call` against the first service that still has a working key.
    ///
    /// Rate-limit and authentication failures exhaust the key and rotation
    /// continues. Any other failure is returned as-is without trying further
    /// services. Returns [`KeyError::HardExhausted`] once every step, final
    /// re-probes included, is out of keys.
    pub async fn execute<S, T, F, Fut>(
        &self,
        manager: &KeyRotationManager,
        services: &[Arc<S>],
        mut call: F,
    ) -> Result<T>
    where
        S: KeyedService + ?Sized,
        F: FnMut(Arc<S>, KeyLease) -> Fut,
        Fut: Future<Output = std::result::Result<T, ServiceError>>,
    {
        for step in &self.steps {
            let Some(service) = find_service(services, &step.service) else {
                warn!("{}: no implementation for {}, skipping", self.name, step.service);
                continue;
            };

            loop {
                let lease = match manager.next_key(&step.service, service.as_ref()).await {
                    Ok(lease) => lease,
                    Err(KeyError::AllExhausted { .. } | KeyError::UnknownService { .. }) => {
                        info!("{}: {} exhausted, switching to next service", self.name, step.service);
                        break;
                    }
                    Err(e) => return Err(e),
                };

                match call(Arc::clone(service), lease.clone()).await {
                    Ok(value) => return Ok(value),
                    Err(err) if err.is_key_failure() => {
                        manager.mark_exhausted(&lease, &err.to_string());
                    }
                    Err(err) => return Err(KeyError::Service(err)),
                }
            }
        }

        for step in self.steps.iter().filter(|s| s.probe_on_exhaustion) {
            let Some(service) = find_service(services, &step.service) else {
                continue;
            };
            let Ok(lease) = manager.reprobe_first(&step.service, service.as_ref()).await else {
                continue;
            };

            debug!("{}: {} recovered on re-probe", self.name, step.service);
            match call(Arc::clone(service), lease.clone()).await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_key_failure() => {
                    manager.mark_exhausted(&lease, &err.to_string());
                }
                Err(err) => return Err(KeyError::Service(err)),
            }
        }

        warn!("{}: every service exhausted", self.name);
        Err(KeyError::HardExhausted {
            chain: self.name.clone(),
        })
    }
}

fn find_service<'a, S>(services: &'a [Arc<S>], id: &str) -> Option<&'a Arc<S>>
where
    S: KeyedService + ?Sized,
{
    services.iter().find(|s| s.service_id() == id)
}
