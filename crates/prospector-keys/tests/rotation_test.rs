//! Integration tests for key rotation and service fallback.

use async_trait::async_trait;
use prospector_keys::{
    ApiKey, FallbackChain, FallbackStep, KeyError, KeyRotationManager, KeyedService, ServiceError,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Scripted service: each key either works, is rate-limited or is rejected.
struct ScriptedService {
    id: String,
    limited_keys: Vec<String>,
    rejected_keys: Vec<String>,
    broken: bool,
    probe_ok: bool,
    calls: Mutex<Vec<String>>,
    probes: AtomicUsize,
}

impl ScriptedService {
    fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            limited_keys: Vec::new(),
            rejected_keys: Vec::new(),
            broken: false,
            probe_ok: false,
            calls: Mutex::new(Vec::new()),
            probes: AtomicUsize::new(0),
        }
    }

    fn limited(mut self, keys: &[&str]) -> Self {
        self.limited_keys = keys.iter().map(ToString::to_string).collect();
        self
    }

    fn rejected(mut self, keys: &[&str]) -> Self {
        self.rejected_keys = keys.iter().map(ToString::to_string).collect();
        self
    }

    fn broken(mut self) -> Self {
        self.broken = true;
        self
    }

    fn probe_ok(mut self) -> Self {
        self.probe_ok = true;
        self
    }

    fn lookup(&self, key: &ApiKey) -> Result<String, ServiceError> {
        self.calls
            .lock()
            .expect("calls lock")
            .push(key.expose().to_string());

        if self.broken {
            return Err(ServiceError::from_status(&self.id, 500, "internal error"));
        }
        if self.limited_keys.iter().any(|k| k == key.expose()) {
            return Err(ServiceError::from_status(&self.id, 429, "quota exceeded"));
        }
        if self.rejected_keys.iter().any(|k| k == key.expose()) {
            return Err(ServiceError::from_status(&self.id, 401, "invalid key"));
        }
        Ok(format!("{}:{}", self.id, key.expose()))
    }

    fn call_count(&self) -> usize {
        self.calls.lock().expect("calls lock").len()
    }
}

#[async_trait]
impl KeyedService for ScriptedService {
    fn service_id(&self) -> &str {
        &self.id
    }

    async fn probe(&self, _key: &ApiKey) -> Result<(), ServiceError> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        if self.probe_ok {
            Ok(())
        } else {
            Err(ServiceError::from_status(&self.id, 429, "still limited"))
        }
    }
}

fn keys(names: &[&str]) -> Vec<ApiKey> {
    names.iter().map(|k| ApiKey::new(*k)).collect()
}

#[tokio::test]
async fn test_exhausted_pool_is_asked_at_most_k_plus_one_times() {
    for k in 1..=5 {
        let names: Vec<String> = (0..k).map(|i| format!("key-{i}")).collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let service = ScriptedService::new("finder").limited(&refs);
        let manager = KeyRotationManager::new().with_pool("finder", keys(&refs));

        let mut next_key_calls = 0;
        loop {
            next_key_calls += 1;
            match manager.next_key("finder", &service).await {
                Ok(lease) => {
                    let err = service.lookup(&lease.key).expect_err("always limited");
                    manager.mark_exhausted(&lease, &err.to_string());
                }
                Err(err) => {
                    assert!(matches!(err, KeyError::AllExhausted { .. }));
                    break;
                }
            }
            assert!(next_key_calls <= k + 1, "pool of {k} kept handing out keys");
        }

        assert_eq!(next_key_calls, k + 1);
        assert_eq!(service.call_count(), k);
        assert_eq!(service.probes.load(Ordering::SeqCst), 1);
    }
}

#[tokio::test]
async fn test_chain_rotates_keys_before_switching_service() {
    let manager = KeyRotationManager::new()
        .with_pool("primary", keys(&["p1", "p2"]))
        .with_pool("secondary", keys(&["s1"]));
    let primary = Arc::new(ScriptedService::new("primary").limited(&["p1"]));
    let secondary = Arc::new(ScriptedService::new("secondary"));
    let services = vec![Arc::clone(&primary), Arc::clone(&secondary)];

    let chain = FallbackChain::new(
        "email discovery",
        vec![
            FallbackStep::new("primary", false),
            FallbackStep::new("secondary", false),
        ],
    );

    let result = chain
        .execute(&manager, &services, |service, lease| async move {
            service.lookup(&lease.key)
        })
        .await
        .expect("second primary key works");

    assert_eq!(result, "primary:p2");
    assert_eq!(secondary.call_count(), 0);
}

#[tokio::test]
async fn test_chain_falls_back_after_rejected_keys() {
    let manager = KeyRotationManager::new()
        .with_pool("primary", keys(&["p1"]))
        .with_pool("secondary", keys(&["s1"]));
    let services = vec![
        Arc::new(ScriptedService::new("primary").rejected(&["p1"])),
        Arc::new(ScriptedService::new("secondary")),
    ];

    let chain = FallbackChain::new(
        "email verification",
        vec![
            FallbackStep::new("primary", false),
            FallbackStep::new("secondary", false),
        ],
    );

    let result = chain
        .execute(&manager, &services, |service, lease| async move {
            service.lookup(&lease.key)
        })
        .await
        .expect("secondary serves the call");

    assert_eq!(result, "secondary:s1");
}

#[tokio::test]
async fn test_non_key_errors_do_not_rotate() {
    let manager = KeyRotationManager::new()
        .with_pool("primary", keys(&["p1", "p2"]))
        .with_pool("secondary", keys(&["s1"]));
    let primary = Arc::new(ScriptedService::new("primary").broken());
    let secondary = Arc::new(ScriptedService::new("secondary"));
    let services = vec![Arc::clone(&primary), Arc::clone(&secondary)];

    let chain = FallbackChain::new(
        "email discovery",
        vec![
            FallbackStep::new("primary", false),
            FallbackStep::new("secondary", false),
        ],
    );

    let err = chain
        .execute(&manager, &services, |service, lease| async move {
            service.lookup(&lease.key)
        })
        .await
        .expect_err("server error surfaces");

    assert!(matches!(
        err,
        KeyError::Service(ServiceError::Unavailable { .. })
    ));
    assert!(!err.is_exhaustion());
    assert_eq!(primary.call_count(), 1);
    assert_eq!(secondary.call_count(), 0);
    assert!(!manager.is_exhausted("primary"));
}

#[tokio::test]
async fn test_chain_hard_exhaustion() {
    let manager = KeyRotationManager::new()
        .with_pool("primary", keys(&["p1", "p2"]))
        .with_pool("secondary", keys(&["s1"]));
    let primary = Arc::new(ScriptedService::new("primary").limited(&["p1", "p2"]));
    let secondary = Arc::new(ScriptedService::new("secondary").limited(&["s1"]));
    let services = vec![Arc::clone(&primary), Arc::clone(&secondary)];

    let chain = FallbackChain::new(
        "email discovery",
        vec![
            FallbackStep::new("primary", true),
            FallbackStep::new("secondary", false),
        ],
    );

    let err = chain
        .execute(&manager, &services, |service, lease| async move {
            service.lookup(&lease.key)
        })
        .await
        .expect_err("everything limited");

    assert_eq!(
        err,
        KeyError::HardExhausted {
            chain: "email discovery".to_string()
        }
    );
    assert!(err.is_exhaustion());
    // One reset probe per pool, plus the final re-probe of the primary.
    assert_eq!(primary.probes.load(Ordering::SeqCst), 2);
    assert_eq!(secondary.probes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_final_reprobe_recovers_primary() {
    let manager = KeyRotationManager::new()
        .with_pool("primary", keys(&["p1"]))
        .with_pool("secondary", keys(&["s1"]));
    let chain = FallbackChain::new(
        "email discovery",
        vec![
            FallbackStep::new("primary", true),
            FallbackStep::new("secondary", false),
        ],
    );

    let limited = vec![
        Arc::new(ScriptedService::new("primary").limited(&["p1"])),
        Arc::new(ScriptedService::new("secondary").limited(&["s1"])),
    ];
    let err = chain
        .execute(&manager, &limited, |service, lease| async move {
            service.lookup(&lease.key)
        })
        .await
        .expect_err("everything limited");
    assert!(err.is_exhaustion());

    // The primary's quota has come back; only the final re-probe notices.
    let primary = Arc::new(ScriptedService::new("primary").probe_ok());
    let secondary = Arc::new(ScriptedService::new("secondary").limited(&["s1"]));
    let recovered = vec![Arc::clone(&primary), Arc::clone(&secondary)];
    let result = chain
        .execute(&manager, &recovered, |service, lease| async move {
            service.lookup(&lease.key)
        })
        .await
        .expect("primary recovers on re-probe");

    assert_eq!(result, "primary:p1");
    assert_eq!(primary.probes.load(Ordering::SeqCst), 1);
    assert_eq!(secondary.call_count(), 0);
}

#[tokio::test]
async fn test_missing_implementation_is_skipped() {
    let manager = KeyRotationManager::new()
        .with_pool("ghost", keys(&["g1"]))
        .with_pool("secondary", keys(&["s1"]));
    let services = vec![Arc::new(ScriptedService::new("secondary"))];

    let chain = FallbackChain::new(
        "email discovery",
        vec![
            FallbackStep::new("ghost", true),
            FallbackStep::new("secondary", false),
        ],
    );

    let result = chain
        .execute(&manager, &services, |service, lease| async move {
            service.lookup(&lease.key)
        })
        .await
        .expect("secondary serves the call");
    assert_eq!(result, "secondary:s1");
}
