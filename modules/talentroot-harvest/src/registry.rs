//! SourceRegistry: owns the per-source handles that combine configuration,
//! the rate limiter, and the proxy-rotation cursor, and drives the
//! healthy → degraded → unhealthy state machine.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use talentroot_common::{
    HealthState, Result, Source, SourceStatus, TalentrootError,
};
use talentroot_store::SourceStore;

use crate::fetch::{classify_status, FetchRequest, Fetcher};
use crate::proxy;
use crate::ratelimit::RateLimiter;

/// Streak thresholds for health transitions.
#[derive(Debug, Clone)]
pub struct HealthPolicy {
    /// Consecutive failures before demoting one step.
    pub failure_threshold: u32,
    /// Consecutive successes before promoting back to healthy.
    pub success_threshold: u32,
}

impl Default for HealthPolicy {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 3,
        }
    }
}

/// Live state for one source: config under a lock, the shared rate limiter,
/// and the round-robin cursor. Requests to a single source serialize through
/// this handle no matter how many workers are running.
pub struct SourceHandle {
    source: RwLock<Source>,
    pub limiter: RateLimiter,
    rr_cursor: AtomicUsize,
}

impl SourceHandle {
    fn new(source: Source) -> Self {
        let limiter = RateLimiter::new(source.rate_limit.clone());
        Self {
            source: RwLock::new(source),
            limiter,
            rr_cursor: AtomicUsize::new(0),
        }
    }

    pub fn snapshot(&self) -> Source {
        self.source.read().unwrap().clone()
    }
}

/// A granted outbound route: a proxy URL, or None for a permitted direct
/// connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyLease {
    pub proxy_url: Option<String>,
    pub proxy_index: Option<usize>,
}

pub struct SourceRegistry {
    handles: RwLock<HashMap<Uuid, Arc<SourceHandle>>>,
    store: Arc<dyn SourceStore>,
    health: HealthPolicy,
}

impl SourceRegistry {
    /// Build the registry from every source in the store.
    pub async fn load(store: Arc<dyn SourceStore>, health: HealthPolicy) -> Result<Self> {
        let sources = store.list().await?;
        let handles = sources
            .into_iter()
            .map(|s| (s.id, Arc::new(SourceHandle::new(s))))
            .collect();
        Ok(Self {
            handles: RwLock::new(handles),
            store,
            health,
        })
    }

    /// Register a new or updated source config.
    pub async fn register(&self, source: Source) -> Result<()> {
        self.store.upsert(&source).await?;
        self.handles
            .write()
            .unwrap()
            .insert(source.id, Arc::new(SourceHandle::new(source)));
        Ok(())
    }

    pub fn handle(&self, id: Uuid) -> Result<Arc<SourceHandle>> {
        self.handles
            .read()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or(TalentrootError::SourceNotFound(id))
    }

    pub fn source_ids(&self) -> Vec<Uuid> {
        self.handles.read().unwrap().keys().copied().collect()
    }

    pub fn is_available(&self, id: Uuid) -> bool {
        match self.handle(id) {
            Ok(handle) => handle.source.read().unwrap().is_available(Utc::now()),
            Err(_) => false,
        }
    }

    /// Choose the next proxy for a request to this source. Falls back to a
    /// direct connection only when the source permits it.
    pub fn next_proxy(&self, id: Uuid) -> Result<ProxyLease> {
        let handle = self.handle(id)?;
        let source = handle.source.read().unwrap();
        let cursor = handle.rr_cursor.fetch_add(1, Ordering::Relaxed);
        match proxy::select(&source.proxies, source.rotation, cursor, Utc::now()) {
            Some(index) => Ok(ProxyLease {
                proxy_url: Some(source.proxies[index].url.clone()),
                proxy_index: Some(index),
            }),
            None if source.allow_direct => Ok(ProxyLease {
                proxy_url: None,
                proxy_index: None,
            }),
            None => Err(TalentrootError::NoProxyAvailable(id)),
        }
    }

    /// Record a request outcome: proxy counters/cooldown, source stats, and
    /// the health streaks. Unhealthy flips operational status to error;
    /// recovery restores it.
    pub async fn record_outcome(
        &self,
        id: Uuid,
        lease: &ProxyLease,
        success: bool,
        response_ms: u64,
    ) -> Result<()> {
        let handle = self.handle(id)?;
        let snapshot = {
            let mut source = handle.source.write().unwrap();
            let now = Utc::now();

            let policy = source.proxy_policy.clone();
            if let Some(index) = lease.proxy_index {
                if let Some(proxy) = source.proxies.get_mut(index) {
                    proxy::record_outcome(proxy, success, response_ms, &policy, now);
                }
            }
            source.stats.record(success, response_ms);

            if success {
                source.consecutive_successes += 1;
                source.consecutive_failures = 0;
                if source.health != HealthState::Healthy
                    && source.consecutive_successes >= self.health.success_threshold
                {
                    let was_error = source.status == SourceStatus::Error;
                    source.health = HealthState::Healthy;
                    source.consecutive_successes = 0;
                    if was_error {
                        source.status = SourceStatus::Active;
                    }
                    info!(source = %source.name, "Source recovered to healthy");
                }
            } else {
                source.consecutive_failures += 1;
                source.consecutive_successes = 0;
                if source.consecutive_failures >= self.health.failure_threshold {
                    source.consecutive_failures = 0;
                    source.health = match source.health {
                        HealthState::Healthy => HealthState::Degraded,
                        HealthState::Degraded | HealthState::Unhealthy => HealthState::Unhealthy,
                    };
                    if source.health == HealthState::Unhealthy {
                        // Removes the source from active selection until the
                        // heartbeat sees it recover.
                        source.status = SourceStatus::Error;
                        warn!(source = %source.name, "Source demoted to unhealthy, disabling");
                    } else {
                        warn!(source = %source.name, "Source demoted to degraded");
                    }
                }
            }

            source.updated_at = now;
            source.clone()
        };

        self.store.upsert(&snapshot).await
    }

    /// Probe every source's base URL once. Runs outside the rate limiter so
    /// the health signal never competes with the request budget, and lets
    /// sources in error status earn their way back via the success streak.
    pub async fn heartbeat(&self, fetcher: &dyn Fetcher) {
        let ids = self.source_ids();
        for id in ids {
            let Ok(handle) = self.handle(id) else { continue };
            let (base_url, disabled) = {
                let source = handle.source.read().unwrap();
                (
                    source.base_url.clone(),
                    source.status == SourceStatus::Disabled,
                )
            };
            if disabled {
                continue;
            }

            let req = FetchRequest {
                url: base_url,
                headers: Vec::new(),
                proxy: None,
                timeout: Duration::from_secs(10),
            };
            let lease = ProxyLease {
                proxy_url: None,
                proxy_index: None,
            };
            let outcome = match fetcher.fetch(&req).await {
                Ok(resp) => (classify_status(resp.status).is_none(), resp.elapsed_ms),
                Err(_) => (false, 0),
            };
            if let Err(e) = self.record_outcome(id, &lease, outcome.0, outcome.1).await {
                warn!(source_id = %id, error = %e, "Heartbeat outcome write failed");
            }
        }
    }
}
