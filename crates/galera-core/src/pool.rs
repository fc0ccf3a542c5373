//! Rotating pool of egress identities.
//!
//! The healthy set is an immutable `Arc<Vec<_>>` snapshot: readers clone the
//! `Arc` and never block on a rebuild, writers swap in a new snapshot. Failure
//! counts live in a separate concurrent map keyed by proxy URL.
//!
//! ```text
//! acquire() --stale?--> refresh() --candidates--> check each --> swap snapshot
//!     |
//!     +--> round-robin over snapshot, skip proxies at max_failures
//! mark_failed() --count >= max_failures--> copy-on-write eviction
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Instant;

use dashmap::DashMap;
use rand::Rng;

use crate::config::PoolConfig;
use crate::models::{Identity, ProxyEndpoint};
use crate::traits::ProxyProvider;

const NO_AGENT: usize = usize::MAX;

pub struct IdentityPool<P> {
    provider: P,
    config: PoolConfig,
    healthy: RwLock<Arc<Vec<ProxyEndpoint>>>,
    failures: DashMap<String, u32>,
    cursor: AtomicUsize,
    last_agent: AtomicUsize,
    refreshed_at: Mutex<Option<Instant>>,
    /// Serialises rebuilds so concurrent acquires trigger one refresh.
    refresh_gate: tokio::sync::Mutex<()>,
}

impl<P: ProxyProvider> IdentityPool<P> {
    /// Creates an empty pool; the first `acquire` populates it.
    pub fn new(provider: P, config: PoolConfig) -> Self {
        Self {
            provider,
            config,
            healthy: RwLock::new(Arc::new(Vec::new())),
            failures: DashMap::new(),
            cursor: AtomicUsize::new(0),
            last_agent: AtomicUsize::new(NO_AGENT),
            refreshed_at: Mutex::new(None),
            refresh_gate: tokio::sync::Mutex::new(()),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Next healthy identity in round-robin order, or `None` when the pool is empty.
    pub async fn acquire(&self) -> Option<Identity> {
        if self.is_stale() {
            let _gate = self.refresh_gate.lock().await;
            // Another task may have rebuilt the set while we waited.
            if self.is_stale() {
                self.rebuild().await;
            }
        }

        let snapshot = self.snapshot();
        if snapshot.is_empty() {
            return None;
        }

        for _ in 0..snapshot.len() {
            let index = self.cursor.fetch_add(1, Ordering::Relaxed) % snapshot.len();
            let proxy = &snapshot[index];
            let failure_count = self.failure_count(proxy);
            if failure_count >= self.config.max_failures {
                continue;
            }
            return Some(Identity {
                proxy: Some(proxy.clone()),
                user_agent: self.next_user_agent(),
                failure_count,
            });
        }
        None
    }

    /// An identity without a proxy, with a freshly rotated user agent.
    pub fn direct_identity(&self) -> Identity {
        Identity::direct(self.next_user_agent())
    }

    /// Records a failure; evicts the proxy once it reaches `max_failures`.
    pub fn mark_failed(&self, identity: &Identity) {
        let Some(proxy) = &identity.proxy else {
            return;
        };
        let key = proxy.key();
        let count = {
            let mut entry = self.failures.entry(key.clone()).or_insert(0);
            *entry += 1;
            *entry
        };

        if count < self.config.max_failures {
            tracing::debug!(component = "pool", proxy = %key, failures = count, "Proxy failure recorded");
            return;
        }

        let mut healthy = write_lock(&self.healthy);
        if healthy.iter().any(|p| p.key() == key) {
            let remaining: Vec<ProxyEndpoint> =
                healthy.iter().filter(|p| p.key() != key).cloned().collect();
            *healthy = Arc::new(remaining);
            tracing::warn!(
                component = "pool",
                proxy = %key,
                failures = count,
                remaining = healthy.len(),
                "Proxy evicted from healthy set"
            );
        }
    }

    /// Rebuilds the healthy set from the provider.
    pub async fn refresh(&self) {
        let _gate = self.refresh_gate.lock().await;
        self.rebuild().await;
    }

    pub fn healthy_count(&self) -> usize {
        self.snapshot().len()
    }

    pub fn failure_count(&self, proxy: &ProxyEndpoint) -> u32 {
        self.failures.get(&proxy.key()).map(|c| *c).unwrap_or(0)
    }

    fn snapshot(&self) -> Arc<Vec<ProxyEndpoint>> {
        let guard = self
            .healthy
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(&guard)
    }

    fn is_stale(&self) -> bool {
        match *lock(&self.refreshed_at) {
            None => true,
            Some(at) => at.elapsed() > self.config.refresh_interval,
        }
    }

    /// Caller must hold `refresh_gate`.
    async fn rebuild(&self) {
        let candidates = match self.provider.candidates().await {
            Ok(candidates) => candidates,
            Err(e) => {
                tracing::warn!(component = "pool", error = %e, "Proxy source failed, keeping previous set");
                *lock(&self.refreshed_at) = Some(Instant::now());
                return;
            }
        };

        let total = candidates.len();
        let healthy = if self.config.verify {
            let checks = candidates.iter().map(|proxy| async move {
                let outcome = self
                    .provider
                    .health_check(proxy, &self.config.test_url, self.config.check_timeout)
                    .await;
                (proxy, outcome)
            });
            futures::future::join_all(checks)
                .await
                .into_iter()
                .filter_map(|(proxy, outcome)| match outcome {
                    Ok(()) => Some(proxy.clone()),
                    Err(e) => {
                        tracing::debug!(component = "pool", proxy = %proxy.display_url(), error = %e, "Proxy health check failed");
                        None
                    }
                })
                .collect()
        } else {
            candidates
        };

        let count = healthy.len();
        *write_lock(&self.healthy) = Arc::new(healthy);
        self.failures.clear();
        *lock(&self.refreshed_at) = Some(Instant::now());
        tracing::info!(component = "pool", healthy = count, candidates = total, "Identity pool refreshed");
    }

    /// Random agent, different from the previous one when there is a choice.
    fn next_user_agent(&self) -> String {
        let agents = &self.config.user_agents;
        if agents.is_empty() {
            return crate::config::DEFAULT_USER_AGENTS[0].to_string();
        }
        let mut index = rand::rng().random_range(0..agents.len());
        let previous = self.last_agent.load(Ordering::Relaxed);
        if agents.len() > 1 && index == previous {
            index = (index + 1) % agents.len();
        }
        self.last_agent.store(index, Ordering::Relaxed);
        agents[index].clone()
    }
}

/// Lock a mutex, recovering from poisoning.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write_lock<T>(rwlock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    rwlock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}
