//! Speculative Executor (`spec.md` §4.4).
//!
//! Fires a pure capability ahead of the caller actually asking for it —
//! e.g. while a DAG run's earlier layers are still in flight, against
//! the arguments the planner already expects a later layer to supply —
//! caching the result for a cheap, immediate pickup later. A miss (not
//! yet finished, evicted, expired, or never speculated) just means the
//! caller falls back to a normal invocation; nothing about this service
//! is ever load-bearing for correctness, only latency (`spec.md` §8
//! scenario 5: a hit must be observable in under 10ms).
//!
//! Shaped after the teacher's prefetch-ahead idea in
//! `services/embedding_service.rs`'s batch chunking — do speculative
//! work eagerly, bounded by a cap, and let the synchronous path ignore
//! it entirely if it isn't ready — generalized from "prefetch embeddings"
//! to "prefetch a whole capability invocation".

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::{Mutex, Semaphore};
use uuid::Uuid;

use crate::domain::models::{Capability, Event, Fqdn, Invocation, SandboxLimits, SpeculationConfig};
use crate::domain::ports::EndpointClient;
use crate::infrastructure::sandbox::host::SandboxHost;
use crate::services::capability_store::CapabilityStore;
use crate::services::endpoint_pool::EndpointClientPool;
use crate::services::event_bus::EventBus;

#[derive(Debug, Clone, Copy)]
pub struct SpeculativeExecutorConfig {
    /// Maximum number of speculative runs in flight at once; a
    /// `speculate` call beyond this is dropped rather than queued
    /// (`spec.md` §4.4 "cap 4").
    pub cap: usize,
    pub ttl: Duration,
    /// Maximum cached results kept at once, evicted least-recently-used.
    pub cache_capacity: usize,
}

impl Default for SpeculativeExecutorConfig {
    fn default() -> Self {
        Self { cap: 4, ttl: Duration::from_secs(300), cache_capacity: 100 }
    }
}

impl From<&SpeculationConfig> for SpeculativeExecutorConfig {
    fn from(config: &SpeculationConfig) -> Self {
        Self { cap: config.cap, ttl: Duration::from_millis(config.ttl_ms), cache_capacity: config.cache_capacity }
    }
}

struct CacheEntry {
    value: Value,
    inserted_at: Instant,
}

/// A small hand-rolled LRU: the teacher has no cache of its own to
/// generalize here, so this follows the textbook "hashmap plus recency
/// queue" shape directly rather than pulling in a crate for one cache.
struct SpeculationCache {
    entries: HashMap<String, CacheEntry>,
    order: VecDeque<String>,
    capacity: usize,
}

impl SpeculationCache {
    fn new(capacity: usize) -> Self {
        Self { entries: HashMap::new(), order: VecDeque::new(), capacity: capacity.max(1) }
    }

    fn touch(&mut self, key: &str) {
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            self.order.remove(pos);
        }
    }

    fn insert(&mut self, key: String, value: Value) {
        self.touch(&key);
        self.order.push_back(key.clone());
        self.entries.insert(key, CacheEntry { value, inserted_at: Instant::now() });
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
            }
        }
    }

    /// Removes and returns the cached value for `key` if present and not
    /// yet past `ttl`. A speculative result is consumed at most once —
    /// expired or not, it never serves a second caller.
    fn take_if_fresh(&mut self, key: &str, ttl: Duration) -> Option<Value> {
        self.touch(key);
        let entry = self.entries.remove(key)?;
        if entry.inserted_at.elapsed() < ttl {
            Some(entry.value)
        } else {
            None
        }
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

fn cache_key(fqdn: &Fqdn, arguments: &Value) -> String {
    // `serde_json::Value`'s default map is a `BTreeMap` (no
    // `preserve_order` feature enabled), so this serialization is already
    // canonical — no extra key sorting needed to make two equivalent
    // argument objects collide on the same cache key.
    format!("{}::{}", fqdn.0, serde_json::to_string(arguments).unwrap_or_default())
}

fn capability_tool_ids(capability: &Capability) -> Vec<String> {
    capability
        .static_dag
        .nodes
        .iter()
        .filter_map(|n| match &n.invocation {
            Invocation::Tool(id) => Some(id.to_string()),
            Invocation::Capability(_) => None,
        })
        .collect()
}

pub struct SpeculativeExecutor {
    capability_store: Arc<CapabilityStore>,
    sandbox: Arc<SandboxHost>,
    endpoints: Arc<EndpointClientPool>,
    events: Arc<EventBus>,
    semaphore: Arc<Semaphore>,
    cache: Mutex<SpeculationCache>,
    ttl: Duration,
}

impl SpeculativeExecutor {
    #[must_use]
    pub fn new(
        capability_store: Arc<CapabilityStore>,
        sandbox: Arc<SandboxHost>,
        endpoints: Arc<EndpointClientPool>,
        events: Arc<EventBus>,
        config: SpeculativeExecutorConfig,
    ) -> Self {
        Self {
            capability_store,
            sandbox,
            endpoints,
            events,
            semaphore: Arc::new(Semaphore::new(config.cap.max(1))),
            cache: Mutex::new(SpeculationCache::new(config.cache_capacity)),
            ttl: config.ttl,
        }
    }

    /// Fires a speculative invocation of `fqdn` with `arguments` if the
    /// concurrency cap isn't already exhausted. Never blocks the caller;
    /// never surfaces an error — a capability that turns out impure, a
    /// lookup miss, or a sandbox failure all just mean nothing gets
    /// cached, identical to never having sped it up at all.
    pub fn speculate(self: &Arc<Self>, fqdn: Fqdn, arguments: Value) {
        let Ok(permit) = self.semaphore.clone().try_acquire_owned() else {
            tracing::debug!(fqdn = %fqdn, "speculative executor at capacity, skipping");
            return;
        };
        let executor = self.clone();
        tokio::spawn(async move {
            let _permit = permit;
            executor.run_and_cache(fqdn, arguments).await;
        });
    }

    async fn run_and_cache(&self, fqdn: Fqdn, arguments: Value) {
        let Ok(capability) = self.capability_store.lookup(&fqdn).await else { return };
        if !capability.pure {
            return;
        }

        let available_tools = capability_tool_ids(&capability);
        let outcome = self
            .sandbox
            .run(capability.code.clone(), arguments.clone(), &self.endpoints.as_map(), available_tools, SandboxLimits::default())
            .await;

        let Ok(outcome) = outcome else { return };
        let value = outcome.value.unwrap_or(Value::Null);
        let key = cache_key(&fqdn, &arguments);
        self.cache.lock().await.insert(key, value);
    }

    /// Looks for a fresh, unconsumed speculative result for `fqdn` run
    /// against `arguments`. On a hit, publishes the
    /// `TaskEnd{source: "speculation_hit"}` event `spec.md` §8 scenario 5
    /// requires and returns the cached value; on a miss, returns `None`
    /// with no observable side effect.
    pub async fn take_cached(&self, dag_run_id: Uuid, task_id: Uuid, fqdn: &Fqdn, arguments: &Value) -> Option<Value> {
        let key = cache_key(fqdn, arguments);
        let value = {
            let mut cache = self.cache.lock().await;
            cache.take_if_fresh(&key, self.ttl)?
        };
        self.events.publish(Event::TaskEnd {
            dag_run_id,
            task_id,
            success: true,
            latency_ms: 0,
            source: Some("speculation_hit".to_string()),
        });
        Some(value)
    }

    #[cfg(test)]
    async fn cached_len(&self) -> usize {
        self.cache.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_key_is_canonical_regardless_of_insertion_order_source() {
        let fqdn = Fqdn::build("casys", "pml", "files", "list", "deadbeef");
        let a = serde_json::json!({"b": 1, "a": 2});
        let b = serde_json::json!({"a": 2, "b": 1});
        assert_eq!(cache_key(&fqdn, &a), cache_key(&fqdn, &b));
    }

    #[test]
    fn lru_evicts_oldest_entry_past_capacity() {
        let mut cache = SpeculationCache::new(2);
        cache.insert("a".to_string(), Value::Null);
        cache.insert("b".to_string(), Value::Null);
        cache.insert("c".to_string(), Value::Null);
        assert_eq!(cache.len(), 2);
        assert!(cache.take_if_fresh("a", Duration::from_secs(60)).is_none());
        assert!(cache.entries.contains_key("c"));
    }

    #[test]
    fn expired_entry_is_not_returned() {
        let mut cache = SpeculationCache::new(10);
        cache.insert("a".to_string(), serde_json::json!(42));
        assert!(cache.take_if_fresh("a", Duration::from_nanos(0)).is_none());
    }

    #[test]
    fn fresh_entry_is_consumed_exactly_once() {
        let mut cache = SpeculationCache::new(10);
        cache.insert("a".to_string(), serde_json::json!(42));
        assert_eq!(cache.take_if_fresh("a", Duration::from_secs(60)), Some(serde_json::json!(42)));
        assert!(cache.take_if_fresh("a", Duration::from_secs(60)).is_none());
    }

    #[tokio::test]
    async fn take_cached_on_empty_cache_is_a_silent_miss() {
        let capability_store =
            Arc::new(CapabilityStore::new(Arc::new(crate::infrastructure::storage::SqliteCapabilityRepository::new(
                crate::infrastructure::storage::create_test_pool().await.unwrap(),
            )), crate::services::capability_store::FqdnPrefix { org: "casys".to_string(), project: "pml".to_string() }));
        let sandbox = Arc::new(SandboxHost::new("casys-pml-sandbox-worker"));
        let endpoints = Arc::new(EndpointClientPool::new(Default::default()));
        let events = Arc::new(EventBus::default());
        let executor = SpeculativeExecutor::new(capability_store, sandbox, endpoints, events, SpeculativeExecutorConfig::default());

        let fqdn = Fqdn::build("casys", "pml", "files", "list", "deadbeef");
        let result = executor.take_cached(Uuid::new_v4(), Uuid::new_v4(), &fqdn, &serde_json::json!({})).await;
        assert!(result.is_none());
        assert_eq!(executor.cached_len().await, 0);
    }
}
