//! Capability Store (`spec.md` §4.2).
//!
//! Capabilities are crystallized, reusable workflows: the first time an
//! execution trace succeeds with code whose normalized hash hasn't been
//! seen before, it becomes a new capability with initial counters (1, 0).
//! Later identical-hash successes just bump the existing counters. New
//! subsystem with no direct teacher counterpart (the teacher has no
//! crystallization concept); the insert/get/update-counters split follows
//! the same immutable-row/mutable-counters pattern the domain model
//! (`domain::models::capability`) already establishes, which in turn
//! mirrors the teacher's breaker-identity/breaker-state split in
//! `services/circuit_breaker.rs`.

use std::sync::Arc;

use rand_distr::{Beta, Distribution};

use crate::domain::errors::{MediatorError, MediatorResult};
use crate::domain::models::{Capability, CapabilityStats, Embedding, Fqdn, StaticDag};
use crate::domain::ports::CapabilityRepository;
use crate::services::code_hash;

/// Default cosine-similarity threshold a capability's intent embedding
/// must clear to be considered a match (`spec.md` §4.2).
pub const DEFAULT_MATCH_THRESHOLD: f64 = 0.85;

/// How much a capability's Thompson-sampled reliability can discount the
/// base threshold. A capability sampled at the top of its Beta posterior
/// gets up to this much shaved off what it needs to match; an unproven or
/// failure-heavy capability gets none.
const ADAPTIVE_SPREAD: f64 = 0.1;

/// Organization/project prefix every FQDN in this deployment shares.
#[derive(Debug, Clone)]
pub struct FqdnPrefix {
    pub org: String,
    pub project: String,
}

pub struct CapabilityStore {
    repository: Arc<dyn CapabilityRepository>,
    prefix: FqdnPrefix,
}

impl CapabilityStore {
    #[must_use]
    pub fn new(repository: Arc<dyn CapabilityRepository>, prefix: FqdnPrefix) -> Self {
        Self { repository, prefix }
    }

    /// `try_match(intent_embedding, threshold)` — the best capability whose
    /// intent embedding clears an adaptive, per-capability threshold derived
    /// from a Thompson sample of `Beta(successes + 1, failures + 1)`. A
    /// capability with a strong success history samples high more often
    /// and so needs a little less semantic similarity to be accepted;
    /// an unproven or failure-heavy one is held to the full threshold.
    pub async fn try_match(&self, intent_embedding: &Embedding, threshold: f64) -> MediatorResult<Option<Capability>> {
        let candidates = self.repository.list().await?;
        let mut best: Option<(Capability, f64)> = None;

        for capability in candidates {
            let similarity = f64::from(intent_embedding.cosine_similarity(&capability.intent_embedding.0));
            let stats = self.repository.get_stats(&capability.fqdn).await?;
            let (alpha, beta) = stats.beta_params();
            let sample = sample_beta(alpha, beta);
            let effective_threshold = threshold - sample * ADAPTIVE_SPREAD;

            if similarity < effective_threshold {
                continue;
            }
            match &best {
                Some((_, best_similarity)) if *best_similarity >= similarity => {}
                _ => best = Some((capability, similarity)),
            }
        }

        Ok(best.map(|(capability, _)| capability))
    }

    /// `crystallize(code, static_dag, intent_embedding, intent_text, pure,
    /// dependencies, success)` — inserts a new capability if the code's
    /// normalized hash is novel, otherwise records another success against
    /// the existing one. Never invoked on a failed trace; callers use
    /// [`CapabilityStore::record_failure`] for those.
    pub async fn crystallize(
        &self,
        code: &str,
        static_dag: StaticDag,
        intent_embedding: Embedding,
        intent_text: &str,
        pure: bool,
        dependencies: Vec<Fqdn>,
        latency_ms: u64,
    ) -> MediatorResult<Capability> {
        let code_hash = code_hash::hash(code);

        if let Some(existing) = self.repository.get_by_code_hash(&code_hash).await? {
            self.repository
                .update_stats(&existing.fqdn, Box::new(move |stats| stats.with_success(latency_ms)))
                .await?;
            return Ok(existing);
        }

        let (namespace, action) = derive_namespace_action(intent_text);
        let fqdn = Fqdn::build(&self.prefix.org, &self.prefix.project, &namespace, &action, &code_hash);

        let capability = Capability {
            fqdn: fqdn.clone(),
            code_hash,
            code: code.to_string(),
            static_dag,
            intent_embedding,
            created_at: chrono::Utc::now(),
            pure,
            dependencies,
        };
        self.repository.insert(&capability).await?;
        self.repository
            .update_stats(&fqdn, Box::new(move |stats| stats.with_success(latency_ms)))
            .await?;
        Ok(capability)
    }

    /// `record_failure(fqdn)` — bumps the failure counter.
    pub async fn record_failure(&self, fqdn: &Fqdn) -> MediatorResult<()> {
        self.repository.update_stats(fqdn, Box::new(CapabilityStats::with_failure)).await
    }

    /// `lookup(fqdn)`.
    pub async fn lookup(&self, fqdn: &Fqdn) -> MediatorResult<Capability> {
        self.repository
            .get(fqdn)
            .await?
            .ok_or_else(|| MediatorError::NotFound(format!("capability {fqdn}")))
    }

    /// Current success/failure counters for `fqdn`, e.g. for reporting
    /// reliability alongside a `search_capabilities` result.
    pub async fn stats(&self, fqdn: &Fqdn) -> MediatorResult<CapabilityStats> {
        self.repository.get_stats(fqdn).await
    }
}

fn sample_beta(alpha: f64, beta: f64) -> f64 {
    Beta::new(alpha, beta).map_or(0.5, |dist| dist.sample(&mut rand::thread_rng()))
}

/// Derives a namespace/action pair from free-form intent text via a
/// noun-phrase + verb heuristic (`spec.md` §4.2): the first content word is
/// taken as the namespace, the last as the action, both lowercased and
/// stripped of punctuation. Falls back to "general"/"task" for intent text
/// with fewer than two content words.
fn derive_namespace_action(intent_text: &str) -> (String, String) {
    const STOPWORDS: &[&str] = &["a", "an", "the", "to", "of", "for", "and", "or", "please", "then"];

    let words: Vec<String> = intent_text
        .split_whitespace()
        .map(|w| w.chars().filter(|c| c.is_alphanumeric()).collect::<String>().to_lowercase())
        .filter(|w| !w.is_empty() && !STOPWORDS.contains(&w.as_str()))
        .collect();

    match words.len() {
        0 => ("general".to_string(), "task".to_string()),
        1 => (words[0].clone(), "task".to_string()),
        _ => (words[0].clone(), words[words.len() - 1].clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{Invocation, StaticTaskNode, Task, ToolId};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    fn sample_dag() -> StaticDag {
        StaticDag {
            nodes: vec![StaticTaskNode {
                invocation: Invocation::Tool(ToolId("t1".to_string())),
                argument_template: serde_json::json!({}),
                depends_on: vec![],
                required: true,
            }],
        }
    }

    struct FakeCapabilityRepository {
        by_fqdn: Mutex<HashMap<String, Capability>>,
        by_hash: Mutex<HashMap<String, String>>,
        stats: Mutex<HashMap<String, CapabilityStats>>,
    }

    impl FakeCapabilityRepository {
        fn new() -> Self {
            Self { by_fqdn: Mutex::new(HashMap::new()), by_hash: Mutex::new(HashMap::new()), stats: Mutex::new(HashMap::new()) }
        }
    }

    #[async_trait]
    impl CapabilityRepository for FakeCapabilityRepository {
        async fn insert(&self, capability: &Capability) -> MediatorResult<()> {
            self.by_hash.lock().unwrap().insert(capability.code_hash.clone(), capability.fqdn.0.clone());
            self.by_fqdn.lock().unwrap().insert(capability.fqdn.0.clone(), capability.clone());
            self.stats.lock().unwrap().insert(capability.fqdn.0.clone(), CapabilityStats::default());
            Ok(())
        }
        async fn get(&self, fqdn: &Fqdn) -> MediatorResult<Option<Capability>> {
            Ok(self.by_fqdn.lock().unwrap().get(&fqdn.0).cloned())
        }
        async fn get_by_code_hash(&self, code_hash: &str) -> MediatorResult<Option<Capability>> {
            let fqdn = self.by_hash.lock().unwrap().get(code_hash).cloned();
            Ok(fqdn.and_then(|f| self.by_fqdn.lock().unwrap().get(&f).cloned()))
        }
        async fn list(&self) -> MediatorResult<Vec<Capability>> {
            Ok(self.by_fqdn.lock().unwrap().values().cloned().collect())
        }
        async fn get_stats(&self, fqdn: &Fqdn) -> MediatorResult<CapabilityStats> {
            Ok(self.stats.lock().unwrap().get(&fqdn.0).copied().unwrap_or_default())
        }
        async fn update_stats(
            &self,
            fqdn: &Fqdn,
            update: Box<dyn FnOnce(CapabilityStats) -> CapabilityStats + Send>,
        ) -> MediatorResult<()> {
            let mut stats = self.stats.lock().unwrap();
            let current = stats.get(&fqdn.0).copied().unwrap_or_default();
            stats.insert(fqdn.0.clone(), update(current));
            Ok(())
        }
    }

    fn prefix() -> FqdnPrefix {
        FqdnPrefix { org: "casys".to_string(), project: "pml".to_string() }
    }

    #[tokio::test]
    async fn crystallize_inserts_novel_code_and_sets_initial_counters() {
        let repo = Arc::new(FakeCapabilityRepository::new());
        let store = CapabilityStore::new(repo.clone(), prefix());
        let embedding = Embedding::new(vec![1.0, 0.0]);
        let cap = store
            .crystallize("fn run(x: i32) -> i32 { x + 1 }", sample_dag(), embedding, "summarize the files", true, vec![], 50)
            .await
            .unwrap();
        let stats = repo.get_stats(&cap.fqdn).await.unwrap();
        assert_eq!(stats.successes, 1);
        assert_eq!(stats.failures, 0);
        assert!(cap.fqdn.0.starts_with("casys.pml.summarize"));
    }

    #[tokio::test]
    async fn crystallize_on_repeat_hash_bumps_existing_counters_instead_of_duplicating() {
        let repo = Arc::new(FakeCapabilityRepository::new());
        let store = CapabilityStore::new(repo.clone(), prefix());
        let embedding = Embedding::new(vec![1.0, 0.0]);
        let code = "fn run(x: i32) -> i32 { x + 1 }";
        let first = store.crystallize(code, sample_dag(), embedding.clone(), "summarize files", true, vec![], 50).await.unwrap();
        let second = store.crystallize(code, sample_dag(), embedding, "summarize files again", true, vec![], 50).await.unwrap();
        assert_eq!(first.fqdn, second.fqdn);
        let stats = repo.get_stats(&first.fqdn).await.unwrap();
        assert_eq!(stats.successes, 2);
        assert_eq!(repo.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn record_failure_increments_failure_counter() {
        let repo = Arc::new(FakeCapabilityRepository::new());
        let store = CapabilityStore::new(repo.clone(), prefix());
        let embedding = Embedding::new(vec![1.0, 0.0]);
        let cap = store.crystallize("fn run() {}", sample_dag(), embedding, "do the thing", true, vec![], 10).await.unwrap();
        store.record_failure(&cap.fqdn).await.unwrap();
        let stats = repo.get_stats(&cap.fqdn).await.unwrap();
        assert_eq!(stats.failures, 1);
    }

    #[tokio::test]
    async fn try_match_rejects_capabilities_below_threshold() {
        let repo = Arc::new(FakeCapabilityRepository::new());
        let store = CapabilityStore::new(repo.clone(), prefix());
        let embedding = Embedding::new(vec![1.0, 0.0]);
        store.crystallize("fn run() {}", sample_dag(), embedding, "do the thing", true, vec![], 10).await.unwrap();
        let unrelated = Embedding::new(vec![0.0, 1.0]);
        let result = store.try_match(&unrelated, DEFAULT_MATCH_THRESHOLD).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn try_match_accepts_near_identical_embedding() {
        let repo = Arc::new(FakeCapabilityRepository::new());
        let store = CapabilityStore::new(repo.clone(), prefix());
        let embedding = Embedding::new(vec![1.0, 0.0]);
        let cap = store.crystallize("fn run() {}", sample_dag(), embedding.clone(), "do the thing", true, vec![], 10).await.unwrap();
        let result = store.try_match(&embedding, DEFAULT_MATCH_THRESHOLD).await.unwrap();
        assert_eq!(result.unwrap().fqdn, cap.fqdn);
    }

    #[tokio::test]
    async fn lookup_missing_fqdn_is_not_found() {
        let repo = Arc::new(FakeCapabilityRepository::new());
        let store = CapabilityStore::new(repo, prefix());
        let missing = Fqdn::build("casys", "pml", "x", "y", "00000000");
        assert!(store.lookup(&missing).await.is_err());
    }

    #[test]
    fn derive_namespace_action_uses_first_and_last_content_word() {
        let (ns, action) = derive_namespace_action("please summarize the quarterly report");
        assert_eq!(ns, "summarize");
        assert_eq!(action, "report");
    }

    #[test]
    fn derive_namespace_action_falls_back_on_empty_intent() {
        let (ns, action) = derive_namespace_action("");
        assert_eq!(ns, "general");
        assert_eq!(action, "task");
    }
}
