//! SQLite-backed [`CapabilityRepository`].
//!
//! Capability rows are append-only; `capability_stats` is the only row
//! ever mutated, and [`update_stats`] does so inside a transaction that
//! reads-then-writes the stats row, serializing concurrent updates to the
//! same fqdn behind SQLite's own write lock rather than trusting the
//! caller to retry on conflict (`spec.md` §9).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

use crate::domain::errors::MediatorResult;
use crate::domain::models::{Capability, CapabilityStats, Embedding, Fqdn};
use crate::domain::ports::CapabilityRepository;

pub struct SqliteCapabilityRepository {
    pool: SqlitePool,
}

impl SqliteCapabilityRepository {
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn row_to_capability(row: &sqlx::sqlite::SqliteRow) -> MediatorResult<Capability> {
    let fqdn: String = row.try_get("fqdn")?;
    let code_hash: String = row.try_get("code_hash")?;
    let code: String = row.try_get("code")?;
    let static_dag: String = row.try_get("static_dag")?;
    let intent_embedding: String = row.try_get("intent_embedding")?;
    let created_at: String = row.try_get("created_at")?;
    let pure: i64 = row.try_get("pure")?;
    let dependencies: String = row.try_get("dependencies")?;

    Ok(Capability {
        fqdn: Fqdn(fqdn),
        code_hash,
        code,
        static_dag: serde_json::from_str(&static_dag)?,
        intent_embedding: Embedding::new(serde_json::from_str(&intent_embedding)?),
        created_at: created_at
            .parse::<DateTime<Utc>>()
            .map_err(|e| crate::domain::errors::MediatorError::Storage(e.to_string()))?,
        pure: pure != 0,
        dependencies: serde_json::from_str(&dependencies)?,
    })
}

fn row_to_stats(row: &sqlx::sqlite::SqliteRow) -> MediatorResult<CapabilityStats> {
    let successes: i64 = row.try_get("successes")?;
    let failures: i64 = row.try_get("failures")?;
    let avg_latency_ms: f64 = row.try_get("avg_latency_ms")?;
    let last_used: Option<String> = row.try_get("last_used")?;

    Ok(CapabilityStats {
        successes: successes as u64,
        failures: failures as u64,
        avg_latency_ms,
        last_used: last_used
            .map(|s| s.parse::<DateTime<Utc>>())
            .transpose()
            .map_err(|e: chrono::ParseError| crate::domain::errors::MediatorError::Storage(e.to_string()))?,
    })
}

#[async_trait]
impl CapabilityRepository for SqliteCapabilityRepository {
    async fn insert(&self, capability: &Capability) -> MediatorResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO capabilities (fqdn, code_hash, code, static_dag, intent_embedding, created_at, pure, dependencies)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(capability.fqdn.0.as_str())
        .bind(&capability.code_hash)
        .bind(&capability.code)
        .bind(serde_json::to_string(&capability.static_dag)?)
        .bind(serde_json::to_string(&capability.intent_embedding.0)?)
        .bind(capability.created_at.to_rfc3339())
        .bind(i64::from(capability.pure))
        .bind(serde_json::to_string(&capability.dependencies)?)
        .execute(&mut *tx)
        .await?;

        sqlx::query("INSERT INTO capability_stats (fqdn, successes, failures, avg_latency_ms, last_used) VALUES (?, 0, 0, 0.0, NULL)")
            .bind(capability.fqdn.0.as_str())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn get(&self, fqdn: &Fqdn) -> MediatorResult<Option<Capability>> {
        let row = sqlx::query("SELECT * FROM capabilities WHERE fqdn = ?")
            .bind(fqdn.0.as_str())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_capability).transpose()
    }

    async fn get_by_code_hash(&self, code_hash: &str) -> MediatorResult<Option<Capability>> {
        let row = sqlx::query("SELECT * FROM capabilities WHERE code_hash = ?")
            .bind(code_hash)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_capability).transpose()
    }

    async fn list(&self) -> MediatorResult<Vec<Capability>> {
        let rows = sqlx::query("SELECT * FROM capabilities ORDER BY fqdn").fetch_all(&self.pool).await?;
        rows.iter().map(row_to_capability).collect()
    }

    async fn get_stats(&self, fqdn: &Fqdn) -> MediatorResult<CapabilityStats> {
        let row = sqlx::query("SELECT successes, failures, avg_latency_ms, last_used FROM capability_stats WHERE fqdn = ?")
            .bind(fqdn.0.as_str())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_stats).transpose().map(Option::unwrap_or_default)
    }

    async fn update_stats(
        &self,
        fqdn: &Fqdn,
        update: Box<dyn FnOnce(CapabilityStats) -> CapabilityStats + Send>,
    ) -> MediatorResult<()> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query("SELECT successes, failures, avg_latency_ms, last_used FROM capability_stats WHERE fqdn = ?")
            .bind(fqdn.0.as_str())
            .fetch_optional(&mut *tx)
            .await?;

        let current = row.as_ref().map(row_to_stats).transpose()?.unwrap_or_default();
        let updated = update(current);

        sqlx::query(
            "INSERT INTO capability_stats (fqdn, successes, failures, avg_latency_ms, last_used)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT (fqdn) DO UPDATE SET
                successes = excluded.successes,
                failures = excluded.failures,
                avg_latency_ms = excluded.avg_latency_ms,
                last_used = excluded.last_used",
        )
        .bind(fqdn.0.as_str())
        .bind(updated.successes as i64)
        .bind(updated.failures as i64)
        .bind(updated.avg_latency_ms)
        .bind(updated.last_used.map(|t| t.to_rfc3339()))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::StaticDag;
    use crate::infrastructure::storage::connection::create_test_pool;

    fn capability(fqdn: &str, code_hash: &str) -> Capability {
        Capability {
            fqdn: Fqdn(fqdn.to_string()),
            code_hash: code_hash.to_string(),
            code: "base64code".to_string(),
            static_dag: StaticDag::default(),
            intent_embedding: Embedding::new(vec![0.1, 0.2]),
            created_at: Utc::now(),
            pure: true,
            dependencies: vec![],
        }
    }

    async fn repo() -> SqliteCapabilityRepository {
        let pool = create_test_pool().await.expect("pool");
        SqliteCapabilityRepository::new(pool)
    }

    #[tokio::test]
    async fn insert_seeds_a_zeroed_stats_row() {
        let repo = repo().await;
        let cap = capability("casys.pml.files.summarize.abcdef01", "abcdef0123");
        repo.insert(&cap).await.unwrap();

        let stats = repo.get_stats(&cap.fqdn).await.unwrap();
        assert_eq!(stats.successes, 0);
        assert_eq!(stats.failures, 0);
    }

    #[tokio::test]
    async fn update_stats_applies_closure_over_current_row() {
        let repo = repo().await;
        let cap = capability("casys.pml.files.summarize.abcdef01", "abcdef0123");
        repo.insert(&cap).await.unwrap();

        repo.update_stats(&cap.fqdn, Box::new(|s| s.with_success(120))).await.unwrap();
        repo.update_stats(&cap.fqdn, Box::new(|s| s.with_success(80))).await.unwrap();

        let stats = repo.get_stats(&cap.fqdn).await.unwrap();
        assert_eq!(stats.successes, 2);
        assert!((stats.avg_latency_ms - 100.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn get_by_code_hash_finds_dedup_candidate() {
        let repo = repo().await;
        let cap = capability("casys.pml.files.summarize.abcdef01", "abcdef0123");
        repo.insert(&cap).await.unwrap();

        let found = repo.get_by_code_hash("abcdef0123").await.unwrap();
        assert!(found.is_some());
    }
}
