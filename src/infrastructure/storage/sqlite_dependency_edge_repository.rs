//! SQLite-backed [`DependencyEdgeRepository`].

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use crate::domain::errors::MediatorResult;
use crate::domain::models::{DependencyEdge, SearchTarget};
use crate::domain::ports::DependencyEdgeRepository;

pub struct SqliteDependencyEdgeRepository {
    pool: SqlitePool,
}

impl SqliteDependencyEdgeRepository {
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn kind_and_id(target: &SearchTarget) -> (&'static str, &str) {
    match target {
        SearchTarget::Tool(id) => ("tool", id.as_str()),
        SearchTarget::Capability(id) => ("capability", id.as_str()),
    }
}

fn target_from(kind: &str, id: String) -> SearchTarget {
    if kind == "capability" {
        SearchTarget::Capability(id)
    } else {
        SearchTarget::Tool(id)
    }
}

#[async_trait]
impl DependencyEdgeRepository for SqliteDependencyEdgeRepository {
    async fn record_transition(&self, from: SearchTarget, to: SearchTarget) -> MediatorResult<()> {
        let (from_kind, from_id) = kind_and_id(&from);
        let (to_kind, to_id) = kind_and_id(&to);

        sqlx::query(
            "INSERT INTO dependency_edges (from_kind, from_id, to_kind, to_id, weight, support)
             VALUES (?, ?, ?, ?, 1.0, 1)
             ON CONFLICT (from_kind, from_id, to_kind, to_id) DO UPDATE SET
                support = support + 1,
                weight = (weight * support + 1.0) / (support + 1)",
        )
        .bind(from_kind)
        .bind(from_id)
        .bind(to_kind)
        .bind(to_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn all_edges(&self) -> MediatorResult<Vec<DependencyEdge>> {
        let rows = sqlx::query("SELECT from_kind, from_id, to_kind, to_id, weight, support FROM dependency_edges")
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter()
            .map(|row| {
                let from_kind: String = row.try_get("from_kind")?;
                let from_id: String = row.try_get("from_id")?;
                let to_kind: String = row.try_get("to_kind")?;
                let to_id: String = row.try_get("to_id")?;
                let weight: f64 = row.try_get("weight")?;
                let support: i64 = row.try_get("support")?;

                Ok(DependencyEdge {
                    from: target_from(&from_kind, from_id),
                    to: target_from(&to_kind, to_id),
                    weight: weight as f32,
                    support: support as u32,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::storage::connection::create_test_pool;

    #[tokio::test]
    async fn repeated_transitions_accumulate_support() {
        let pool = create_test_pool().await.unwrap();
        let repo = SqliteDependencyEdgeRepository::new(pool);

        let a = SearchTarget::Tool("files:read_file".to_string());
        let b = SearchTarget::Tool("files:summarize".to_string());

        repo.record_transition(a.clone(), b.clone()).await.unwrap();
        repo.record_transition(a.clone(), b.clone()).await.unwrap();

        let edges = repo.all_edges().await.unwrap();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].support, 2);
    }
}
