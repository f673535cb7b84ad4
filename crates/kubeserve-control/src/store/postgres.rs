//! PostgreSQL deployment store implementation.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, QueryBuilder, Row};

use crate::config::DatabaseConfig;
use crate::error::{ControlError, ControlResult};
use crate::types::{DeploymentId, DeploymentRecord, Phase, ReleaseName, Replicas, VersionId};

use super::{DeploymentFilter, DeploymentStore, RowGuard, RowLocks};

const COLUMNS: &str =
    "id, version_id, release_name, namespace, replicas, url, created_at, updated_at";

/// PostgreSQL-backed deployment store.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
    locks: RowLocks,
}

impl PostgresStore {
    /// Connect to PostgreSQL and create a new store.
    ///
    /// The required tables are created if they don't exist.
    pub async fn new(config: &DatabaseConfig) -> ControlResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .connect(&config.url)
            .await?;

        Self::from_pool(pool).await
    }

    /// Create a store from an existing connection pool.
    pub async fn from_pool(pool: PgPool) -> ControlResult<Self> {
        let store = Self {
            pool,
            locks: RowLocks::new(),
        };
        store.ensure_schema().await?;
        Ok(store)
    }

    /// The underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Ensure the required tables exist.
    async fn ensure_schema(&self) -> ControlResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS model_deployments (
                id TEXT PRIMARY KEY,
                version_id BIGINT NOT NULL,
                release_name TEXT NOT NULL UNIQUE,
                namespace TEXT NOT NULL,
                replicas INTEGER NOT NULL CHECK (replicas > 0),
                url TEXT,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_model_deployments_version
            ON model_deployments (version_id)
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_model_deployments_created_at
            ON model_deployments (created_at DESC)
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Parse a row into a DeploymentRecord.
    fn row_to_record(row: &sqlx::postgres::PgRow) -> ControlResult<DeploymentRecord> {
        let id: String = row.get("id");
        let version_id: i64 = row.get("version_id");
        let release_name: String = row.get("release_name");
        let namespace: String = row.get("namespace");
        let replicas: i32 = row.get("replicas");
        let url: Option<String> = row.get("url");
        let created_at: chrono::DateTime<chrono::Utc> = row.get("created_at");
        let updated_at: chrono::DateTime<chrono::Utc> = row.get("updated_at");

        let replicas = u32::try_from(replicas).map_err(|_| {
            ControlError::Serialisation(format!("invalid stored replica count {replicas}"))
        })?;

        Ok(DeploymentRecord {
            id: DeploymentId::new(id),
            version_id: VersionId::new(version_id),
            release_name: ReleaseName::new(release_name),
            namespace,
            replicas: Replicas::from_stored(replicas),
            url,
            created_at,
            updated_at,
        })
    }
}

fn is_release_conflict(error: &sqlx::Error) -> bool {
    match error {
        sqlx::Error::Database(db) => {
            db.is_unique_violation()
                && db
                    .constraint()
                    .is_some_and(|name| name.contains("release_name"))
        }
        _ => false,
    }
}

#[async_trait]
impl DeploymentStore for PostgresStore {
    async fn insert(&self, record: &DeploymentRecord) -> ControlResult<()> {
        let replicas = i32::try_from(record.replicas.get()).map_err(|_| {
            ControlError::Serialisation(format!("replica count {} out of range", record.replicas))
        })?;

        sqlx::query(
            r#"
            INSERT INTO model_deployments (
                id, version_id, release_name, namespace, replicas, url,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(record.id.as_str())
        .bind(record.version_id.get())
        .bind(record.release_name.as_str())
        .bind(&record.namespace)
        .bind(replicas)
        .bind(&record.url)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_release_conflict(&e) {
                ControlError::DuplicateRelease(record.release_name.to_string())
            } else {
                ControlError::from(e)
            }
        })?;

        Ok(())
    }

    async fn get(&self, id: &DeploymentId) -> ControlResult<Option<DeploymentRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM model_deployments WHERE id = $1"
        ))
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(r) => Ok(Some(Self::row_to_record(&r)?)),
            None => Ok(None),
        }
    }

    async fn mark_live(&self, id: &DeploymentId, url: &str) -> ControlResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE model_deployments
            SET url = $1, updated_at = NOW()
            WHERE id = $2
            "#,
        )
        .bind(url)
        .bind(id.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(ControlError::DeploymentNotFound(id.to_string()));
        }

        Ok(())
    }

    async fn list(&self, filter: &DeploymentFilter) -> ControlResult<Vec<DeploymentRecord>> {
        let mut query: QueryBuilder<'_, Postgres> =
            QueryBuilder::new(format!("SELECT {COLUMNS} FROM model_deployments WHERE 1=1"));

        if let Some(version_id) = filter.version_id {
            query.push(" AND version_id = ").push_bind(version_id.get());
        }

        match filter.phase {
            Some(Phase::Provisioning) => {
                query.push(" AND url IS NULL");
            }
            Some(Phase::Live) => {
                query.push(" AND url IS NOT NULL");
            }
            None => {}
        }

        if let Some(cutoff) = filter.created_before {
            query.push(" AND created_at < ").push_bind(cutoff);
        }

        query.push(" ORDER BY created_at DESC");

        if let Some(limit) = filter.limit {
            query.push(" LIMIT ").push_bind(i64::from(limit));
        }

        if let Some(offset) = filter.offset {
            query.push(" OFFSET ").push_bind(i64::from(offset));
        }

        let rows = query.build().fetch_all(&self.pool).await?;

        rows.iter().map(Self::row_to_record).collect()
    }

    async fn delete(&self, id: &DeploymentId) -> ControlResult<()> {
        let result = sqlx::query("DELETE FROM model_deployments WHERE id = $1")
            .bind(id.as_str())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(ControlError::DeploymentNotFound(id.to_string()));
        }

        Ok(())
    }

    async fn lock(&self, id: &DeploymentId) -> RowGuard {
        self.locks.acquire(id).await
    }

    async fn ping(&self) -> ControlResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

impl std::fmt::Debug for PostgresStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresStore").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn get_database_url() -> Option<String> {
        std::env::var("DATABASE_URL").ok()
    }

    async fn connect() -> PostgresStore {
        let url = get_database_url().expect("DATABASE_URL not set");
        let pool = PgPool::connect(&url).await.expect("failed to connect");
        PostgresStore::from_pool(pool).await.expect("schema setup failed")
    }

    fn test_deployment() -> DeploymentRecord {
        DeploymentRecord::new(VersionId::new(42), "user-7", Replicas::new(2, 10).unwrap())
    }

    #[tokio::test]
    #[ignore = "requires PostgreSQL (set DATABASE_URL)"]
    async fn insert_and_get() {
        let store = connect().await;

        let record = test_deployment();
        let id = record.id.clone();

        store.insert(&record).await.expect("insert failed");

        let retrieved = store
            .get(&id)
            .await
            .expect("get failed")
            .expect("deployment not found");

        assert_eq!(retrieved.id, id);
        assert_eq!(retrieved.release_name, record.release_name);
        assert_eq!(retrieved.namespace, "user-7");
        assert_eq!(retrieved.replicas.get(), 2);
        assert_eq!(retrieved.phase(), Phase::Provisioning);

        store.delete(&id).await.expect("delete failed");
    }

    #[tokio::test]
    #[ignore = "requires PostgreSQL (set DATABASE_URL)"]
    async fn release_name_conflict_is_reported() {
        let store = connect().await;

        let first = test_deployment();
        let mut second = test_deployment();
        second.release_name = first.release_name.clone();

        store.insert(&first).await.expect("insert failed");
        assert!(matches!(
            store.insert(&second).await,
            Err(ControlError::DuplicateRelease(_))
        ));

        store.delete(&first.id).await.expect("delete failed");
    }

    #[tokio::test]
    #[ignore = "requires PostgreSQL (set DATABASE_URL)"]
    async fn mark_live_and_filter_by_phase() {
        let store = connect().await;

        let record = test_deployment();
        let id = record.id.clone();
        store.insert(&record).await.expect("insert failed");

        store
            .mark_live(&id, "http://localhost/api/v1/predict/x")
            .await
            .expect("mark_live failed");

        let live = store
            .list(
                &DeploymentFilter::new()
                    .with_version(VersionId::new(42))
                    .with_phase(Phase::Live),
            )
            .await
            .expect("list failed");
        assert!(live.iter().any(|r| r.id == id));

        let provisioning = store
            .list(
                &DeploymentFilter::new()
                    .with_version(VersionId::new(42))
                    .with_phase(Phase::Provisioning),
            )
            .await
            .expect("list failed");
        assert!(provisioning.iter().all(|r| r.id != id));

        store.delete(&id).await.expect("delete failed");
    }

    #[tokio::test]
    #[ignore = "requires PostgreSQL (set DATABASE_URL)"]
    async fn delete_nonexistent_fails() {
        let store = connect().await;
        assert!(matches!(
            store.delete(&DeploymentId::new("nonexistent")).await,
            Err(ControlError::DeploymentNotFound(_))
        ));
    }
}
