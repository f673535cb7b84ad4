//! PostgreSQL-backed version registry.

use async_trait::async_trait;
use sqlx::postgres::PgPool;
use sqlx::Row;

use crate::error::{ControlError, ControlResult};
use crate::types::{TenantId, VersionId};

use super::{ModelVersion, VersionRegistry, VersionState};

/// Reads versions from the registry's `model_versions` and `models` tables.
///
/// The tables belong to the registry service; nothing here writes to them.
#[derive(Clone)]
pub struct PostgresRegistry {
    pool: PgPool,
}

impl PostgresRegistry {
    /// Create a registry over an existing connection pool.
    #[must_use]
    pub const fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl VersionRegistry for PostgresRegistry {
    async fn get_version(&self, id: VersionId) -> ControlResult<ModelVersion> {
        let row = sqlx::query(
            r#"
            SELECT v.id, m.user_id, v.status::TEXT AS status, v.s3_path
            FROM model_versions v
            INNER JOIN models m ON m.id = v.model_id
            WHERE v.id = $1
            "#,
        )
        .bind(id.get())
        .fetch_optional(&self.pool)
        .await?
        .ok_or(ControlError::VersionNotFound(id))?;

        let owner: i64 = row.try_get::<i32, _>("user_id").map(i64::from)?;
        let status: String = row.get("status");
        let store_reference: Option<String> = row.get("s3_path");

        let state: VersionState = status.parse().map_err(|e| {
            ControlError::Serialisation(format!("failed to parse version status '{status}': {e}"))
        })?;

        Ok(ModelVersion {
            id,
            owner: TenantId::new(owner),
            state,
            store_reference: store_reference.unwrap_or_default(),
        })
    }
}

impl std::fmt::Debug for PostgresRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresRegistry").finish_non_exhaustive()
    }
}
