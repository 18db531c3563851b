//! Build store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kiln_core::store::BuildStore;
use kiln_core::{Build, BuildStatus, ResourceId};
use sqlx::PgPool;

use crate::{DbError, DbResult};

/// A build row as stored in the database.
#[derive(Debug, Clone, sqlx::FromRow)]
struct BuildRecord {
    id: uuid::Uuid,
    project_id: uuid::Uuid,
    commit_hash: String,
    commit_message: String,
    branch: String,
    status: String,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl TryFrom<BuildRecord> for Build {
    type Error = DbError;

    fn try_from(record: BuildRecord) -> DbResult<Self> {
        let status = record
            .status
            .parse::<BuildStatus>()
            .map_err(|e| DbError::Corrupt(format!("build {}: {}", record.id, e)))?;
        Ok(Build {
            id: ResourceId::from_uuid(record.id),
            project_id: ResourceId::from_uuid(record.project_id),
            commit_hash: record.commit_hash,
            commit_message: record.commit_message,
            branch: record.branch,
            status,
            started_at: record.started_at,
            finished_at: record.finished_at,
            created_at: record.created_at,
        })
    }
}

/// PostgreSQL implementation of BuildStore.
pub struct PgBuildStore {
    pool: PgPool,
}

impl PgBuildStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn insert(&self, build: &Build) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO builds (id, project_id, commit_hash, commit_message, branch, status,
                                started_at, finished_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(build.id.as_uuid())
        .bind(build.project_id.as_uuid())
        .bind(&build.commit_hash)
        .bind(&build.commit_message)
        .bind(&build.branch)
        .bind(build.status.as_str())
        .bind(build.started_at)
        .bind(build.finished_at)
        .bind(build.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                DbError::Duplicate(format!("build {}", build.id))
            }
            other => DbError::Database(other),
        })?;
        Ok(())
    }

    async fn claim_start(&self, id: ResourceId, started_at: DateTime<Utc>) -> DbResult<()> {
        let result = sqlx::query(
            "UPDATE builds SET status = 'RUNNING', started_at = $2 WHERE id = $1 AND status = 'PENDING'",
        )
        .bind(id.as_uuid())
        .bind(started_at)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return match self.find(id).await? {
                Some(build) => Err(DbError::Conflict(format!(
                    "build {} is {}, not PENDING",
                    id, build.status
                ))),
                None => Err(DbError::NotFound(format!("build {id}"))),
            };
        }
        Ok(())
    }

    async fn save(&self, build: &Build) -> DbResult<()> {
        let result = sqlx::query(
            "UPDATE builds SET status = $2, started_at = $3, finished_at = $4 WHERE id = $1",
        )
        .bind(build.id.as_uuid())
        .bind(build.status.as_str())
        .bind(build.started_at)
        .bind(build.finished_at)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::NotFound(format!("build {}", build.id)));
        }
        Ok(())
    }

    async fn find(&self, id: ResourceId) -> DbResult<Option<Build>> {
        sqlx::query_as::<_, BuildRecord>("SELECT * FROM builds WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?
            .map(Build::try_from)
            .transpose()
    }

    async fn find_by_project(&self, project_id: ResourceId) -> DbResult<Vec<Build>> {
        sqlx::query_as::<_, BuildRecord>(
            "SELECT * FROM builds WHERE project_id = $1 ORDER BY created_at DESC",
        )
        .bind(project_id.as_uuid())
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(Build::try_from)
        .collect()
    }
}

#[async_trait]
impl BuildStore for PgBuildStore {
    async fn create(&self, build: &Build) -> kiln_core::Result<()> {
        Ok(self.insert(build).await?)
    }

    async fn mark_running(
        &self,
        id: ResourceId,
        started_at: DateTime<Utc>,
    ) -> kiln_core::Result<()> {
        Ok(self.claim_start(id, started_at).await?)
    }

    async fn update(&self, build: &Build) -> kiln_core::Result<()> {
        Ok(self.save(build).await?)
    }

    async fn get_by_id(&self, id: ResourceId) -> kiln_core::Result<Option<Build>> {
        Ok(self.find(id).await?)
    }

    async fn list_by_project(&self, project_id: ResourceId) -> kiln_core::Result<Vec<Build>> {
        Ok(self.find_by_project(project_id).await?)
    }
}
