//! Project store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kiln_core::store::ProjectStore;
use kiln_core::{Project, ResourceId};
use sqlx::PgPool;

use crate::{DbError, DbResult};

#[derive(Debug, Clone, sqlx::FromRow)]
struct ProjectRecord {
    id: uuid::Uuid,
    name: String,
    repo_url: String,
    github_repo_id: Option<String>,
    default_branch: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<ProjectRecord> for Project {
    fn from(record: ProjectRecord) -> Self {
        Project {
            id: ResourceId::from_uuid(record.id),
            name: record.name,
            repo_url: record.repo_url,
            github_repo_id: record.github_repo_id,
            default_branch: record.default_branch,
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}

/// PostgreSQL implementation of ProjectStore.
pub struct PgProjectStore {
    pool: PgPool,
}

impl PgProjectStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Register a project.
    pub async fn create(&self, project: &Project) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO projects (id, name, repo_url, github_repo_id, default_branch, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(project.id.as_uuid())
        .bind(&project.name)
        .bind(&project.repo_url)
        .bind(&project.github_repo_id)
        .bind(&project.default_branch)
        .bind(project.created_at)
        .bind(project.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                DbError::Duplicate(format!("project {}", project.name))
            }
            other => DbError::Database(other),
        })?;
        Ok(())
    }
}

#[async_trait]
impl ProjectStore for PgProjectStore {
    async fn get_by_id(&self, id: ResourceId) -> kiln_core::Result<Option<Project>> {
        let record = sqlx::query_as::<_, ProjectRecord>("SELECT * FROM projects WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(DbError::from)?;
        Ok(record.map(Project::from))
    }

    async fn get_by_github_repo_id(
        &self,
        github_repo_id: &str,
    ) -> kiln_core::Result<Option<Project>> {
        let record =
            sqlx::query_as::<_, ProjectRecord>("SELECT * FROM projects WHERE github_repo_id = $1")
                .bind(github_repo_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(DbError::from)?;
        Ok(record.map(Project::from))
    }
}
