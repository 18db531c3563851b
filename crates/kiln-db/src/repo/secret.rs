//! Secret store. Values are sealed with [`SecretCipher`] before they
//! reach the database.

use async_trait::async_trait;
use kiln_core::ResourceId;
use kiln_core::secret::SecretStore;
use sqlx::PgPool;
use std::collections::BTreeMap;

use crate::DbResult;
use crate::crypto::SecretCipher;

/// PostgreSQL implementation of SecretStore.
pub struct PgSecretStore {
    pool: PgPool,
    cipher: SecretCipher,
}

impl PgSecretStore {
    pub fn new(pool: PgPool, cipher: SecretCipher) -> Self {
        Self { pool, cipher }
    }

    /// Create or replace a project secret.
    pub async fn set(&self, project_id: ResourceId, name: &str, value: &str) -> DbResult<()> {
        let sealed = self.cipher.encrypt(value)?;
        sqlx::query(
            r#"
            INSERT INTO secrets (project_id, name, encrypted_value)
            VALUES ($1, $2, $3)
            ON CONFLICT (project_id, name)
            DO UPDATE SET encrypted_value = EXCLUDED.encrypted_value, updated_at = NOW()
            "#,
        )
        .bind(project_id.as_uuid())
        .bind(name)
        .bind(sealed)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Remove a project secret. Returns whether it existed.
    pub async fn delete(&self, project_id: ResourceId, name: &str) -> DbResult<bool> {
        let result = sqlx::query("DELETE FROM secrets WHERE project_id = $1 AND name = $2")
            .bind(project_id.as_uuid())
            .bind(name)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn load(&self, project_id: ResourceId) -> DbResult<BTreeMap<String, String>> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            "SELECT name, encrypted_value FROM secrets WHERE project_id = $1",
        )
        .bind(project_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(name, sealed)| -> DbResult<(String, String)> {
                Ok((name, self.cipher.decrypt(&sealed)?))
            })
            .collect()
    }
}

#[async_trait]
impl SecretStore for PgSecretStore {
    async fn list_by_project(
        &self,
        project_id: ResourceId,
    ) -> kiln_core::Result<BTreeMap<String, String>> {
        Ok(self.load(project_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PgProjectStore;

    #[tokio::test]
    #[ignore]
    async fn test_secrets_round_trip_sealed() {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
        let pool = crate::create_pool(&url).await.unwrap();
        crate::run_migrations(&pool).await.unwrap();

        let project = kiln_core::Project::new("secrets", "https://example.com/s.git");
        PgProjectStore::new(pool.clone()).create(&project).await.unwrap();

        let cipher = SecretCipher::new(b"01234567890123456789012345678901").unwrap();
        let store = PgSecretStore::new(pool.clone(), cipher);
        store.set(project.id, "API_KEY", "first").await.unwrap();
        store.set(project.id, "API_KEY", "second").await.unwrap();
        store.set(project.id, "TOKEN", "t").await.unwrap();

        let secrets = store.list_by_project(project.id).await.unwrap();
        assert_eq!(secrets.get("API_KEY").map(String::as_str), Some("second"));
        assert_eq!(secrets.len(), 2);

        let (stored,): (String,) = sqlx::query_as(
            "SELECT encrypted_value FROM secrets WHERE project_id = $1 AND name = 'TOKEN'",
        )
        .bind(project.id.as_uuid())
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_ne!(stored, "t");

        assert!(store.delete(project.id, "TOKEN").await.unwrap());
        assert!(!store.delete(project.id, "TOKEN").await.unwrap());
        assert!(store.list_by_project(ResourceId::new()).await.unwrap().is_empty());
    }
}
