//! Secret storage abstraction.

use async_trait::async_trait;
use std::collections::BTreeMap;

use crate::{ResourceId, Result};

/// Source of project secrets injected into step environments.
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Plaintext secrets of a project, keyed by name. A project without
    /// secrets yields an empty map.
    async fn list_by_project(&self, project_id: ResourceId) -> Result<BTreeMap<String, String>>;
}
