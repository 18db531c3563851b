//! Fetching project sources into a build workspace.

use async_trait::async_trait;
use std::path::Path;

use crate::{Build, Project, Result};

#[async_trait]
pub trait SourceFetcher: Send + Sync {
    /// Check out `project` for `build` into the empty directory `dest`.
    async fn fetch(&self, project: &Project, build: &Build, dest: &Path) -> Result<()>;
}
