//! Variable interpolation for pipeline steps.
//!
//! Supports variables like:
//! - `${build.id}` - Build ID
//! - `${git.sha}` - Full commit SHA the build was triggered for
//! - `${git.short_sha}` - Short (7 char) commit SHA
//! - `${git.branch}` - Branch name
//! - `${git.message}` - Commit message (first line)
//! - `${project.id}` - Project ID
//! - `${project.name}` - Project name
//! - `${step.name}` - Current step name
//! - `${step.index}` - Current step position, starting at 0
//! - `${env.VAR_NAME}` - Variable from the step's own `env` block
//! - `${secrets.NAME}` - Project secret
//!
//! Unknown variables are left untouched so shell syntax such as
//! `${HOME}` passes through to the container.

use kiln_core::{Build, Project};
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::LazyLock;

/// Variable context containing all available variables for interpolation.
#[derive(Debug, Clone, Default)]
pub struct VariableContext {
    pub build: BuildContext,
    pub git: GitContext,
    pub project: ProjectContext,
    pub step: StepContext,
    pub env: BTreeMap<String, String>,
    /// Decrypted project secrets.
    pub secrets: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default)]
pub struct BuildContext {
    pub id: String,
}

#[derive(Debug, Clone, Default)]
pub struct GitContext {
    pub sha: String,
    pub short_sha: String,
    pub branch: String,
    pub message: String,
}

#[derive(Debug, Clone, Default)]
pub struct ProjectContext {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Default)]
pub struct StepContext {
    pub name: String,
    pub index: usize,
}

static VAR_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([a-zA-Z_][a-zA-Z0-9_]*(?:\.[a-zA-Z_][a-zA-Z0-9_]*)?)\}")
        .expect("variable pattern is valid")
});

impl VariableContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Context describing one build of a project.
    pub fn for_build(build: &Build, project: &Project) -> Self {
        VariableContextBuilder::new()
            .with_build(build.id.to_string())
            .with_git_sha(build.commit_hash.clone())
            .with_git_branch(build.branch.clone())
            .with_git_message(build.commit_message.clone())
            .with_project(project.id.to_string(), project.name.clone())
            .build()
    }

    /// Copy of this context scoped to one step and its environment.
    pub fn for_step(
        &self,
        name: impl Into<String>,
        index: usize,
        env: &BTreeMap<String, String>,
    ) -> Self {
        let mut ctx = self.clone();
        ctx.step.name = name.into();
        ctx.step.index = index;
        ctx.env = env.clone();
        ctx
    }

    /// Variables every step container receives.
    pub fn standard_env(&self) -> BTreeMap<String, String> {
        let mut env = BTreeMap::new();
        env.insert("CI".to_string(), "true".to_string());
        env.insert("KILN".to_string(), "true".to_string());
        env.insert("KILN_BUILD_ID".to_string(), self.build.id.clone());
        env.insert("KILN_COMMIT_SHA".to_string(), self.git.sha.clone());
        env.insert("KILN_BRANCH".to_string(), self.git.branch.clone());
        env.insert("KILN_STEP_NAME".to_string(), self.step.name.clone());
        env
    }

    /// Resolve a variable name to its value.
    pub fn resolve(&self, var_name: &str) -> Option<String> {
        let parts: Vec<&str> = var_name.split('.').collect();

        match parts.as_slice() {
            ["build", "id"] => Some(self.build.id.clone()),

            ["git", "sha"] => Some(self.git.sha.clone()),
            ["git", "short_sha"] => Some(self.git.short_sha.clone()),
            ["git", "branch"] => Some(self.git.branch.clone()),
            ["git", "message"] => Some(self.git.message.clone()),

            ["project", "id"] => Some(self.project.id.clone()),
            ["project", "name"] => Some(self.project.name.clone()),

            ["step", "name"] => Some(self.step.name.clone()),
            ["step", "index"] => Some(self.step.index.to_string()),

            ["env", name] => self.env.get(*name).cloned(),
            ["secrets", name] => self.secrets.get(*name).cloned(),

            _ => None,
        }
    }

    /// Interpolate all variables in a string.
    pub fn interpolate(&self, input: &str) -> String {
        VAR_REGEX
            .replace_all(input, |caps: &regex::Captures| {
                let var_name = &caps[1];
                self.resolve(var_name)
                    .unwrap_or_else(|| format!("${{{}}}", var_name))
            })
            .to_string()
    }

    pub fn interpolate_vec(&self, inputs: &[String]) -> Vec<String> {
        inputs.iter().map(|s| self.interpolate(s)).collect()
    }

    /// Interpolate map values; keys are kept verbatim.
    pub fn interpolate_map(&self, map: &BTreeMap<String, String>) -> BTreeMap<String, String> {
        map.iter()
            .map(|(k, v)| (k.clone(), self.interpolate(v)))
            .collect()
    }
}

/// Builder for creating VariableContext.
pub struct VariableContextBuilder {
    ctx: VariableContext,
}

impl VariableContextBuilder {
    pub fn new() -> Self {
        Self {
            ctx: VariableContext::new(),
        }
    }

    pub fn with_build(mut self, id: impl Into<String>) -> Self {
        self.ctx.build.id = id.into();
        self
    }

    pub fn with_git_sha(mut self, sha: impl Into<String>) -> Self {
        let sha = sha.into();
        self.ctx.git.short_sha = sha.chars().take(7).collect();
        self.ctx.git.sha = sha;
        self
    }

    pub fn with_git_branch(mut self, branch: impl Into<String>) -> Self {
        self.ctx.git.branch = branch.into();
        self
    }

    pub fn with_git_message(mut self, message: impl Into<String>) -> Self {
        let message = message.into();
        self.ctx.git.message = message.lines().next().unwrap_or_default().to_string();
        self
    }

    pub fn with_project(mut self, id: impl Into<String>, name: impl Into<String>) -> Self {
        self.ctx.project.id = id.into();
        self.ctx.project.name = name.into();
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.ctx.env.insert(key.into(), value.into());
        self
    }

    pub fn with_secrets(mut self, secrets: BTreeMap<String, String>) -> Self {
        self.ctx.secrets.extend(secrets);
        self
    }

    pub fn build(self) -> VariableContext {
        self.ctx
    }
}

impl Default for VariableContextBuilder {
    fn default() -> Self {
        Self::new()
    }
}
