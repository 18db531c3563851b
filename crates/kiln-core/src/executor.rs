//! Step runner trait and step specification.
//!
//! Runners execute one pipeline step in an isolated environment and
//! report its exit code. A non-zero exit is a normal result; `Err` is
//! reserved for infrastructure failures (image pull, daemon errors).

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use crate::{ResourceId, Result};

/// Fixed mount point of the build workspace inside step containers.
pub const WORKSPACE_MOUNT: &str = "/workspace";

/// Everything a runner needs to execute one step.
#[derive(Debug, Clone)]
pub struct StepSpec {
    pub build_id: ResourceId,
    /// Position of the step within the pipeline, starting at 0.
    pub index: usize,
    pub name: String,
    pub image: String,
    pub commands: Vec<String>,
    pub env: BTreeMap<String, String>,
    /// Host directory holding the checked-out sources.
    pub workspace: PathBuf,
}

impl StepSpec {
    /// Commands joined so the first failing one ends the step.
    pub fn script(&self) -> String {
        self.commands.join(" && ")
    }

    /// Environment flattened to `KEY=VALUE` entries.
    pub fn env_list(&self) -> Vec<String> {
        self.env.iter().map(|(k, v)| format!("{}={}", k, v)).collect()
    }
}

/// Destination for a step's combined output.
#[async_trait]
pub trait LogSink: Send + Sync {
    async fn write(&self, chunk: Bytes) -> Result<()>;

    /// Called once a step's output stream has ended.
    async fn flush(&self) -> Result<()> {
        Ok(())
    }
}

/// Trait for step runners.
#[async_trait]
pub trait StepRunner: Send + Sync {
    /// Name of this runner.
    fn name(&self) -> &'static str;

    /// Run a step to completion, streaming output into `sink`.
    ///
    /// Returns the step's exit code. All output has been handed to the
    /// sink by the time this returns.
    async fn run_step(&self, spec: &StepSpec, sink: Arc<dyn LogSink>) -> Result<i64>;
}
