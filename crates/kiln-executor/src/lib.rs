//! Step execution backends for Kiln.
//!
//! - [`DockerRunner`] runs a pipeline step in a local Docker container
//! - [`GitCheckout`] shallow-clones a project into a build workspace
//! - [`BuildLogWriter`] forwards step output to the build's log channel

pub mod docker;
pub mod git;
pub mod logs;

pub use docker::DockerRunner;
pub use git::{GitCheckout, GitError};
pub use logs::BuildLogWriter;

pub use kiln_core::executor::{LogSink, StepRunner, StepSpec, WORKSPACE_MOUNT};
