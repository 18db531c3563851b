//! Configuration for the Kiln build orchestrator.
//!
//! This crate handles:
//! - Pipeline manifests (`.kiln.yml`)
//! - Process configuration from the environment
//! - Variable interpolation in step commands and env

pub mod error;
pub mod manifest;
pub mod system;
pub mod variables;

pub use error::{ConfigError, ConfigResult};
pub use manifest::{MANIFEST_FILE, load_manifest, parse_manifest};
pub use system::SystemConfig;
pub use variables::{VariableContext, VariableContextBuilder};
