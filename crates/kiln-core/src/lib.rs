//! Core domain types and traits for the Kiln build orchestrator.
//!
//! This crate contains:
//! - Resource identifiers and the shared error type
//! - Build, project and job records
//! - Pipeline manifest types
//! - Capability traits the build pipeline consumes (stores, log bus,
//!   secret store, step runner, source fetcher)

pub mod build;
pub mod error;
pub mod executor;
pub mod id;
pub mod logs;
pub mod pipeline;
pub mod secret;
pub mod source;
pub mod store;

pub use build::{Build, BuildStatus, Job, Project};
pub use error::{Error, Result};
pub use id::ResourceId;
