//! PostgreSQL store implementations.

pub mod build;
pub mod project;
pub mod secret;

pub use build::PgBuildStore;
pub use project::PgProjectStore;
pub use secret::PgSecretStore;
