//! CLI command implementations.

pub mod migrate;
pub mod orders;
pub mod seed;

use secrecy::SecretString;
use thiserror::Error;

/// Errors shared by the CLI commands.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(&'static str),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Repository error: {0}")]
    Repository(#[from] orchard_storefront::db::RepositoryError),

    #[error("Could not read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("Invalid catalog file: {0}")]
    InvalidCatalog(String),

    #[error("Order signing key rejected: {0}")]
    Signer(#[from] orchard_core::IntegrityError),

    #[error("Configuration error: {0}")]
    Config(#[from] orchard_storefront::config::ConfigError),

    #[error("{0} stored order(s) failed integrity verification")]
    TamperedOrders(usize),
}

/// Storefront database URL from the environment.
///
/// Checks `STOREFRONT_DATABASE_URL`, then `DATABASE_URL`.
pub(crate) fn database_url() -> Result<SecretString, CommandError> {
    dotenvy::dotenv().ok();

    std::env::var("STOREFRONT_DATABASE_URL")
        .or_else(|_| std::env::var("DATABASE_URL"))
        .map(SecretString::from)
        .map_err(|_| CommandError::MissingEnvVar("STOREFRONT_DATABASE_URL"))
}
