use std::path::PathBuf;

use thiserror::Error;

use crate::config::Provider;

pub type ImportResult<T> = Result<T, ImportError>;

/// Fatal failures of an import run.
///
/// Row-level problems (blank required fields, unresolved references, values
/// that are too long) never surface here; the pipeline counts and drops them.
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("csv file not found: {}", .0.display())]
    FileNotFound(PathBuf),
    #[error("unknown entity '{name}'. known: {}", .known.join(", "))]
    UnknownEntity { name: String, known: Vec<String> },
    #[error("unsupported provider '{0}'. use SqlServer | Postgres | MySql")]
    UnsupportedProvider(String),
    #[error("no database driver available for provider {0}")]
    DriverUnavailable(Provider),
    #[error("Import:ConnectionString is empty")]
    EmptyConnectionString,
    #[error("csv header for {entity} is missing required column '{column}'")]
    MissingColumn {
        entity: &'static str,
        column: &'static str,
    },
    #[error("import cancelled")]
    Cancelled,
    #[error("configuration error: {0}")]
    Config(String),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("password hashing error: {0}")]
    PasswordHash(String),
    #[error("store error: {0}")]
    Store(String),
}

impl ImportError {
    /// Whether the failure happened before any row could be processed.
    pub fn is_startup(&self) -> bool {
        matches!(
            self,
            ImportError::FileNotFound(_)
                | ImportError::UnknownEntity { .. }
                | ImportError::UnsupportedProvider(_)
                | ImportError::DriverUnavailable(_)
                | ImportError::EmptyConnectionString
                | ImportError::MissingColumn { .. }
                | ImportError::Config(_)
        )
    }
}

impl From<argon2::Error> for ImportError {
    fn from(err: argon2::Error) -> Self {
        ImportError::PasswordHash(err.to_string())
    }
}

impl From<argon2::password_hash::Error> for ImportError {
    fn from(err: argon2::password_hash::Error) -> Self {
        ImportError::PasswordHash(err.to_string())
    }
}
