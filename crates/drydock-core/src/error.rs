//! Error taxonomy for the deployment pipeline.

use std::path::PathBuf;

/// Fatal failures a deployment stage can report.
///
/// Non-fatal conditions (port in use, readiness timeout, redis slot
/// exhaustion in local mode) are logged as warnings and never surface here.
#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    #[error("no build artifact matching '{token}' found under {root}")]
    ArtifactNotFound { token: String, root: PathBuf },

    #[error("no database backup file found in {directory}")]
    BackupNotFound { directory: PathBuf },

    #[error("database kind '{0}' is not supported; supported kinds: mssql, postgres")]
    UnsupportedDatabaseKind(String),

    #[error("database {database} already exists; pass --drop-if-exists to drop it automatically")]
    TargetAlreadyExists { database: String },

    #[error("restore tool exited with code {exit_code}")]
    RestoreToolFailed { exit_code: i32 },

    #[error("connection test failed: {message}")]
    ConnectionTestFailed { message: String },

    #[error("failed to start process '{program}': {message}")]
    ProcessStartFailed { program: String, message: String },

    #[error("database server configuration '{name}' not found; available: {available}")]
    DbServerNotConfigured { name: String, available: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
