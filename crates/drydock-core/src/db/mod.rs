//! Database restore subsystem.

mod backup;
mod client;
mod restore;
mod template;

pub use backup::{
    BackupKind, detect_backup_kind, detect_database_kind, find_any_backup, find_backup_file,
};
pub use client::{DatabaseClient, MssqlClient, PostgresClient};
pub use restore::{ClusterRestoreTarget, LocalRestoreTarget, RestoreEngine};
pub use template::TemplateMetadata;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::DeployError;

/// Database engine family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseKind {
    Mssql,
    Postgres,
}

impl DatabaseKind {
    /// Token embedded in build archive file names.
    pub fn artifact_token(&self) -> &'static str {
        match self {
            DatabaseKind::Mssql => "MSSQL",
            DatabaseKind::Postgres => "PostgreSQL",
        }
    }

    /// Backup file extension this engine family produces.
    pub fn backup_extension(&self) -> &'static str {
        match self {
            DatabaseKind::Mssql => "bak",
            DatabaseKind::Postgres => "backup",
        }
    }
}

impl fmt::Display for DatabaseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatabaseKind::Mssql => f.write_str("mssql"),
            DatabaseKind::Postgres => f.write_str("postgres"),
        }
    }
}

impl FromStr for DatabaseKind {
    type Err = DeployError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mssql" => Ok(DatabaseKind::Mssql),
            "postgres" | "postgresql" => Ok(DatabaseKind::Postgres),
            other => Err(DeployError::UnsupportedDatabaseKind(other.to_string())),
        }
    }
}
