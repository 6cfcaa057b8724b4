//! Cluster command facade.
//!
//! Thin collaborator over the shared infrastructure cluster: discovers
//! database/cache connection parameters and stages backup files inside
//! database pods. The shipped implementation shells out to `kubectl`
//! through the process execution service; the trait keeps orchestration
//! testable without a cluster.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::config::ClusterSettings;
use crate::error::DeployError;
use crate::process::{ExecutionOptions, ProcessExecutor};

/// Staging directory inside a database pod. MSSQL backups go straight to
/// the server data directory so RESTORE can address them by that path.
fn staging_dir(pod: PodKind) -> &'static str {
    match pod {
        PodKind::Postgres => "/tmp",
        PodKind::Mssql => "/var/opt/mssql/data",
    }
}

/// Connection parameters for a cluster database instance.
///
/// The host is resolved once here and threaded explicitly through the
/// restore and connection-string stages.
#[derive(Debug, Clone)]
pub struct ClusterConnection {
    pub host: String,
    pub db_port: u16,
    pub db_username: String,
    pub db_password: String,
    pub redis_port: u16,
}

/// Database pod a staging operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PodKind {
    Postgres,
    Mssql,
}

#[async_trait]
pub trait ClusterCommands: Send + Sync {
    async fn postgres_connection(&self) -> Result<ClusterConnection, DeployError>;
    async fn mssql_connection(&self) -> Result<ClusterConnection, DeployError>;
    /// Copy a backup file into the pod's staging directory under `dest_name`.
    async fn copy_backup_to_pod(
        &self,
        pod: PodKind,
        source: &Path,
        dest_name: &str,
    ) -> Result<(), DeployError>;
    /// Delete a previously staged backup from the pod.
    async fn delete_staged_backup(&self, pod: PodKind, name: &str) -> Result<(), DeployError>;
    /// Run the restore tool inside the postgres pod against a staged backup.
    async fn restore_database_in_pod(
        &self,
        backup_name: &str,
        database: &str,
    ) -> Result<(), DeployError>;
    /// Path of a staged backup as the database server inside the pod sees it.
    fn staged_backup_path(&self, pod: PodKind, name: &str) -> PathBuf {
        PathBuf::from(staging_dir(pod)).join(name)
    }
    /// Host-visible directory mapped into the pod's data path, used as a
    /// direct-copy fallback for files too large for the staging transport.
    fn fallback_data_dir(&self, pod: PodKind) -> Option<PathBuf>;
}

/// `kubectl`-backed cluster facade.
pub struct KubectlCluster {
    executor: ProcessExecutor,
    settings: ClusterSettings,
}

impl KubectlCluster {
    pub fn new(executor: ProcessExecutor, settings: ClusterSettings) -> Self {
        Self { executor, settings }
    }

    fn pod_name(&self, pod: PodKind) -> &str {
        match pod {
            PodKind::Postgres => &self.settings.postgres_pod,
            PodKind::Mssql => &self.settings.mssql_pod,
        }
    }

    async fn run_kubectl(&self, args: Vec<String>) -> Result<(), DeployError> {
        let result = self
            .executor
            .execute_and_capture(ExecutionOptions::new("kubectl", args.clone()))
            .await;
        if !result.started {
            return Err(DeployError::ProcessStartFailed {
                program: "kubectl".to_string(),
                message: result.stderr,
            });
        }
        if result.exit_code != Some(0) {
            return Err(anyhow::anyhow!(
                "kubectl {} failed with code {:?}: {}",
                args.first().map(String::as_str).unwrap_or(""),
                result.exit_code,
                result.stderr.trim()
            )
            .into());
        }
        Ok(())
    }
}

#[async_trait]
impl ClusterCommands for KubectlCluster {
    async fn postgres_connection(&self) -> Result<ClusterConnection, DeployError> {
        Ok(ClusterConnection {
            host: self.settings.host.clone(),
            db_port: self.settings.postgres_port,
            db_username: self.settings.postgres_username.clone(),
            db_password: self.settings.postgres_password.clone(),
            redis_port: self.settings.redis_port,
        })
    }

    async fn mssql_connection(&self) -> Result<ClusterConnection, DeployError> {
        Ok(ClusterConnection {
            host: self.settings.host.clone(),
            db_port: self.settings.mssql_port,
            db_username: self.settings.mssql_username.clone(),
            db_password: self.settings.mssql_password.clone(),
            redis_port: self.settings.redis_port,
        })
    }

    async fn copy_backup_to_pod(
        &self,
        pod: PodKind,
        source: &Path,
        dest_name: &str,
    ) -> Result<(), DeployError> {
        self.run_kubectl(vec![
            "cp".to_string(),
            source.to_string_lossy().into_owned(),
            format!(
                "{}/{}:{}/{}",
                self.settings.namespace,
                self.pod_name(pod),
                staging_dir(pod),
                dest_name
            ),
        ])
        .await
    }

    async fn delete_staged_backup(&self, pod: PodKind, name: &str) -> Result<(), DeployError> {
        self.run_kubectl(vec![
            "exec".to_string(),
            "-n".to_string(),
            self.settings.namespace.clone(),
            self.pod_name(pod).to_string(),
            "--".to_string(),
            "rm".to_string(),
            "-f".to_string(),
            format!("{}/{}", staging_dir(pod), name),
        ])
        .await
    }

    async fn restore_database_in_pod(
        &self,
        backup_name: &str,
        database: &str,
    ) -> Result<(), DeployError> {
        let options = ExecutionOptions::new(
            "kubectl",
            [
                "exec".to_string(),
                "-n".to_string(),
                self.settings.namespace.clone(),
                self.settings.postgres_pod.clone(),
                "--".to_string(),
                "pg_restore".to_string(),
                "-U".to_string(),
                self.settings.postgres_username.clone(),
                "-d".to_string(),
                database.to_string(),
                format!("{}/{}", staging_dir(PodKind::Postgres), backup_name),
                "--no-owner".to_string(),
                "--no-privileges".to_string(),
            ],
        )
        .env("PGPASSWORD", self.settings.postgres_password.clone())
        .mirror_output(true)
        .suppress_errors(true);

        let result = self.executor.execute_with_realtime_output(options).await;
        if !result.started {
            return Err(DeployError::ProcessStartFailed {
                program: "kubectl".to_string(),
                message: result.stderr,
            });
        }
        match result.exit_code {
            Some(0) => Ok(()),
            code => Err(DeployError::RestoreToolFailed {
                exit_code: code.unwrap_or(-1),
            }),
        }
    }

    fn fallback_data_dir(&self, pod: PodKind) -> Option<PathBuf> {
        match pod {
            PodKind::Mssql => self.settings.mssql_data_dir.clone(),
            PodKind::Postgres => None,
        }
    }
}
