//! Database restore engine.
//!
//! Restores a backup once into a reusable template database keyed by the
//! source identity, then instantiates per-deployment databases by cloning
//! that template. Two backends share the template logic: the cluster
//! backend stages the backup inside the database pod, the local backend
//! drives the restore tool directly against a configured server.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{info, warn};

use super::backup::{detect_backup_kind, find_any_backup, find_backup_file};
use super::client::DatabaseClient;
use super::template::TemplateMetadata;
use super::DatabaseKind;
use crate::cluster::{ClusterCommands, PodKind};
use crate::error::DeployError;

/// Backups at or above this size bypass the pod staging transport and are
/// copied through the host-visible data mount instead.
const STAGING_SIZE_LIMIT: u64 = i32::MAX as u64;

/// Cluster-backed restore target.
pub struct ClusterRestoreTarget<'a> {
    pub client: &'a dyn DatabaseClient,
    pub cluster: &'a dyn ClusterCommands,
}

/// Local-server restore target.
pub struct LocalRestoreTarget<'a> {
    pub client: &'a dyn DatabaseClient,
    pub kind: DatabaseKind,
}

/// Orchestrates template creation/reuse and deployment database creation.
pub struct RestoreEngine {
    // Serializes template lookup-or-create per source identity so two
    // concurrent deployments of the same artifact cannot race to create
    // duplicate templates in this process. Cross-process races remain a
    // known gap.
    template_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    staging_size_limit: u64,
}

impl Default for RestoreEngine {
    fn default() -> Self {
        Self {
            template_locks: Mutex::default(),
            staging_size_limit: STAGING_SIZE_LIMIT,
        }
    }
}

impl RestoreEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the size above which backups bypass the pod transport.
    pub fn with_staging_size_limit(mut self, limit: u64) -> Self {
        self.staging_size_limit = limit;
        self
    }

    /// Restore into the shared cluster.
    pub async fn restore_to_cluster(
        &self,
        target: &ClusterRestoreTarget<'_>,
        unzipped_dir: &Path,
        dest_db: &str,
        source_identity: &str,
        kind: DatabaseKind,
        drop_if_exists: bool,
    ) -> Result<(), DeployError> {
        match kind {
            DatabaseKind::Postgres => {
                let backup = find_backup_file(unzipped_dir, DatabaseKind::Postgres)?;
                let restorer = TemplateRestorer::Cluster {
                    cluster: target.cluster,
                    backup: &backup,
                };
                let template = self
                    .ensure_template(target.client, source_identity, restorer)
                    .await?;
                create_target_from_template(target.client, &template, dest_db, drop_if_exists)
                    .await?;
                info!("[Database created] - {dest_db}");
                Ok(())
            }
            DatabaseKind::Mssql => {
                self.restore_mssql_to_cluster(target, unzipped_dir, dest_db, drop_if_exists)
                    .await
            }
        }
    }

    /// Restore to a locally configured database server.
    pub async fn restore_to_local(
        &self,
        target: &LocalRestoreTarget<'_>,
        unzipped_dir: &Path,
        dest_db: &str,
        source_identity: &str,
        drop_if_exists: bool,
    ) -> Result<(), DeployError> {
        let backup = find_any_backup(unzipped_dir).ok_or_else(|| DeployError::BackupNotFound {
            directory: unzipped_dir.to_path_buf(),
        })?;
        info!("[Found backup file] - {}", backup.display());

        info!("Testing connection to {} server...", target.kind);
        target.client.test_connection().await?;
        info!("Connection test successful");

        let detected = detect_backup_kind(&backup);
        if !detected.is_compatible_with(target.kind) {
            return Err(anyhow::anyhow!(
                "backup file {} ({detected:?}) is not compatible with database kind {}",
                backup.display(),
                target.kind
            )
            .into());
        }

        match target.kind {
            DatabaseKind::Postgres => {
                let restorer = TemplateRestorer::Local { backup: &backup };
                let template = self
                    .ensure_template(target.client, source_identity, restorer)
                    .await?;
                create_target_from_template(target.client, &template, dest_db, drop_if_exists)
                    .await?;
                info!("Successfully created database {dest_db} from template {template}");
                Ok(())
            }
            DatabaseKind::Mssql => {
                ensure_target_absent(target.client, dest_db, drop_if_exists).await?;
                info!("Starting database restore; this may take several minutes");
                target.client.restore_from_backup(dest_db, &backup).await?;
                info!("Successfully restored database {dest_db} from {}", backup.display());
                Ok(())
            }
        }
    }

    /// Find or create the template for a source identity, serialized per
    /// identity.
    async fn ensure_template(
        &self,
        client: &dyn DatabaseClient,
        source_identity: &str,
        restorer: TemplateRestorer<'_>,
    ) -> Result<String, DeployError> {
        let lock = self.identity_lock(source_identity).await;
        let _guard = lock.lock().await;

        if let Some(existing) = client.find_template_by_source(source_identity).await? {
            info!(
                "Found existing template '{existing}' for source '{source_identity}', skipping restore"
            );
            return Ok(existing);
        }

        let template = format!("template_{}", uuid::Uuid::new_v4().simple());
        info!("Template for '{source_identity}' does not exist, creating '{template}'");

        client.create_database(&template).await?;
        restorer.restore(client, &template).await?;
        client.set_as_template(&template).await?;

        let metadata = TemplateMetadata::for_source(source_identity).to_comment();
        client.set_comment(&template, &metadata).await?;
        info!("[Template metadata] - {metadata}");

        Ok(template)
    }

    async fn restore_mssql_to_cluster(
        &self,
        target: &ClusterRestoreTarget<'_>,
        unzipped_dir: &Path,
        dest_db: &str,
        drop_if_exists: bool,
    ) -> Result<(), DeployError> {
        let backup = find_backup_file(unzipped_dir, DatabaseKind::Mssql)?;
        let staged_name = format!("{dest_db}.bak");

        let size = std::fs::metadata(&backup)?.len();
        let mut fallback_copy = None;
        if size < self.staging_size_limit {
            target
                .cluster
                .copy_backup_to_pod(PodKind::Mssql, &backup, &staged_name)
                .await?;
        } else {
            // The pod transport cannot move files this large.
            let data_dir = target
                .cluster
                .fallback_data_dir(PodKind::Mssql)
                .ok_or_else(|| {
                    anyhow::anyhow!(
                        "backup is {size} bytes, above the staging limit, and no fallback data directory is configured"
                    )
                })?;
            let dest = data_dir.join(&staged_name);
            warn!("Copying large backup directly to {}", dest.display());
            std::fs::copy(&backup, &dest)?;
            fallback_copy = Some(dest);
        }

        ensure_target_absent(target.client, dest_db, drop_if_exists).await?;
        let server_path = target
            .cluster
            .staged_backup_path(PodKind::Mssql, &staged_name);
        let restore_result = target.client.restore_from_backup(dest_db, &server_path).await;

        // Clean the staged copy regardless of the restore outcome.
        match &fallback_copy {
            Some(copy) => {
                let _ = std::fs::remove_file(copy);
            }
            None => {
                if let Err(err) = target
                    .cluster
                    .delete_staged_backup(PodKind::Mssql, &staged_name)
                    .await
                {
                    warn!("Failed to delete staged backup {staged_name}: {err}");
                }
            }
        }

        restore_result?;
        info!("[Database created] - {dest_db}");
        Ok(())
    }

    async fn identity_lock(&self, source_identity: &str) -> Arc<Mutex<()>> {
        let mut locks = self.template_locks.lock().await;
        locks
            .entry(source_identity.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

/// How the restore tool reaches the template database being created.
enum TemplateRestorer<'a> {
    /// Stage the backup inside the postgres pod and restore there.
    Cluster {
        cluster: &'a dyn ClusterCommands,
        backup: &'a Path,
    },
    /// Run the restore tool directly against the configured server.
    Local { backup: &'a Path },
}

impl TemplateRestorer<'_> {
    async fn restore(
        &self,
        client: &dyn DatabaseClient,
        database: &str,
    ) -> Result<(), DeployError> {
        match self {
            TemplateRestorer::Cluster { cluster, backup } => {
                let staged_name = backup
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .ok_or_else(|| anyhow::anyhow!("backup path has no file name"))?;
                cluster
                    .copy_backup_to_pod(PodKind::Postgres, backup, &staged_name)
                    .await?;
                let result = cluster.restore_database_in_pod(&staged_name, database).await;
                if let Err(err) = cluster
                    .delete_staged_backup(PodKind::Postgres, &staged_name)
                    .await
                {
                    warn!("Failed to delete staged backup {staged_name}: {err}");
                }
                result
            }
            TemplateRestorer::Local { backup } => {
                info!("Starting restore from {}; this may take several minutes", backup.display());
                client.restore_from_backup(database, backup).await
            }
        }
    }
}

/// Fail with `TargetAlreadyExists` or drop the database, per the flag.
async fn ensure_target_absent(
    client: &dyn DatabaseClient,
    dest_db: &str,
    drop_if_exists: bool,
) -> Result<(), DeployError> {
    if !client.database_exists(dest_db).await? {
        return Ok(());
    }
    if !drop_if_exists {
        return Err(DeployError::TargetAlreadyExists {
            database: dest_db.to_string(),
        });
    }
    warn!("Database {dest_db} already exists, dropping it");
    client.drop_database(dest_db).await?;
    info!("Dropped existing database {dest_db}");
    Ok(())
}

async fn create_target_from_template(
    client: &dyn DatabaseClient,
    template: &str,
    dest_db: &str,
    drop_if_exists: bool,
) -> Result<(), DeployError> {
    ensure_target_absent(client, dest_db, drop_if_exists).await?;
    info!("Creating database {dest_db} from template {template}");
    client.create_from_template(template, dest_db).await
}
