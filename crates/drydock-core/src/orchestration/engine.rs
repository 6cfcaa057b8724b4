//! The deploy pipeline.
//!
//! A linear state machine: resolve, stage, copy, restore, start, configure,
//! register, verify. Every stage before configuration aborts the pipeline
//! on failure; readiness and browser launch are best-effort.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

use crate::artifact::ArtifactResolver;
use crate::cache;
use crate::cluster::{ClusterCommands, ClusterConnection, KubectlCluster};
use crate::config::{LocalDbServer, Settings};
use crate::db::{
    detect_database_kind, ClusterRestoreTarget, DatabaseClient, DatabaseKind, LocalRestoreTarget,
    MssqlClient, PostgresClient, RestoreEngine,
};
use crate::error::DeployError;
use crate::fs::{
    copy_dir_filtered, extract_zip_or_reuse, is_network_path, stage_local_copy, CopyFilter,
};
use crate::health::{HealthProbe, ReadinessPoller};
use crate::orchestration::connection::{
    mssql_connection_string, mssql_windows_auth_connection_string, postgres_connection_string,
    redis_connection_string, write_connection_strings,
};
use crate::orchestration::{is_net_framework_tree, is_port_available, DeployRequest};
use crate::process::{ExecutionOptions, ProcessExecutor};
use crate::registry::{EnvironmentRecord, EnvironmentRegistry};
use crate::strategy::StrategySelector;

/// What a successful deployment produced.
#[derive(Debug, Clone)]
pub struct DeployOutcome {
    pub site_name: String,
    pub url: String,
    pub folder: PathBuf,
}

pub struct DeployEngine {
    settings: Settings,
    executor: ProcessExecutor,
    restore: RestoreEngine,
    registry: EnvironmentRegistry,
    poller: ReadinessPoller,
    probe: Option<Arc<dyn HealthProbe>>,
}

impl DeployEngine {
    pub fn new(settings: Settings, registry: EnvironmentRegistry) -> Self {
        Self {
            settings,
            executor: ProcessExecutor::new(),
            restore: RestoreEngine::new(),
            registry,
            poller: ReadinessPoller::default(),
            probe: None,
        }
    }

    pub fn with_poller(mut self, poller: ReadinessPoller) -> Self {
        self.poller = poller;
        self
    }

    pub fn with_probe(mut self, probe: Arc<dyn HealthProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Run the full pipeline for one request.
    pub async fn execute(&self, request: &DeployRequest) -> Result<DeployOutcome, DeployError> {
        if !is_port_available(request.site_port) {
            warn!(
                port = request.site_port,
                "port appears to be in use; the site may not start"
            );
        }

        let archive = self.resolve_archive(request)?;
        let archive = self.stage_if_remote(&archive)?;
        let unzipped = extract_zip_or_reuse(&archive)?;

        let selector = StrategySelector::from_os(self.settings.host_root.clone());
        let strategy = selector.select(request.method);

        let folder = self.target_folder(request, strategy.is_managed(), selector.host_root())?;
        info!(folder = %folder.display(), "copying application files");
        copy_dir_filtered(&unzipped, &folder, &CopyFilter::deployment_default())?;

        let kind = match request.database_kind.or_else(|| detect_database_kind(&unzipped)) {
            Some(kind) => kind,
            None => {
                warn!("could not detect database kind from the archive, assuming postgres");
                DatabaseKind::Postgres
            }
        };

        let source_identity = source_identity(&archive);
        let db_params = self
            .restore_database(request, &unzipped, kind, &source_identity)
            .await?;

        info!(site = request.site_name, "starting application");
        let exit_code = strategy
            .deploy(&self.executor, &folder, &request.site_name, request.site_port)
            .await?;
        if exit_code != 0 {
            return Err(DeployError::Other(anyhow::anyhow!(
                "Failed to start the application (hosting tool exited with code {exit_code})"
            )));
        }

        let db_string = db_params.connection_string(&request.site_name);
        let redis_string = self.allocate_redis(request).await;
        let net_framework = is_net_framework_tree(&folder);
        write_connection_strings(&folder, &db_string, &redis_string, net_framework)?;

        let url = strategy.application_url(request.site_port);
        self.registry.register(
            &request.site_name,
            EnvironmentRecord::with_default_credentials(url.clone(), !net_framework, folder.clone()),
        )?;

        match &self.probe {
            // Managed hosts warm the site lazily; only a launched process
            // needs the startup grace period watched.
            Some(probe) if !strategy.is_managed() => {
                self.poller
                    .wait_until_ready(probe.as_ref(), &request.site_name)
                    .await;
            }
            Some(_) => info!("managed host selected, skipping readiness check"),
            None => warn!("no health probe configured, skipping readiness check"),
        }

        if request.auto_launch {
            self.launch_browser(&url).await;
        }

        info!(site = request.site_name, url, "deployment complete");
        Ok(DeployOutcome {
            site_name: request.site_name.clone(),
            url,
            folder,
        })
    }

    fn resolve_archive(&self, request: &DeployRequest) -> Result<PathBuf, DeployError> {
        if let Some(zip) = &request.zip_path {
            if !zip.exists() {
                return Err(DeployError::Other(anyhow::anyhow!(
                    "Archive not found: {}",
                    zip.display()
                )));
            }
            return Ok(zip.clone());
        }
        let product = request.product.as_deref().ok_or_else(|| {
            DeployError::Other(anyhow::anyhow!(
                "Either an archive path or a product name is required"
            ))
        })?;
        let root = self.settings.artifact_server_path.clone().ok_or_else(|| {
            DeployError::Other(anyhow::anyhow!(
                "artifact_server_path is not configured; set it in settings or pass an archive path"
            ))
        })?;
        let kind = request.database_kind.unwrap_or(DatabaseKind::Postgres);
        let artifact = ArtifactResolver::new(root).resolve(product, kind, request.runtime_platform)?;
        info!(
            product = artifact.product,
            version = %artifact.version,
            path = %artifact.path.display(),
            "resolved build artifact"
        );
        Ok(artifact.path)
    }

    fn stage_if_remote(&self, archive: &Path) -> Result<PathBuf, DeployError> {
        if !is_network_path(archive) {
            return Ok(archive.to_path_buf());
        }
        let products_dir = self
            .settings
            .products_dir
            .clone()
            .or_else(|| dirs::cache_dir().map(|d| d.join("drydock").join("products")))
            .ok_or_else(|| {
                DeployError::Other(anyhow::anyhow!(
                    "products_dir is not configured and no cache directory is available"
                ))
            })?;
        Ok(stage_local_copy(archive, &products_dir)?)
    }

    fn target_folder(
        &self,
        request: &DeployRequest,
        managed: bool,
        host_root: Option<&Path>,
    ) -> Result<PathBuf, DeployError> {
        if managed {
            let root = host_root.ok_or_else(|| {
                DeployError::Other(anyhow::anyhow!(
                    "host_root is not configured but a managed-host deployment was selected"
                ))
            })?;
            return Ok(root.join(&request.site_name));
        }
        if let Some(path) = &request.app_path {
            return Ok(path.clone());
        }
        let cwd = std::env::current_dir().context("Could not determine working directory")?;
        Ok(cwd.join(&request.site_name))
    }

    async fn restore_database(
        &self,
        request: &DeployRequest,
        unzipped: &Path,
        kind: DatabaseKind,
        source_identity: &str,
    ) -> Result<DbParams, DeployError> {
        match &request.db_server_name {
            Some(name) => {
                let server = self.settings.local_db_server(name).ok_or_else(|| {
                    DeployError::DbServerNotConfigured {
                        name: name.clone(),
                        available: self.settings.db_server_names().join(", "),
                    }
                })?;
                self.restore_local(request, unzipped, source_identity, server)
                    .await?;
                Ok(DbParams::from_local(server))
            }
            None => {
                let cluster_settings = self.settings.cluster.clone().ok_or_else(|| {
                    DeployError::Other(anyhow::anyhow!(
                        "No cluster settings configured; name a local db server or configure the cluster"
                    ))
                })?;
                let cluster = KubectlCluster::new(self.executor.clone(), cluster_settings);
                let conn = match kind {
                    DatabaseKind::Postgres => cluster.postgres_connection().await?,
                    DatabaseKind::Mssql => cluster.mssql_connection().await?,
                };
                let client: Box<dyn DatabaseClient> = match kind {
                    DatabaseKind::Postgres => Box::new(PostgresClient::new(
                        self.executor.clone(),
                        conn.host.clone(),
                        conn.db_port,
                        conn.db_username.clone(),
                        conn.db_password.clone(),
                    )),
                    DatabaseKind::Mssql => Box::new(MssqlClient::new(
                        self.executor.clone(),
                        conn.host.clone(),
                        conn.db_port,
                        conn.db_username.clone(),
                        conn.db_password.clone(),
                        false,
                    )),
                };
                let target = ClusterRestoreTarget {
                    client: client.as_ref(),
                    cluster: &cluster,
                };
                self.restore
                    .restore_to_cluster(
                        &target,
                        unzipped,
                        &request.site_name,
                        source_identity,
                        kind,
                        request.drop_if_exists,
                    )
                    .await?;
                Ok(DbParams::from_cluster(kind, &conn))
            }
        }
    }

    async fn restore_local(
        &self,
        request: &DeployRequest,
        unzipped: &Path,
        source_identity: &str,
        server: &LocalDbServer,
    ) -> Result<(), DeployError> {
        let client: Box<dyn DatabaseClient> = match server.kind {
            DatabaseKind::Postgres => Box::new(
                PostgresClient::new(
                    self.executor.clone(),
                    server.hostname.clone(),
                    server.port,
                    server.username.clone(),
                    server.password.clone(),
                )
                .with_tools_path(server.pg_tools_path.clone()),
            ),
            DatabaseKind::Mssql => Box::new(MssqlClient::new(
                self.executor.clone(),
                server.hostname.clone(),
                server.port,
                server.username.clone(),
                server.password.clone(),
                server.windows_auth,
            )),
        };
        let target = LocalRestoreTarget {
            client: client.as_ref(),
            kind: server.kind,
        };
        self.restore
            .restore_to_local(
                &target,
                unzipped,
                &request.site_name,
                source_identity,
                request.drop_if_exists,
            )
            .await
    }

    /// Pick the Redis database the instance will use and build its
    /// connection string. An explicit index skips the scan. Allocation
    /// failure is a warning, not an abort: the deployment already exists,
    /// the operator can fix the cache wiring with --redis-db later.
    async fn allocate_redis(&self, request: &DeployRequest) -> String {
        let (host, port) = match &self.settings.cluster {
            Some(cluster) if request.db_server_name.is_none() => {
                (cluster.host.clone(), cluster.redis_port)
            }
            _ => ("localhost".to_string(), 6379),
        };
        let index = match request.redis_db {
            Some(index) => index,
            None => match cache::find_empty_slot(&host, port).await {
                Ok(index) => index,
                Err(err) => {
                    warn!("{err}");
                    warn!("falling back to redis db 1; pass --redis-db to pick another");
                    1
                }
            },
        };
        info!(host, port, index, "assigned redis database");
        redis_connection_string(&host, index, port)
    }

    async fn launch_browser(&self, url: &str) {
        let options = if cfg!(target_os = "windows") {
            ExecutionOptions::new("cmd", ["/c", "start", url])
        } else if cfg!(target_os = "macos") {
            ExecutionOptions::new("open", [url])
        } else {
            ExecutionOptions::new("xdg-open", [url])
        };
        let launch = self.executor.fire_and_forget(&options).await;
        if !launch.started {
            warn!(url, "could not open a browser");
        }
    }
}

/// Identity key for template lookup: the archive's file name. Two deploys
/// of the same archive share one template.
fn source_identity(archive: &Path) -> String {
    archive
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| archive.to_string_lossy().into_owned())
}

/// Database endpoint the deployed instance connects to, captured during
/// the restore stage so no global host state survives it.
#[derive(Debug, Clone)]
struct DbParams {
    kind: DatabaseKind,
    host: String,
    port: u16,
    username: String,
    password: String,
    windows_auth: bool,
}

impl DbParams {
    fn from_local(server: &LocalDbServer) -> Self {
        Self {
            kind: server.kind,
            host: server.hostname.clone(),
            port: server.port,
            username: server.username.clone(),
            password: server.password.clone(),
            windows_auth: server.windows_auth,
        }
    }

    fn from_cluster(kind: DatabaseKind, conn: &ClusterConnection) -> Self {
        Self {
            kind,
            host: conn.host.clone(),
            port: conn.db_port,
            username: conn.db_username.clone(),
            password: conn.db_password.clone(),
            windows_auth: false,
        }
    }

    fn connection_string(&self, database: &str) -> String {
        match self.kind {
            DatabaseKind::Postgres => postgres_connection_string(
                &self.host,
                self.port,
                database,
                &self.username,
                &self.password,
            ),
            DatabaseKind::Mssql => {
                if self.windows_auth {
                    mssql_windows_auth_connection_string(&self.host, database)
                } else {
                    mssql_connection_string(
                        &self.host,
                        self.port,
                        database,
                        &self.username,
                        &self.password,
                    )
                }
            }
        }
    }
}
