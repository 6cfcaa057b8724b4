use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use tempfile::TempDir;

use drydock_core::cluster::{ClusterCommands, ClusterConnection, PodKind};
use drydock_core::db::{
    ClusterRestoreTarget, DatabaseClient, DatabaseKind, LocalRestoreTarget, RestoreEngine,
    TemplateMetadata,
};
use drydock_core::error::DeployError;

/// In-memory database server: names plus optional metadata comments.
#[derive(Default)]
struct FakeDbServer {
    databases: Mutex<Vec<FakeDatabase>>,
    calls: Mutex<Vec<String>>,
    fail_connection: bool,
}

struct FakeDatabase {
    name: String,
    is_template: bool,
    comment: Option<String>,
}

impl FakeDbServer {
    fn with_database(self, name: &str) -> Self {
        self.databases.lock().unwrap().push(FakeDatabase {
            name: name.to_string(),
            is_template: false,
            comment: None,
        });
        self
    }

    fn with_template(self, name: &str, source: &str) -> Self {
        self.databases.lock().unwrap().push(FakeDatabase {
            name: name.to_string(),
            is_template: true,
            comment: Some(TemplateMetadata::for_source(source).to_comment()),
        });
        self
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }

    fn names(&self) -> Vec<String> {
        self.databases
            .lock()
            .unwrap()
            .iter()
            .map(|db| db.name.clone())
            .collect()
    }
}

#[async_trait]
impl DatabaseClient for FakeDbServer {
    async fn test_connection(&self) -> Result<(), DeployError> {
        self.record("test_connection");
        if self.fail_connection {
            return Err(DeployError::ConnectionTestFailed {
                message: "connection refused".to_string(),
            });
        }
        Ok(())
    }

    async fn database_exists(&self, name: &str) -> Result<bool, DeployError> {
        Ok(self.databases.lock().unwrap().iter().any(|db| db.name == name))
    }

    async fn create_database(&self, name: &str) -> Result<(), DeployError> {
        self.record(format!("create:{name}"));
        self.databases.lock().unwrap().push(FakeDatabase {
            name: name.to_string(),
            is_template: false,
            comment: None,
        });
        Ok(())
    }

    async fn drop_database(&self, name: &str) -> Result<(), DeployError> {
        self.record(format!("drop:{name}"));
        self.databases.lock().unwrap().retain(|db| db.name != name);
        Ok(())
    }

    async fn create_from_template(&self, template: &str, name: &str) -> Result<(), DeployError> {
        self.record(format!("clone:{template}->{name}"));
        self.databases.lock().unwrap().push(FakeDatabase {
            name: name.to_string(),
            is_template: false,
            comment: None,
        });
        Ok(())
    }

    async fn set_as_template(&self, name: &str) -> Result<(), DeployError> {
        self.record(format!("set_as_template:{name}"));
        if let Some(db) = self.databases.lock().unwrap().iter_mut().find(|db| db.name == name) {
            db.is_template = true;
        }
        Ok(())
    }

    async fn set_comment(&self, name: &str, comment: &str) -> Result<(), DeployError> {
        if let Some(db) = self.databases.lock().unwrap().iter_mut().find(|db| db.name == name) {
            db.comment = Some(comment.to_string());
        }
        Ok(())
    }

    async fn find_template_by_source(&self, source: &str) -> Result<Option<String>, DeployError> {
        Ok(self
            .databases
            .lock()
            .unwrap()
            .iter()
            .find(|db| {
                db.is_template
                    && db
                        .comment
                        .as_deref()
                        .and_then(TemplateMetadata::parse)
                        .is_some_and(|meta| meta.matches_source(source))
            })
            .map(|db| db.name.clone()))
    }

    async fn restore_from_backup(&self, name: &str, backup: &Path) -> Result<(), DeployError> {
        self.record(format!("restore:{name}<-{}", backup.display()));
        Ok(())
    }
}

/// Cluster facade that records staging traffic.
#[derive(Default)]
struct FakeCluster {
    staged: Mutex<Vec<String>>,
    deleted: Mutex<Vec<String>>,
    restored: Mutex<Vec<(String, String)>>,
    fallback_dir: Option<PathBuf>,
}

#[async_trait]
impl ClusterCommands for FakeCluster {
    async fn postgres_connection(&self) -> Result<ClusterConnection, DeployError> {
        Ok(ClusterConnection {
            host: "cluster.local".to_string(),
            db_port: 5432,
            db_username: "postgres".to_string(),
            db_password: "pw".to_string(),
            redis_port: 6379,
        })
    }

    async fn mssql_connection(&self) -> Result<ClusterConnection, DeployError> {
        Ok(ClusterConnection {
            host: "cluster.local".to_string(),
            db_port: 1433,
            db_username: "sa".to_string(),
            db_password: "pw".to_string(),
            redis_port: 6379,
        })
    }

    async fn copy_backup_to_pod(
        &self,
        _pod: PodKind,
        _source: &Path,
        dest_name: &str,
    ) -> Result<(), DeployError> {
        self.staged.lock().unwrap().push(dest_name.to_string());
        Ok(())
    }

    async fn delete_staged_backup(&self, _pod: PodKind, name: &str) -> Result<(), DeployError> {
        self.deleted.lock().unwrap().push(name.to_string());
        Ok(())
    }

    async fn restore_database_in_pod(
        &self,
        backup_name: &str,
        database: &str,
    ) -> Result<(), DeployError> {
        self.restored
            .lock()
            .unwrap()
            .push((backup_name.to_string(), database.to_string()));
        Ok(())
    }

    fn fallback_data_dir(&self, _pod: PodKind) -> Option<PathBuf> {
        self.fallback_dir.clone()
    }
}

fn artifact_dir_with_backup(extension: &str) -> TempDir {
    let temp = TempDir::new().unwrap();
    let db_dir = temp.path().join("db");
    std::fs::create_dir_all(&db_dir).unwrap();
    std::fs::write(db_dir.join(format!("data.{extension}")), b"PGDMP").unwrap();
    temp
}

#[tokio::test]
async fn cluster_postgres_restore_creates_template_then_clones() {
    let client = FakeDbServer::default();
    let cluster = FakeCluster::default();
    let artifact = artifact_dir_with_backup("backup");

    let engine = RestoreEngine::new();
    engine
        .restore_to_cluster(
            &ClusterRestoreTarget {
                client: &client,
                cluster: &cluster,
            },
            artifact.path(),
            "site1",
            "Studio_8.1.3.zip",
            DatabaseKind::Postgres,
            false,
        )
        .await
        .unwrap();

    // A template was created in the pod and the deployment db cloned from it.
    assert_eq!(cluster.restored.lock().unwrap().len(), 1);
    assert!(cluster.deleted.lock().unwrap().len() == 1, "staged backup must be cleaned up");
    let names = client.names();
    assert!(names.iter().any(|n| n.starts_with("template_")));
    assert!(names.contains(&"site1".to_string()));
}

#[tokio::test]
async fn existing_template_is_reused_without_restore() {
    let client = FakeDbServer::default().with_template("template_cafe", "Studio_8.1.3.zip");
    let cluster = FakeCluster::default();
    let artifact = artifact_dir_with_backup("backup");

    let engine = RestoreEngine::new();
    engine
        .restore_to_cluster(
            &ClusterRestoreTarget {
                client: &client,
                cluster: &cluster,
            },
            artifact.path(),
            "site1",
            "Studio_8.1.3.zip",
            DatabaseKind::Postgres,
            false,
        )
        .await
        .unwrap();

    assert!(cluster.restored.lock().unwrap().is_empty(), "no pod restore expected");
    assert!(cluster.staged.lock().unwrap().is_empty(), "no staging expected");
    assert!(client.calls().contains(&"clone:template_cafe->site1".to_string()));
}

#[tokio::test]
async fn template_comment_round_trips_through_metadata() {
    let client = FakeDbServer::default();
    let cluster = FakeCluster::default();
    let artifact = artifact_dir_with_backup("backup");

    let engine = RestoreEngine::new();
    engine
        .restore_to_cluster(
            &ClusterRestoreTarget {
                client: &client,
                cluster: &cluster,
            },
            artifact.path(),
            "site1",
            "Studio_8.1.3.zip",
            DatabaseKind::Postgres,
            false,
        )
        .await
        .unwrap();

    // The second deployment of the same archive must reuse the template.
    engine
        .restore_to_cluster(
            &ClusterRestoreTarget {
                client: &client,
                cluster: &cluster,
            },
            artifact.path(),
            "site2",
            "Studio_8.1.3.zip",
            DatabaseKind::Postgres,
            false,
        )
        .await
        .unwrap();

    assert_eq!(cluster.restored.lock().unwrap().len(), 1, "one restore for two deploys");
    let templates: Vec<_> = client
        .names()
        .into_iter()
        .filter(|n| n.starts_with("template_"))
        .collect();
    assert_eq!(templates.len(), 1);
}

#[tokio::test]
async fn existing_target_fails_without_drop_flag() {
    let client = FakeDbServer::default()
        .with_template("template_cafe", "Studio_8.1.3.zip")
        .with_database("site1");
    let cluster = FakeCluster::default();
    let artifact = artifact_dir_with_backup("backup");

    let engine = RestoreEngine::new();
    let err = engine
        .restore_to_cluster(
            &ClusterRestoreTarget {
                client: &client,
                cluster: &cluster,
            },
            artifact.path(),
            "site1",
            "Studio_8.1.3.zip",
            DatabaseKind::Postgres,
            false,
        )
        .await
        .unwrap_err();

    match err {
        DeployError::TargetAlreadyExists { database } => assert_eq!(database, "site1"),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn existing_target_is_dropped_when_requested() {
    let client = FakeDbServer::default()
        .with_template("template_cafe", "Studio_8.1.3.zip")
        .with_database("site1");
    let cluster = FakeCluster::default();
    let artifact = artifact_dir_with_backup("backup");

    let engine = RestoreEngine::new();
    engine
        .restore_to_cluster(
            &ClusterRestoreTarget {
                client: &client,
                cluster: &cluster,
            },
            artifact.path(),
            "site1",
            "Studio_8.1.3.zip",
            DatabaseKind::Postgres,
            true,
        )
        .await
        .unwrap();

    let calls = client.calls();
    assert!(calls.contains(&"drop:site1".to_string()));
    assert!(calls.contains(&"clone:template_cafe->site1".to_string()));
}

#[tokio::test]
async fn missing_backup_is_fatal() {
    let client = FakeDbServer::default();
    let cluster = FakeCluster::default();
    let empty = TempDir::new().unwrap();

    let engine = RestoreEngine::new();
    let err = engine
        .restore_to_cluster(
            &ClusterRestoreTarget {
                client: &client,
                cluster: &cluster,
            },
            empty.path(),
            "site1",
            "Studio_8.1.3.zip",
            DatabaseKind::Postgres,
            false,
        )
        .await
        .unwrap_err();

    assert!(matches!(err, DeployError::BackupNotFound { .. }));
}

#[tokio::test]
async fn cluster_mssql_restore_stages_and_cleans_up() {
    let client = FakeDbServer::default();
    let cluster = FakeCluster::default();
    let temp = TempDir::new().unwrap();
    let db_dir = temp.path().join("db");
    std::fs::create_dir_all(&db_dir).unwrap();
    std::fs::write(db_dir.join("data.bak"), b"TAPE").unwrap();

    let engine = RestoreEngine::new();
    engine
        .restore_to_cluster(
            &ClusterRestoreTarget {
                client: &client,
                cluster: &cluster,
            },
            temp.path(),
            "site1",
            "Studio_8.1.3.zip",
            DatabaseKind::Mssql,
            false,
        )
        .await
        .unwrap();

    assert_eq!(cluster.staged.lock().unwrap().as_slice(), ["site1.bak"]);
    assert_eq!(cluster.deleted.lock().unwrap().as_slice(), ["site1.bak"]);
    // MSSQL restores address the staged file by its in-pod data path.
    assert!(client
        .calls()
        .contains(&"restore:site1<-/var/opt/mssql/data/site1.bak".to_string()));
}

#[tokio::test]
async fn oversized_mssql_backup_bypasses_pod_transport() {
    let client = FakeDbServer::default();
    let fallback = TempDir::new().unwrap();
    let cluster = FakeCluster {
        fallback_dir: Some(fallback.path().to_path_buf()),
        ..Default::default()
    };
    let temp = TempDir::new().unwrap();
    let db_dir = temp.path().join("db");
    std::fs::create_dir_all(&db_dir).unwrap();
    std::fs::write(db_dir.join("data.bak"), b"TAPE backup payload").unwrap();

    let engine = RestoreEngine::new().with_staging_size_limit(1);
    engine
        .restore_to_cluster(
            &ClusterRestoreTarget {
                client: &client,
                cluster: &cluster,
            },
            temp.path(),
            "site1",
            "Studio_8.1.3.zip",
            DatabaseKind::Mssql,
            false,
        )
        .await
        .unwrap();

    // The pod transport was never used; the file went through the mount.
    assert!(cluster.staged.lock().unwrap().is_empty());
    assert!(cluster.deleted.lock().unwrap().is_empty());
    // The server still addresses the file by its in-pod data path.
    assert!(client
        .calls()
        .contains(&"restore:site1<-/var/opt/mssql/data/site1.bak".to_string()));
    // The direct copy is cleaned up after the restore.
    assert!(!fallback.path().join("site1.bak").exists());
}

#[tokio::test]
async fn oversized_backup_without_fallback_dir_is_fatal() {
    let client = FakeDbServer::default();
    let cluster = FakeCluster::default();
    let temp = TempDir::new().unwrap();
    let db_dir = temp.path().join("db");
    std::fs::create_dir_all(&db_dir).unwrap();
    std::fs::write(db_dir.join("data.bak"), b"TAPE backup payload").unwrap();

    let engine = RestoreEngine::new().with_staging_size_limit(1);
    let err = engine
        .restore_to_cluster(
            &ClusterRestoreTarget {
                client: &client,
                cluster: &cluster,
            },
            temp.path(),
            "site1",
            "Studio_8.1.3.zip",
            DatabaseKind::Mssql,
            false,
        )
        .await
        .unwrap_err();

    assert!(err.to_string().contains("staging limit"));
    assert!(client.calls().is_empty(), "no restore should be attempted");
}

#[tokio::test]
async fn local_restore_aborts_on_failed_connection_test() {
    let client = FakeDbServer {
        fail_connection: true,
        ..Default::default()
    };
    let artifact = artifact_dir_with_backup("backup");

    let engine = RestoreEngine::new();
    let err = engine
        .restore_to_local(
            &LocalRestoreTarget {
                client: &client,
                kind: DatabaseKind::Postgres,
            },
            artifact.path(),
            "site1",
            "Studio_8.1.3.zip",
            false,
        )
        .await
        .unwrap_err();

    assert!(matches!(err, DeployError::ConnectionTestFailed { .. }));
    assert_eq!(client.calls(), ["test_connection"]);
}

#[tokio::test]
async fn local_restore_rejects_incompatible_backup() {
    let client = FakeDbServer::default();
    // A postgres dump in the artifact, but an MSSQL server configured.
    let artifact = artifact_dir_with_backup("backup");

    let engine = RestoreEngine::new();
    let err = engine
        .restore_to_local(
            &LocalRestoreTarget {
                client: &client,
                kind: DatabaseKind::Mssql,
            },
            artifact.path(),
            "site1",
            "Studio_8.1.3.zip",
            false,
        )
        .await
        .unwrap_err();

    assert!(err.to_string().contains("not compatible"));
}

#[tokio::test]
async fn local_mssql_restore_skips_template_machinery() {
    let client = FakeDbServer::default();
    let temp = TempDir::new().unwrap();
    std::fs::write(temp.path().join("data.bak"), b"TAPE").unwrap();

    let engine = RestoreEngine::new();
    engine
        .restore_to_local(
            &LocalRestoreTarget {
                client: &client,
                kind: DatabaseKind::Mssql,
            },
            temp.path(),
            "site1",
            "Studio_8.1.3.zip",
            false,
        )
        .await
        .unwrap();

    let calls = client.calls();
    assert!(calls.iter().any(|c| c.starts_with("restore:site1<-")));
    assert!(!calls.iter().any(|c| c.starts_with("set_as_template")));
}
