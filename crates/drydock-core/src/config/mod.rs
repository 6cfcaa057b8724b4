//! Settings store for drydock.toml.
//!
//! Holds the paths and server configurations the deploy pipeline needs:
//! where build artifacts live, where staged product archives are cached,
//! where the managed web-server host places sites, the cluster connection
//! parameters, and any locally configured database servers.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::db::DatabaseKind;

/// A locally configured database server, keyed by name in drydock.toml.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalDbServer {
    pub kind: DatabaseKind,
    pub hostname: String,
    pub port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    /// Use integrated Windows authentication instead of credentials (MSSQL only).
    #[serde(default)]
    pub windows_auth: bool,
    /// Directory containing pg_restore when it is not on PATH.
    #[serde(default)]
    pub pg_tools_path: Option<PathBuf>,
}

/// Connection parameters for the shared cluster's database and cache pods.
///
/// The resolved host is threaded explicitly through the restore and
/// connection-string stages rather than cached globally.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterSettings {
    /// DNS name the deployed application uses to reach the cluster.
    pub host: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default = "default_postgres_pod")]
    pub postgres_pod: String,
    #[serde(default = "default_mssql_pod")]
    pub mssql_pod: String,
    pub postgres_port: u16,
    pub postgres_username: String,
    pub postgres_password: String,
    #[serde(default)]
    pub mssql_port: u16,
    #[serde(default)]
    pub mssql_username: String,
    #[serde(default)]
    pub mssql_password: String,
    pub redis_port: u16,
    /// Host-visible mount of the MSSQL pod's data directory, used as a
    /// direct-copy fallback for backups too large for the pod transport.
    #[serde(default)]
    pub mssql_data_dir: Option<PathBuf>,
}

fn default_namespace() -> String {
    "drydock-infrastructure".to_string()
}

fn default_postgres_pod() -> String {
    "postgres-0".to_string()
}

fn default_mssql_pod() -> String {
    "mssql-0".to_string()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    /// Root of the version-numbered build artifact tree.
    #[serde(default)]
    pub artifact_server_path: Option<PathBuf>,
    /// Local cache for product archives staged from network sources.
    #[serde(default)]
    pub products_dir: Option<PathBuf>,
    /// Root directory the managed web-server host serves sites from.
    #[serde(default)]
    pub host_root: Option<PathBuf>,
    #[serde(default)]
    pub cluster: Option<ClusterSettings>,
    #[serde(default)]
    pub db_servers: BTreeMap<String, LocalDbServer>,
}

impl Settings {
    pub fn local_db_server(&self, name: &str) -> Option<&LocalDbServer> {
        self.db_servers.get(name)
    }

    pub fn db_server_names(&self) -> Vec<String> {
        self.db_servers.keys().cloned().collect()
    }
}

/// Loads and saves drydock.toml under the user config directory.
#[derive(Debug, Clone)]
pub struct SettingsStore {
    settings_path: PathBuf,
}

impl SettingsStore {
    pub fn from_user_config_dir() -> anyhow::Result<Self> {
        let dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?
            .join("drydock");
        Ok(Self::from_path(dir.join("drydock.toml")))
    }

    pub fn from_path(settings_path: PathBuf) -> Self {
        Self { settings_path }
    }

    pub fn settings_path(&self) -> &Path {
        &self.settings_path
    }

    pub fn load(&self) -> anyhow::Result<Settings> {
        if !self.settings_path.exists() {
            return Ok(Settings::default());
        }
        let content = std::fs::read_to_string(&self.settings_path).with_context(|| {
            format!(
                "Failed to read settings file: {}",
                self.settings_path.display()
            )
        })?;
        toml::from_str(&content).with_context(|| {
            format!(
                "Failed to parse settings file: {}",
                self.settings_path.display()
            )
        })
    }

    pub fn save(&self, settings: &Settings) -> anyhow::Result<()> {
        let content =
            toml::to_string_pretty(settings).context("Failed to serialize settings to TOML")?;
        if let Some(parent) = self.settings_path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }
        std::fs::write(&self.settings_path, content).with_context(|| {
            format!(
                "Failed to write settings file: {}",
                self.settings_path.display()
            )
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_file_yields_defaults() {
        let temp = tempfile::TempDir::new().unwrap();
        let store = SettingsStore::from_path(temp.path().join("drydock.toml"));
        let settings = store.load().unwrap();
        assert!(settings.db_servers.is_empty());
        assert!(settings.artifact_server_path.is_none());
    }

    #[test]
    fn settings_round_trip() {
        let temp = tempfile::TempDir::new().unwrap();
        let store = SettingsStore::from_path(temp.path().join("drydock.toml"));

        let mut settings = Settings {
            artifact_server_path: Some(PathBuf::from("/srv/builds")),
            ..Settings::default()
        };
        settings.db_servers.insert(
            "local-pg".to_string(),
            LocalDbServer {
                kind: DatabaseKind::Postgres,
                hostname: "localhost".to_string(),
                port: 5432,
                username: "postgres".to_string(),
                password: "postgres".to_string(),
                windows_auth: false,
                pg_tools_path: None,
            },
        );
        store.save(&settings).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(
            loaded.artifact_server_path.as_deref(),
            Some(Path::new("/srv/builds"))
        );
        let server = loaded.local_db_server("local-pg").unwrap();
        assert_eq!(server.port, 5432);
        assert_eq!(server.kind, DatabaseKind::Postgres);
    }
}
