//! Top-level deploy workflow.

mod connection;
mod engine;

pub use connection::{
    mssql_connection_string, mssql_windows_auth_connection_string, postgres_connection_string,
    redis_connection_string, write_connection_strings,
};
pub use engine::{DeployEngine, DeployOutcome};

use std::path::{Path, PathBuf};

use crate::artifact::RuntimePlatform;
use crate::db::DatabaseKind;
use crate::strategy::DeployMethod;

/// Operator intent for one deployment. Built once per invocation; the
/// engine only reads it.
#[derive(Debug, Clone)]
pub struct DeployRequest {
    pub site_name: String,
    pub site_port: u16,
    /// Explicit archive to deploy; when absent the artifact resolver
    /// locates one from `product`.
    pub zip_path: Option<PathBuf>,
    pub product: Option<String>,
    pub database_kind: Option<DatabaseKind>,
    pub runtime_platform: RuntimePlatform,
    /// Named local database server from settings; `None` targets the
    /// shared cluster.
    pub db_server_name: Option<String>,
    /// Deployment folder override for self-hosted deployments.
    pub app_path: Option<PathBuf>,
    pub drop_if_exists: bool,
    pub auto_launch: bool,
    pub method: DeployMethod,
    /// Skip the Redis scan and use this logical database index.
    pub redis_db: Option<u32>,
}

/// True when the extracted tree has the classic .NET-Framework layout.
pub fn is_net_framework_tree(folder: &Path) -> bool {
    folder.join("Terrasoft.WebApp").is_dir()
}

/// Best-effort check that nothing is already listening on the port.
/// Advisory only; the pipeline warns and proceeds on a taken port.
pub fn is_port_available(port: u16) -> bool {
    std::net::TcpListener::bind(("127.0.0.1", port)).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn framework_tree_detected_by_webapp_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!is_net_framework_tree(dir.path()));
        std::fs::create_dir(dir.path().join("Terrasoft.WebApp")).unwrap();
        assert!(is_net_framework_tree(dir.path()));
    }
}
