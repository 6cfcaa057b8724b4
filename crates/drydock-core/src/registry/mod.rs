//! Registry of deployed environments.
//!
//! Every successful deployment is recorded in a TOML file so later commands
//! can address the instance by name.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Connection details for one deployed instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentRecord {
    pub url: String,
    pub login: String,
    pub password: String,
    pub is_net_core: bool,
    pub path: PathBuf,
}

impl EnvironmentRecord {
    /// Record with the stock administrative credentials every fresh
    /// instance ships with.
    pub fn with_default_credentials(url: String, is_net_core: bool, path: PathBuf) -> Self {
        Self {
            url,
            login: "Supervisor".to_string(),
            password: "Supervisor".to_string(),
            is_net_core,
            path,
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RegistryFile {
    #[serde(default)]
    environments: BTreeMap<String, EnvironmentRecord>,
}

/// File-backed registry of environments, keyed by name.
#[derive(Debug, Clone)]
pub struct EnvironmentRegistry {
    path: PathBuf,
}

impl EnvironmentRegistry {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Registry in the per-user config directory.
    pub fn from_user_config_dir() -> anyhow::Result<Self> {
        let base = dirs::config_dir().context("Could not determine user config directory")?;
        Ok(Self::new(base.join("drydock").join("environments.toml")))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Insert or replace the record for `name` and persist the file.
    pub fn register(&self, name: &str, record: EnvironmentRecord) -> anyhow::Result<()> {
        let mut file = self.load_file()?;
        file.environments.insert(name.to_string(), record);
        self.save_file(&file)?;
        info!(environment = name, "registered environment");
        Ok(())
    }

    pub fn get(&self, name: &str) -> anyhow::Result<Option<EnvironmentRecord>> {
        Ok(self.load_file()?.environments.remove(name))
    }

    pub fn names(&self) -> anyhow::Result<Vec<String>> {
        Ok(self.load_file()?.environments.into_keys().collect())
    }

    fn load_file(&self) -> anyhow::Result<RegistryFile> {
        if !self.path.exists() {
            return Ok(RegistryFile::default());
        }
        let text = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read registry: {}", self.path.display()))?;
        toml::from_str(&text)
            .with_context(|| format!("Failed to parse registry: {}", self.path.display()))
    }

    fn save_file(&self, file: &RegistryFile) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        let text = toml::to_string_pretty(file).context("Failed to serialize registry")?;
        std::fs::write(&self.path, text)
            .with_context(|| format!("Failed to write registry: {}", self.path.display()))?;
        Ok(())
    }
}
