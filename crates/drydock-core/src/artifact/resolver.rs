//! Locates the newest matching build archive on the artifact server.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tracing::debug;

use super::{BuildArtifact, BuildVersion, RuntimePlatform};
use crate::db::DatabaseKind;
use crate::error::DeployError;

/// Resolves build archives from a version-numbered directory tree.
///
/// The tree looks like `<root>/<version>/<version.revision>/**/<archive>.zip`.
/// Resolution picks the single newest version directory and searches only
/// inside it; a missing artifact there fails rather than falling back to an
/// older version.
#[derive(Debug, Clone)]
pub struct ArtifactResolver {
    root: PathBuf,
}

impl ArtifactResolver {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Find the newest archive for the product/database/platform triple.
    pub fn resolve(
        &self,
        product: &str,
        database_kind: DatabaseKind,
        runtime_platform: RuntimePlatform,
    ) -> Result<BuildArtifact, DeployError> {
        let token = file_token(product, database_kind, runtime_platform);
        let not_found = || DeployError::ArtifactNotFound {
            token: token.clone(),
            root: self.root.clone(),
        };

        let latest = self.latest_version().ok_or_else(not_found)?;
        let version_dir = self.root.join(latest.as_str());

        // Revision directories, newest creation time first. The version
        // directory itself is the fallback when none parse as versions.
        let mut revision_dirs = subdirectories(&version_dir)
            .into_iter()
            .filter(|dir| dir_name(dir).parse::<BuildVersion>().is_ok())
            .collect::<Vec<_>>();
        revision_dirs.sort_by_key(|dir| std::cmp::Reverse(created_at(dir)));
        if revision_dirs.is_empty() {
            revision_dirs.push(version_dir);
        }

        let needle = token.to_lowercase();
        for search_dir in &revision_dirs {
            let mut archives = Vec::new();
            collect_zip_files(search_dir, &mut archives);
            archives.sort_by_key(|path| std::cmp::Reverse(modified_at(path)));

            for archive in archives {
                let name = archive
                    .file_name()
                    .map(|n| n.to_string_lossy().to_lowercase())
                    .unwrap_or_default();
                if name.contains(&needle) {
                    debug!(path = %archive.display(), "Resolved build artifact");
                    return Ok(BuildArtifact {
                        product: product.to_string(),
                        database_kind,
                        runtime_platform,
                        version: latest,
                        path: archive,
                    });
                }
            }
        }

        Err(not_found())
    }

    /// Greatest version-parseable subdirectory of the artifact root.
    fn latest_version(&self) -> Option<BuildVersion> {
        subdirectories(&self.root)
            .iter()
            .filter_map(|dir| dir_name(dir).parse::<BuildVersion>().ok())
            .max()
    }
}

/// Archive name token for a product: `_<product><suffix>_Softkey_<db>_ENU.zip`.
fn file_token(product: &str, kind: DatabaseKind, platform: RuntimePlatform) -> String {
    format!(
        "_{product}{}_Softkey_{}_ENU.zip",
        platform.suffix(),
        kind.artifact_token()
    )
}

fn subdirectories(path: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(path) else {
        return Vec::new();
    };
    entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|p| p.is_dir())
        .collect()
}

fn dir_name(path: &Path) -> &str {
    path.file_name().and_then(|n| n.to_str()).unwrap_or("")
}

fn created_at(path: &Path) -> SystemTime {
    std::fs::metadata(path)
        .and_then(|m| m.created().or_else(|_| m.modified()))
        .unwrap_or(SystemTime::UNIX_EPOCH)
}

fn modified_at(path: &Path) -> SystemTime {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .unwrap_or(SystemTime::UNIX_EPOCH)
}

fn collect_zip_files(dir: &Path, out: &mut Vec<PathBuf>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_zip_files(&path, out);
        } else if path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("zip"))
        {
            out.push(path);
        }
    }
}
