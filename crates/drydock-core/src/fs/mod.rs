//! Filesystem helpers for staging and placing deployment trees.

use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing::info;

/// Predicate controlling which entries a tree copy skips.
#[derive(Debug, Clone)]
pub struct CopyFilter {
    excluded_dirs: Vec<String>,
    excluded_extensions: Vec<String>,
}

impl CopyFilter {
    pub fn new(excluded_dirs: Vec<String>, excluded_extensions: Vec<String>) -> Self {
        Self {
            excluded_dirs,
            excluded_extensions,
        }
    }

    /// Filter for deployment copies: backup payloads never enter the live
    /// tree.
    pub fn deployment_default() -> Self {
        Self::new(
            vec!["db".to_string()],
            vec!["bak".to_string(), "backup".to_string()],
        )
    }

    pub fn excludes_dir(&self, name: &str) -> bool {
        let lower = name.to_lowercase();
        self.excluded_dirs.iter().any(|d| *d == lower)
    }

    pub fn excludes_file(&self, path: &Path) -> bool {
        let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
            return false;
        };
        let lower = ext.to_lowercase();
        self.excluded_extensions.iter().any(|e| *e == lower)
    }
}

/// Copy a directory tree, skipping entries the filter excludes.
pub fn copy_dir_filtered(src: &Path, dst: &Path, filter: &CopyFilter) -> anyhow::Result<()> {
    std::fs::create_dir_all(dst)
        .with_context(|| format!("Failed to create directory: {}", dst.display()))?;
    for entry in std::fs::read_dir(src)
        .with_context(|| format!("Failed to read directory: {}", src.display()))?
    {
        let entry = entry?;
        let src_path = entry.path();
        let file_name = entry.file_name();
        let dst_path = dst.join(&file_name);

        if src_path.is_dir() {
            if filter.excludes_dir(&file_name.to_string_lossy()) {
                continue;
            }
            copy_dir_filtered(&src_path, &dst_path, filter)?;
        } else {
            if filter.excludes_file(&src_path) {
                continue;
            }
            std::fs::copy(&src_path, &dst_path).with_context(|| {
                format!(
                    "Failed to copy {} to {}",
                    src_path.display(),
                    dst_path.display()
                )
            })?;
        }
    }
    Ok(())
}

/// Extract a build archive next to itself, reusing a previous extraction.
///
/// `<dir>/<name>.zip` extracts into `<dir>/<name>/`; when that directory
/// already exists the extraction is skipped so re-runs are cheap. A path
/// that is already a directory is taken as-is.
pub fn extract_zip_or_reuse(archive_path: &Path) -> anyhow::Result<PathBuf> {
    if archive_path.is_dir() {
        return Ok(archive_path.to_path_buf());
    }

    let stem = archive_path
        .file_stem()
        .ok_or_else(|| anyhow::anyhow!("Archive path has no file name: {}", archive_path.display()))?;
    let dest = archive_path
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join(stem);

    if dest.is_dir() {
        info!("Using existing extracted directory {}", dest.display());
        return Ok(dest);
    }

    info!("Extracting {} to {}", archive_path.display(), dest.display());
    let file = std::fs::File::open(archive_path)
        .with_context(|| format!("Failed to open archive: {}", archive_path.display()))?;
    let mut archive = zip::ZipArchive::new(file)
        .with_context(|| format!("Failed to read archive: {}", archive_path.display()))?;
    archive
        .extract(&dest)
        .with_context(|| format!("Failed to extract archive to {}", dest.display()))?;
    Ok(dest)
}

/// True for UNC-style network paths that should be staged locally before
/// extraction.
pub fn is_network_path(path: &Path) -> bool {
    path.to_string_lossy().starts_with(r"\\")
}

/// Copy a remote archive into the local products cache, skipping the copy
/// when a same-named file is already staged.
pub fn stage_local_copy(source: &Path, products_dir: &Path) -> anyhow::Result<PathBuf> {
    std::fs::create_dir_all(products_dir).with_context(|| {
        format!(
            "Failed to create products directory: {}",
            products_dir.display()
        )
    })?;

    let file_name = source
        .file_name()
        .ok_or_else(|| anyhow::anyhow!("Source path has no file name: {}", source.display()))?;
    let dest = products_dir.join(file_name);
    if dest.exists() {
        return Ok(dest);
    }

    info!(
        "Detected network source, copying to local folder {}",
        products_dir.display()
    );
    std::fs::copy(source, &dest).with_context(|| {
        format!(
            "Failed to copy {} to {}",
            source.display(),
            dest.display()
        )
    })?;
    Ok(dest)
}
