//! Backup file discovery and engine-family classification.

use std::io::Read;
use std::path::{Path, PathBuf};

use tracing::error;

use super::DatabaseKind;
use crate::error::DeployError;

/// Engine family a backup file belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupKind {
    Postgres,
    Mssql,
    Unknown,
}

impl BackupKind {
    pub fn is_compatible_with(&self, kind: DatabaseKind) -> bool {
        matches!(
            (self, kind),
            (BackupKind::Postgres, DatabaseKind::Postgres) | (BackupKind::Mssql, DatabaseKind::Mssql)
        )
    }
}

/// Classify a backup file by extension, confirmed by its magic bytes when
/// readable. `pg_dump` custom archives start with `PGDMP`; SQL Server
/// backups are Microsoft Tape Format and start with `TAPE`.
pub fn detect_backup_kind(path: &Path) -> BackupKind {
    let by_extension = match path.extension().and_then(|e| e.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("backup") => BackupKind::Postgres,
        Some(ext) if ext.eq_ignore_ascii_case("bak") => BackupKind::Mssql,
        _ => BackupKind::Unknown,
    };

    let mut header = [0u8; 5];
    let read = std::fs::File::open(path)
        .and_then(|mut f| f.read_exact(&mut header))
        .is_ok();
    if !read {
        return by_extension;
    }

    if header.starts_with(b"PGDMP") {
        BackupKind::Postgres
    } else if header.starts_with(b"TAPE") {
        BackupKind::Mssql
    } else {
        by_extension
    }
}

/// Find the engine-specific backup file under an extracted artifact tree.
///
/// Searches the `db` subdirectory first, then the root. Absence is fatal;
/// the directory contents are logged to make a malformed artifact easy to
/// diagnose.
pub fn find_backup_file(unzipped_dir: &Path, kind: DatabaseKind) -> Result<PathBuf, DeployError> {
    let extension = kind.backup_extension();
    let db_dir = unzipped_dir.join("db");

    if let Some(found) = first_file_with_extension(&db_dir, extension) {
        return Ok(found);
    }
    if let Some(found) = first_file_with_extension(unzipped_dir, extension) {
        return Ok(found);
    }

    error!(
        directory = %unzipped_dir.display(),
        "Backup file (*.{extension}) not found"
    );
    error!(
        "Directory structure: {}",
        list_entry_names(unzipped_dir, true).join(", ")
    );
    error!(
        "Files in root: {}",
        list_entry_names(unzipped_dir, false).join(", ")
    );
    if db_dir.is_dir() {
        error!(
            "Files in db/: {}",
            list_entry_names(&db_dir, false).join(", ")
        );
    }

    Err(DeployError::BackupNotFound {
        directory: unzipped_dir.to_path_buf(),
    })
}

/// Find any backup file (either engine family) anywhere under the tree.
/// Used by the local-server path, which detects the family afterwards.
pub fn find_any_backup(dir: &Path) -> Option<PathBuf> {
    let mut found = Vec::new();
    collect_backups(dir, &mut found);
    found.sort();
    found.into_iter().next()
}

/// Infer the artifact's database kind from which backup family it ships.
pub fn detect_database_kind(unzipped_dir: &Path) -> Option<DatabaseKind> {
    for kind in [DatabaseKind::Postgres, DatabaseKind::Mssql] {
        let db_dir = unzipped_dir.join("db");
        if first_file_with_extension(&db_dir, kind.backup_extension()).is_some()
            || first_file_with_extension(unzipped_dir, kind.backup_extension()).is_some()
        {
            return Some(kind);
        }
    }
    None
}

fn collect_backups(dir: &Path, out: &mut Vec<PathBuf>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_backups(&path, out);
        } else if path.extension().is_some_and(|ext| {
            ext.eq_ignore_ascii_case("backup") || ext.eq_ignore_ascii_case("bak")
        }) {
            out.push(path);
        }
    }
}

fn first_file_with_extension(dir: &Path, extension: &str) -> Option<PathBuf> {
    let entries = std::fs::read_dir(dir).ok()?;
    let mut files: Vec<PathBuf> = entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|p| {
            p.is_file()
                && p.extension()
                    .is_some_and(|ext| ext.eq_ignore_ascii_case(extension))
        })
        .collect();
    files.sort();
    files.into_iter().next()
}

fn list_entry_names(dir: &Path, directories: bool) -> Vec<String> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|p| p.is_dir() == directories)
        .take(10)
        .filter_map(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
        .collect()
}
