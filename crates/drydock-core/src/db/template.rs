//! Template database metadata.
//!
//! A template database is stamped with a metadata comment of the form
//! `sourceFile:<name>|createdDate:<iso8601>|version:1.0`. The comment is
//! the authoritative lookup key for template reuse across deployments and
//! restarts; matching is an exact string comparison on the source field.

use chrono::{DateTime, Utc};

const METADATA_VERSION: &str = "1.0";

/// Parsed template metadata comment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateMetadata {
    pub source_file: String,
    pub created_date: DateTime<Utc>,
    pub version: String,
}

impl TemplateMetadata {
    /// Metadata for a template created now from the given source identity.
    pub fn for_source(source_file: &str) -> Self {
        Self {
            source_file: source_file.to_string(),
            created_date: Utc::now(),
            version: METADATA_VERSION.to_string(),
        }
    }

    /// Render the comment string stored on the template database.
    pub fn to_comment(&self) -> String {
        format!(
            "sourceFile:{}|createdDate:{}|version:{}",
            self.source_file,
            self.created_date.to_rfc3339(),
            self.version
        )
    }

    /// Parse a database comment. Returns `None` for comments that are not
    /// template metadata.
    pub fn parse(comment: &str) -> Option<Self> {
        let mut source_file = None;
        let mut created_date = None;
        let mut version = None;

        for field in comment.split('|') {
            let (key, value) = field.split_once(':')?;
            match key {
                "sourceFile" => source_file = Some(value.to_string()),
                // The value itself contains ':' separators; split_once only
                // took the first one.
                "createdDate" => {
                    created_date = DateTime::parse_from_rfc3339(value)
                        .ok()
                        .map(|d| d.with_timezone(&Utc));
                }
                "version" => version = Some(value.to_string()),
                _ => return None,
            }
        }

        Some(Self {
            source_file: source_file?,
            created_date: created_date?,
            version: version?,
        })
    }

    /// Whether this template was created from the given source identity.
    pub fn matches_source(&self, source_file: &str) -> bool {
        self.source_file == source_file
    }
}
