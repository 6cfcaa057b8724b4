//! Build artifact location.

mod resolver;
mod version;

pub use resolver::ArtifactResolver;
pub use version::BuildVersion;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::db::DatabaseKind;

/// Runtime platform a build artifact targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimePlatform {
    /// Classic .NET Framework builds carry no platform suffix.
    NetFramework,
    Net6,
}

impl RuntimePlatform {
    /// Suffix embedded in artifact file and directory names.
    pub fn suffix(&self) -> &'static str {
        match self {
            RuntimePlatform::NetFramework => "",
            RuntimePlatform::Net6 => "Net6",
        }
    }
}

/// A resolved build archive. Immutable once resolved.
#[derive(Debug, Clone)]
pub struct BuildArtifact {
    pub product: String,
    pub database_kind: DatabaseKind,
    pub runtime_platform: RuntimePlatform,
    pub version: BuildVersion,
    pub path: PathBuf,
}
