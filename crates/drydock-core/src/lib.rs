//! Drydock Core Library
//!
//! Provides the deployment engine: build artifact resolution, database
//! restore with template caching, environment registration, and the
//! orchestration pipeline that strings them together.

pub mod artifact;
pub mod cache;
pub mod cluster;
pub mod config;
pub mod db;
pub mod error;
pub mod fs;
pub mod health;
pub mod orchestration;
pub mod process;
pub mod registry;
pub mod strategy;

/// Re-exports of commonly used types
pub mod prelude {
    // Configuration
    pub use crate::config::{ClusterSettings, LocalDbServer, Settings, SettingsStore};

    // Artifacts
    pub use crate::artifact::{ArtifactResolver, BuildArtifact, BuildVersion, RuntimePlatform};

    // Databases
    pub use crate::db::{
        DatabaseClient, DatabaseKind, MssqlClient, PostgresClient, RestoreEngine, TemplateMetadata,
    };

    // Cluster
    pub use crate::cluster::{ClusterCommands, ClusterConnection, KubectlCluster, PodKind};

    // Processes
    pub use crate::process::{
        ExecutionOptions, ExecutionResult, LaunchResult, OutputStream, ProcessExecutor,
    };

    // Strategy & health
    pub use crate::health::{HealthProbe, ReadinessPoller, TcpHealthProbe};
    pub use crate::strategy::{DeployMethod, DeploymentStrategy, StrategySelector};

    // Orchestration
    pub use crate::orchestration::{DeployEngine, DeployOutcome, DeployRequest};

    // Registry
    pub use crate::registry::{EnvironmentRecord, EnvironmentRegistry};

    // Errors
    pub use crate::error::DeployError;
}
