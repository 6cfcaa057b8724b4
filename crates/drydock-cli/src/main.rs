//! Drydock - application instance deployer
//!
//! Usage:
//!   drydock deploy --product Studio --site dev1 --port 8100
//!   drydock deploy --zip /path/to/build.zip --site dev1 --port 8100 --db-server local-pg
//!   drydock envs

mod interactive;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use console::style;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use drydock_core::artifact::RuntimePlatform;
use drydock_core::config::SettingsStore;
use drydock_core::db::DatabaseKind;
use drydock_core::health::TcpHealthProbe;
use drydock_core::orchestration::{DeployEngine, DeployRequest};
use drydock_core::registry::EnvironmentRegistry;
use drydock_core::strategy::DeployMethod;

use crate::interactive::resolve_site_identity;

#[derive(Parser)]
#[command(name = "drydock")]
#[command(about = "Deploys application instances from versioned build artifacts", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Deploy an application instance
    Deploy(Box<DeployArgs>),

    /// List registered environments
    Envs,
}

#[derive(clap::Args)]
struct DeployArgs {
    /// Site name; prompted for when omitted
    #[arg(long)]
    site: Option<String>,

    /// Site port; prompted for when omitted
    #[arg(long)]
    port: Option<u16>,

    /// Product to resolve from the artifact server
    #[arg(long, conflicts_with = "zip")]
    product: Option<String>,

    /// Path to a build archive, skipping artifact resolution
    #[arg(long)]
    zip: Option<PathBuf>,

    /// Database kind (postgres, mssql); detected from the archive when omitted
    #[arg(long)]
    db: Option<DbKindArg>,

    /// Runtime platform of the build
    #[arg(long, default_value = "net6")]
    platform: PlatformArg,

    /// Named local database server from settings; defaults to the cluster
    #[arg(long)]
    db_server: Option<String>,

    /// Deployment folder for self-hosted deployments
    #[arg(long)]
    app_path: Option<PathBuf>,

    /// Drop and recreate the database when it already exists
    #[arg(long)]
    drop_if_exists: bool,

    /// Open a browser on the new instance after deployment
    #[arg(long)]
    open: bool,

    /// Hosting method (auto, iis, self-hosted)
    #[arg(long, default_value = "auto")]
    method: String,

    /// Explicit Redis database index, skipping the scan
    #[arg(long)]
    redis_db: Option<u32>,
}

#[derive(Clone, Copy, ValueEnum)]
enum DbKindArg {
    Postgres,
    Mssql,
}

impl From<DbKindArg> for DatabaseKind {
    fn from(arg: DbKindArg) -> Self {
        match arg {
            DbKindArg::Postgres => DatabaseKind::Postgres,
            DbKindArg::Mssql => DatabaseKind::Mssql,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum PlatformArg {
    /// Classic .NET Framework build
    Framework,
    /// .NET 6 build
    Net6,
}

impl From<PlatformArg> for RuntimePlatform {
    fn from(arg: PlatformArg) -> Self {
        match arg {
            PlatformArg::Framework => RuntimePlatform::NetFramework,
            PlatformArg::Net6 => RuntimePlatform::Net6,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "drydock=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Deploy(args) => run_deploy(*args).await,
        Commands::Envs => run_envs(),
    }
}

async fn run_deploy(args: DeployArgs) -> Result<()> {
    let site = resolve_site_identity(args.site, args.port)?;
    let method: DeployMethod = args.method.parse()?;

    let settings = SettingsStore::from_user_config_dir()?.load()?;
    let registry = EnvironmentRegistry::from_user_config_dir()?;

    let request = DeployRequest {
        site_name: site.name,
        site_port: site.port,
        zip_path: args.zip,
        product: args.product,
        database_kind: args.db.map(Into::into),
        runtime_platform: args.platform.into(),
        db_server_name: args.db_server,
        app_path: args.app_path,
        drop_if_exists: args.drop_if_exists,
        auto_launch: args.open,
        method,
        redis_db: args.redis_db,
    };

    tracing::info!(
        site = request.site_name,
        port = request.site_port,
        "starting deployment"
    );
    let engine = DeployEngine::new(settings, registry)
        .with_probe(Arc::new(TcpHealthProbe::new("localhost", request.site_port)));
    match engine.execute(&request).await {
        Ok(outcome) => {
            println!(
                "{} {} deployed at {}",
                style("✓").green().bold(),
                outcome.site_name,
                outcome.url
            );
            Ok(())
        }
        Err(err) => {
            tracing::error!("deployment failed: {err}");
            std::process::exit(1);
        }
    }
}

fn run_envs() -> Result<()> {
    let registry = EnvironmentRegistry::from_user_config_dir()?;
    let names = registry.names()?;
    if names.is_empty() {
        println!("No environments registered yet.");
        return Ok(());
    }
    for name in names {
        if let Some(record) = registry.get(&name)? {
            println!("{}  {}  {}", style(&name).bold(), record.url, record.path.display());
        }
    }
    Ok(())
}
