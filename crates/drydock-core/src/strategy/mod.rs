//! Deployment strategy selection.
//!
//! A deployed instance is served either by the platform's managed web host
//! (IIS on Windows) or by a self-hosted process launched directly from the
//! deployment folder. Selection is explicit when the caller asks for a
//! method and falls back to what the machine supports otherwise.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use tracing::{info, warn};

use crate::process::{ExecutionOptions, ProcessExecutor};

/// Caller hint for how the instance should be hosted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeployMethod {
    #[default]
    Auto,
    ManagedHost,
    SelfHosted,
}

impl FromStr for DeployMethod {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "iis" | "managed" | "managed-host" => Ok(Self::ManagedHost),
            "self-hosted" | "selfhosted" | "process" => Ok(Self::SelfHosted),
            other => anyhow::bail!("Unknown deploy method: {other} (expected auto, iis or self-hosted)"),
        }
    }
}

/// Picks a hosting strategy from the caller's hint and what the machine
/// actually supports.
#[derive(Debug, Clone)]
pub struct StrategySelector {
    managed_host_available: bool,
    host_root: Option<PathBuf>,
}

impl StrategySelector {
    pub fn new(managed_host_available: bool, host_root: Option<PathBuf>) -> Self {
        Self {
            managed_host_available,
            host_root,
        }
    }

    /// Selector reflecting the current operating system: the managed host
    /// is only an option on Windows, and only when a site root is
    /// configured.
    pub fn from_os(host_root: Option<PathBuf>) -> Self {
        Self::new(cfg!(windows) && host_root.is_some(), host_root)
    }

    pub fn select(&self, hint: DeployMethod) -> DeploymentStrategy {
        match hint {
            DeployMethod::SelfHosted => DeploymentStrategy::SelfHosted,
            DeployMethod::ManagedHost => {
                if self.managed_host_available {
                    DeploymentStrategy::ManagedHost
                } else {
                    warn!("managed host is not available on this machine, falling back to self-hosted");
                    DeploymentStrategy::SelfHosted
                }
            }
            DeployMethod::Auto => {
                if self.managed_host_available {
                    DeploymentStrategy::ManagedHost
                } else {
                    DeploymentStrategy::SelfHosted
                }
            }
        }
    }

    pub fn host_root(&self) -> Option<&Path> {
        self.host_root.as_deref()
    }
}

/// How the deployed files are turned into a running application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeploymentStrategy {
    /// Register the folder as a site in the platform web host.
    ManagedHost,
    /// Launch the application runtime directly against the folder.
    SelfHosted,
}

impl DeploymentStrategy {
    pub fn is_managed(&self) -> bool {
        matches!(self, Self::ManagedHost)
    }

    /// Bring the deployed folder up as a running site. Returns the hosting
    /// tool's exit code; zero means the site is being served.
    pub async fn deploy(
        &self,
        executor: &ProcessExecutor,
        folder: &Path,
        site_name: &str,
        port: u16,
    ) -> anyhow::Result<i32> {
        match self {
            Self::ManagedHost => {
                info!(site = site_name, port, "registering site with the managed host");
                let options = ExecutionOptions::new(
                    r"C:\Windows\System32\inetsrv\appcmd.exe",
                    [
                        "add".to_string(),
                        "site".to_string(),
                        format!("/name:{site_name}"),
                        format!("/bindings:http/*:{port}:"),
                        format!("/physicalPath:{}", folder.display()),
                    ],
                );
                let result = executor.execute_and_capture(options).await;
                if !result.started {
                    warn!("could not start appcmd; is IIS installed?");
                    return Ok(1);
                }
                Ok(result.exit_code.unwrap_or(1))
            }
            Self::SelfHosted => {
                info!(site = site_name, port, "launching self-hosted application");
                let options = ExecutionOptions::new("dotnet", ["Terrasoft.WebHost.dll"])
                    .working_dir(folder)
                    .env("ASPNETCORE_URLS", format!("http://localhost:{port}"));
                let launch = executor.fire_and_forget(&options).await;
                if launch.started {
                    Ok(0)
                } else {
                    warn!("could not launch the application runtime");
                    Ok(1)
                }
            }
        }
    }

    /// URL the deployed instance will answer on. The managed host binds on
    /// every interface, so the machine name is advertised; a self-hosted
    /// process only listens on loopback.
    pub fn application_url(&self, port: u16) -> String {
        match self {
            Self::ManagedHost => format!("http://{}:{port}", machine_name()),
            Self::SelfHosted => format!("http://localhost:{port}"),
        }
    }
}

fn machine_name() -> String {
    std::env::var("COMPUTERNAME")
        .or_else(|_| std::env::var("HOSTNAME"))
        .unwrap_or_else(|_| "localhost".to_string())
}
