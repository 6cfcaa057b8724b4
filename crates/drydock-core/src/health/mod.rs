//! Post-deploy readiness polling.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

/// Probe that checks whether a deployed environment answers requests.
///
/// The probe returns a process exit code: zero means the environment is up.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn execute(&self, environment: &str) -> i32;
}

/// Probe that checks whether the site's port accepts TCP connections.
///
/// A freshly launched instance binds its listener late in startup, so a
/// successful connect is a usable readiness signal without speaking the
/// application's protocol.
#[derive(Debug, Clone)]
pub struct TcpHealthProbe {
    host: String,
    port: u16,
}

impl TcpHealthProbe {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

#[async_trait]
impl HealthProbe for TcpHealthProbe {
    async fn execute(&self, environment: &str) -> i32 {
        match tokio::net::TcpStream::connect((self.host.as_str(), self.port)).await {
            Ok(_) => 0,
            Err(err) => {
                debug!(environment, host = self.host, port = self.port, %err, "probe connect failed");
                1
            }
        }
    }
}

/// Repeatedly probes a freshly deployed environment until it responds.
#[derive(Debug, Clone)]
pub struct ReadinessPoller {
    initial_delay: Duration,
    max_attempts: u32,
    retry_interval: Duration,
}

impl Default for ReadinessPoller {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(15),
            max_attempts: 10,
            retry_interval: Duration::from_secs(3),
        }
    }
}

impl ReadinessPoller {
    pub fn new(initial_delay: Duration, max_attempts: u32, retry_interval: Duration) -> Self {
        Self {
            initial_delay,
            max_attempts,
            retry_interval,
        }
    }

    /// Wait for the environment to come up. Returns `true` once a probe
    /// succeeds, `false` when every attempt fails. Never errors; readiness
    /// is advisory and the deployment has already happened.
    pub async fn wait_until_ready(&self, probe: &dyn HealthProbe, environment: &str) -> bool {
        info!(
            environment,
            "waiting {}s for the application to start",
            self.initial_delay.as_secs()
        );
        tokio::time::sleep(self.initial_delay).await;

        for attempt in 1..=self.max_attempts {
            if probe.execute(environment).await == 0 {
                info!(environment, attempt, "application is ready");
                return true;
            }
            if attempt < self.max_attempts {
                tokio::time::sleep(self.retry_interval).await;
            }
        }
        warn!(
            environment,
            attempts = self.max_attempts,
            "application did not become ready; it may still be starting"
        );
        false
    }
}
