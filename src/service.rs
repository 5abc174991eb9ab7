//! Gateway service lifecycle
//!
//! The package/service lifecycle manager is an external collaborator; the
//! reconciler only needs three narrow capabilities from it: force-write the
//! locally rendered configuration, restart the daemon, and report whether
//! the unit is administratively paused (a paused unit defers all
//! reconciliation).

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use tokio::process::Command;
use tracing::{debug, info};

use crate::{Error, Result};

/// Lifecycle operations for the local gateway daemon
#[cfg_attr(test, automock)]
#[async_trait]
pub trait GatewayService: Send + Sync {
    /// Whether the unit is administratively paused
    fn is_paused(&self) -> bool;

    /// Force-write all locally rendered configuration files
    async fn write_configs(&self) -> Result<()>;

    /// Restart the gateway daemon
    async fn restart(&self) -> Result<()>;
}

/// systemd-managed gateway service
pub struct SystemdGateway {
    unit: String,
    paused_marker: Option<std::path::PathBuf>,
    render_command: Option<Vec<String>>,
}

impl SystemdGateway {
    /// Create a handle for the given systemd unit
    pub fn new(unit: impl Into<String>) -> Self {
        Self {
            unit: unit.into(),
            paused_marker: None,
            render_command: None,
        }
    }

    /// Treat the presence of this file as "unit paused"
    pub fn paused_marker(mut self, path: impl Into<std::path::PathBuf>) -> Self {
        self.paused_marker = Some(path.into());
        self
    }

    /// Command to run when configuration must be re-rendered
    ///
    /// Template rendering is owned by the deployment tooling; this hook lets
    /// the agent trigger it before a restart.
    pub fn render_command(mut self, command: Vec<String>) -> Self {
        self.render_command = Some(command);
        self
    }
}

#[async_trait]
impl GatewayService for SystemdGateway {
    fn is_paused(&self) -> bool {
        self.paused_marker
            .as_ref()
            .map(|path| path.exists())
            .unwrap_or(false)
    }

    async fn write_configs(&self) -> Result<()> {
        let Some(command) = &self.render_command else {
            debug!("no render command configured, skipping config write");
            return Ok(());
        };
        let (program, rest) = command
            .split_first()
            .ok_or_else(|| Error::config("render command must not be empty"))?;

        let output = Command::new(program)
            .args(rest)
            .output()
            .await
            .map_err(|e| Error::restart(format!("failed to run {}: {}", program, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::restart(format!(
                "config render failed: {}",
                stderr.trim()
            )));
        }
        Ok(())
    }

    async fn restart(&self) -> Result<()> {
        info!(unit = %self.unit, "restarting gateway service");

        let output = Command::new("systemctl")
            .args(["restart", &self.unit])
            .output()
            .await
            .map_err(|e| Error::restart(format!("failed to run systemctl: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::restart(format!(
                "systemctl restart {} failed: {}",
                self.unit,
                stderr.trim()
            )));
        }
        Ok(())
    }
}
