//! Management-command execution against a server's BMC.
//!
//! One subprocess per command; the contract is execute-and-return (success or
//! failure), never hang. Model-specific semantics live in the controllers,
//! this layer only runs commands.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use tracing::debug;

use crate::model::BmcCredentials;

/// Executes a single management command against one server and returns its
/// text output, or an error.
#[async_trait]
pub trait ManagementDriver: Send + Sync {
    async fn execute(&self, bmc: &BmcCredentials, args: &[&str]) -> Result<String>;
}

/// Driver backed by the `ipmitool` binary over the lanplus interface.
pub struct IpmitoolDriver;

#[async_trait]
impl ManagementDriver for IpmitoolDriver {
    async fn execute(&self, bmc: &BmcCredentials, args: &[&str]) -> Result<String> {
        let mut cmd = tokio::process::Command::new("ipmitool");
        cmd.args(["-I", "lanplus", "-H", &bmc.host, "-U", &bmc.username]);
        cmd.args(["-P", &bmc.password]);
        cmd.args(args);

        debug!(
            "Executing: ipmitool -I lanplus -H {} -U {} -P *** {}",
            bmc.host,
            bmc.username,
            args.join(" ")
        );

        let output = cmd.output().await.context("Failed to execute ipmitool")?;

        if !output.status.success() {
            return Err(anyhow!(
                "ipmitool {} failed: {}",
                args.first().copied().unwrap_or_default(),
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}
