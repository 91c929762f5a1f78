//! Daemon config file: the servers to manage and their curves.

use std::collections::HashSet;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::model::{FanCurve, Server};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    pub servers: Vec<ServerEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerEntry {
    #[serde(flatten)]
    pub server: Server,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub curve: Option<FanCurve>,
}

fn default_log_level() -> String {
    "info".to_string()
}

pub async fn load_config(path: &Path) -> Result<DaemonConfig> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Cannot read config file {:?}", path))?;
    let config: DaemonConfig =
        serde_json::from_str(&content).with_context(|| format!("Invalid config file {:?}", path))?;

    // Server names are unique identifiers alongside the ids.
    let mut names = HashSet::new();
    for entry in &config.servers {
        if !names.insert(entry.server.name.as_str()) {
            bail!("Duplicate server name '{}' in {:?}", entry.server.name, path);
        }
    }

    info!("Loaded {} server(s) from {:?}", config.servers.len(), path);
    Ok(config)
}

pub async fn save_config(config: &DaemonConfig, path: &Path) -> Result<()> {
    let content = serde_json::to_string_pretty(config)?;
    tokio::fs::write(path, content)
        .await
        .with_context(|| format!("Cannot write config file {:?}", path))?;
    info!("Configuration saved to {:?}", path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BmcCredentials, ControlMode, CurvePoint};
    use uuid::Uuid;

    fn sample_config() -> DaemonConfig {
        DaemonConfig {
            log_level: "debug".to_string(),
            servers: vec![ServerEntry {
                server: Server {
                    id: Uuid::new_v4(),
                    name: "rack-01".to_string(),
                    model: "r730".to_string(),
                    bmc: BmcCredentials {
                        host: "10.0.0.10".to_string(),
                        username: "root".to_string(),
                        password: "calvin".to_string(),
                    },
                    control_mode: ControlMode::Auto,
                    manual_fan_speed: None,
                },
                curve: Some(FanCurve::new(vec![
                    CurvePoint {
                        temp: 40.0,
                        speed: 5,
                    },
                    CurvePoint {
                        temp: 80.0,
                        speed: 70,
                    },
                ])),
            }],
        }
    }

    #[tokio::test]
    async fn config_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rackfand.json");

        let config = sample_config();
        save_config(&config, &path).await.unwrap();
        let loaded = load_config(&path).await.unwrap();

        assert_eq!(loaded.log_level, "debug");
        assert_eq!(loaded.servers.len(), 1);
        assert_eq!(loaded.servers[0].server.id, config.servers[0].server.id);
        assert_eq!(loaded.servers[0].server.model, "r730");
        assert_eq!(
            loaded.servers[0].curve.as_ref().unwrap().points,
            config.servers[0].curve.as_ref().unwrap().points
        );
    }

    #[tokio::test]
    async fn missing_server_id_is_generated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rackfand.json");
        let json = r#"{
            "servers": [{
                "name": "rack-02",
                "model": "r4900g3",
                "bmc": {"host": "10.0.0.20", "username": "admin", "password": "admin"},
                "control_mode": "manual",
                "manual_fan_speed": 40
            }]
        }"#;
        tokio::fs::write(&path, json).await.unwrap();

        let loaded = load_config(&path).await.unwrap();
        assert_eq!(loaded.log_level, "info");
        assert_eq!(loaded.servers[0].server.control_mode, ControlMode::Manual);
        assert_eq!(loaded.servers[0].server.manual_fan_speed, Some(40));
    }

    #[tokio::test]
    async fn duplicate_names_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rackfand.json");

        let mut config = sample_config();
        let mut dup = config.servers[0].clone();
        dup.server.id = Uuid::new_v4();
        config.servers.push(dup);
        save_config(&config, &path).await.unwrap();

        assert!(load_config(&path).await.is_err());
    }
}
