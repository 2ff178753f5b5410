//! Configuration surface for the mesh: bus, replay buffer, and manager
//! sections, loaded from a TOML file.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::fs;

use crate::agent::AgentKind;
use crate::error::{MeshError, Result};
use crate::manager::COORDINATOR_ID;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshConfig {
    pub bus: BusConfig,
    pub replay: ReplayConfig,
    pub manager: ManagerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Default `send_with_response` timeout in milliseconds.
    pub default_timeout_ms: u64,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplayConfig {
    pub max_size: usize,
    pub priority_levels: usize,
    /// Exponent favoring higher-priority buckets during sampling.
    pub alpha: f64,
    /// Reserved for future priority decay; unused by the core logic.
    pub decay_rate: f64,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            max_size: 10_000,
            priority_levels: 3,
            alpha: 0.6,
            decay_rate: 0.99,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Bound on each agent `shutdown()` await during stop and teardown.
    pub shutdown_timeout_secs: u64,
    /// Agents to start at `initialize()`, keyed by agent id.
    pub agents: HashMap<String, AgentSpec>,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            shutdown_timeout_secs: 30,
            agents: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSpec {
    pub kind: String,
    /// Passed through untouched to the agent constructor.
    #[serde(default = "default_settings")]
    pub settings: Value,
}

impl AgentSpec {
    pub fn new(kind: AgentKind) -> Self {
        Self {
            kind: kind.as_str().to_string(),
            settings: default_settings(),
        }
    }

    pub fn with_settings(mut self, settings: Value) -> Self {
        self.settings = settings;
        self
    }
}

fn default_settings() -> Value {
    Value::Object(serde_json::Map::new())
}

impl MeshConfig {
    pub async fn load(path: &Path) -> Result<Self> {
        let config = if path.exists() {
            let content = fs::read_to_string(path).await?;
            toml::from_str(&content)?
        } else {
            Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        self.validate()?;
        let content = toml::to_string_pretty(self).map_err(|e| MeshError::Config(e.to_string()))?;
        fs::write(path, content).await?;
        Ok(())
    }

    /// Validate configuration values, collecting every violation.
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();

        if self.bus.default_timeout_ms == 0 {
            errors.push("bus.default_timeout_ms must be greater than 0".to_string());
        }

        if self.replay.max_size == 0 {
            errors.push("replay.max_size must be greater than 0".to_string());
        }
        if self.replay.priority_levels == 0 {
            errors.push("replay.priority_levels must be greater than 0".to_string());
        }
        if !self.replay.alpha.is_finite() || self.replay.alpha < 0.0 {
            errors.push("replay.alpha must be a non-negative finite number".to_string());
        }
        if !self.replay.decay_rate.is_finite() || self.replay.decay_rate <= 0.0 {
            errors.push("replay.decay_rate must be a positive finite number".to_string());
        }

        if self.manager.shutdown_timeout_secs == 0 {
            errors.push("manager.shutdown_timeout_secs must be greater than 0".to_string());
        }
        for (id, spec) in &self.manager.agents {
            if id.is_empty() {
                errors.push("manager.agents contains an empty agent id".to_string());
                continue;
            }
            match AgentKind::parse(&spec.kind) {
                None => errors.push(format!(
                    "manager.agents.{id}: unknown agent kind '{}'",
                    spec.kind
                )),
                Some(AgentKind::Coordinator) if id != COORDINATOR_ID => errors.push(format!(
                    "manager.agents.{id}: coordinator kind is reserved for id '{COORDINATOR_ID}'"
                )),
                Some(kind) if id == COORDINATOR_ID && kind != AgentKind::Coordinator => errors
                    .push(format!(
                        "manager.agents.{COORDINATOR_ID}: reserved id must use coordinator kind"
                    )),
                Some(_) => {}
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(MeshError::Config(errors.join("; ")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = MeshConfig::default();
        assert_eq!(config.bus.default_timeout_ms, 30_000);
        assert_eq!(config.replay.max_size, 10_000);
        assert_eq!(config.replay.priority_levels, 3);
        assert!((config.replay.alpha - 0.6).abs() < f64::EPSILON);
        assert_eq!(config.manager.shutdown_timeout_secs, 30);
        assert!(config.manager.agents.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_collects_all_violations() {
        let mut config = MeshConfig::default();
        config.bus.default_timeout_ms = 0;
        config.replay.max_size = 0;
        config.replay.alpha = -1.0;

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("default_timeout_ms"));
        assert!(err.contains("max_size"));
        assert!(err.contains("alpha"));
    }

    #[test]
    fn test_validate_rejects_unknown_kind_and_reserved_id_misuse() {
        let mut config = MeshConfig::default();
        config
            .manager
            .agents
            .insert("checker".into(), AgentSpec {
                kind: "quantum".into(),
                settings: default_settings(),
            });
        config
            .manager
            .agents
            .insert("boss".into(), AgentSpec::new(AgentKind::Coordinator));
        config
            .manager
            .agents
            .insert("mcp".into(), AgentSpec::new(AgentKind::Validation));

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("unknown agent kind 'quantum'"));
        assert!(err.contains("coordinator kind is reserved"));
        assert!(err.contains("reserved id must use coordinator kind"));
    }

    #[tokio::test]
    async fn test_load_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = MeshConfig::load(&dir.path().join("mesh.toml")).await.unwrap();
        assert_eq!(config.replay.priority_levels, 3);
    }

    #[tokio::test]
    async fn test_save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mesh.toml");

        let mut config = MeshConfig::default();
        config.bus.default_timeout_ms = 5_000;
        config.manager.agents.insert(
            "validator".into(),
            AgentSpec::new(AgentKind::Validation)
                .with_settings(serde_json::json!({"strict": true})),
        );
        config.save(&path).await.unwrap();

        let loaded = MeshConfig::load(&path).await.unwrap();
        assert_eq!(loaded.bus.default_timeout_ms, 5_000);
        let spec = &loaded.manager.agents["validator"];
        assert_eq!(spec.kind, "validation");
        assert_eq!(spec.settings["strict"], true);
    }
}
