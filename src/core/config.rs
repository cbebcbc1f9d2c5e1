//! Flow configuration from YAML

use crate::core::{stage::ScriptedStage, Params, SharedHandler, ABORT_INDEX};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::Arc;

/// Top-level flow configuration loaded from YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowConfig {
    /// Flow name
    pub name: String,

    /// Optional description
    #[serde(default)]
    pub description: Option<String>,

    /// Initial parameters of every run
    #[serde(default)]
    pub params: BTreeMap<String, Value>,

    /// Number of concurrent runs to start
    #[serde(default = "default_runs")]
    pub runs: usize,

    /// Stages, in order
    pub stages: Vec<StageConfig>,
}

fn default_runs() -> usize {
    1
}

/// A scripted stage as defined in YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageConfig {
    /// Unique stage name
    pub name: String,

    /// Parameters to set when the stage runs
    #[serde(default)]
    pub set: BTreeMap<String, Value>,

    /// Integer parameter to increment (missing counts as zero)
    #[serde(default)]
    pub increment: Option<String>,

    /// Simulated work before the control call
    #[serde(default)]
    pub delay_ms: Option<u64>,

    /// Error message to attach to the run
    #[serde(default)]
    pub error: Option<String>,

    /// Attach the error with the public classification
    #[serde(default)]
    pub public: bool,

    /// Control call made once the stage is done
    #[serde(default)]
    pub then: Control,

    /// Target stage name when `then` is `jump`
    #[serde(default)]
    pub jump_to: Option<String>,

    /// Turns `repeat` / `jump` into `next` once the bound is reached
    #[serde(default)]
    pub until: Option<UntilConfig>,
}

/// Control call made at the end of a scripted stage
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Control {
    #[default]
    Next,
    Repeat,
    Jump,
    Abort,
}

/// Loop exit condition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UntilConfig {
    /// Integer parameter to check
    pub key: String,

    /// Leave the loop once the parameter is at least this value
    pub at_least: i64,
}

impl FlowConfig {
    /// Load flow configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse flow configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: FlowConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the flow configuration
    pub fn validate(&self) -> Result<()> {
        if self.stages.is_empty() {
            anyhow::bail!("Flow '{}' has no stages", self.name);
        }
        if self.stages.len() >= ABORT_INDEX {
            anyhow::bail!("Flow '{}' has too many stages", self.name);
        }

        // Check that all stage names are unique
        let mut seen = HashSet::new();
        for stage in &self.stages {
            if !seen.insert(&stage.name) {
                anyhow::bail!("Duplicate stage name: {}", stage.name);
            }
        }

        for stage in &self.stages {
            match (stage.then, &stage.jump_to) {
                (Control::Jump, None) => {
                    anyhow::bail!("Stage '{}' jumps but has no jump_to", stage.name);
                }
                (Control::Jump, Some(target)) if !seen.contains(target) => {
                    anyhow::bail!(
                        "Stage '{}' jumps to non-existent stage '{}'",
                        stage.name,
                        target
                    );
                }
                (Control::Jump, Some(_)) => {}
                (_, Some(_)) => {
                    anyhow::bail!("Stage '{}' sets jump_to without jumping", stage.name);
                }
                (_, None) => {}
            }
            if stage.until.is_some() && !matches!(stage.then, Control::Repeat | Control::Jump) {
                anyhow::bail!("Stage '{}' has an until condition but does not loop", stage.name);
            }
        }

        Ok(())
    }

    /// Position of a stage by name
    pub fn stage_index(&self, name: &str) -> Option<usize> {
        self.stages.iter().position(|stage| stage.name == name)
    }

    /// Initial parameters of a run
    pub fn initial_params(&self) -> Params {
        self.params
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }

    /// Build the handlers of the configured stages
    pub fn to_handlers(&self) -> Vec<SharedHandler> {
        self.stages
            .iter()
            .map(|stage| {
                let target = stage
                    .jump_to
                    .as_deref()
                    .and_then(|name| self.stage_index(name));
                Arc::new(ScriptedStage::from_config(stage, target)) as SharedHandler
            })
            .collect()
    }
}
