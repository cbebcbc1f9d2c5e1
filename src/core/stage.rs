//! Scripted stages - handlers described by configuration

use crate::core::{
    config::{Control, StageConfig, UntilConfig},
    Context, ErrorType, Handler,
};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use tokio::time::{sleep, Duration};
use tracing::debug;

/// A handler that applies a fixed script to the run context
#[derive(Debug, Clone)]
pub struct ScriptedStage {
    name: String,
    set: BTreeMap<String, Value>,
    increment: Option<String>,
    delay: Option<Duration>,
    error: Option<(String, ErrorType)>,
    control: Control,
    jump_target: Option<usize>,
    until: Option<UntilConfig>,
}

impl ScriptedStage {
    /// Create a stage from its config; `jump_target` is the resolved index
    /// of `jump_to`
    pub fn from_config(config: &StageConfig, jump_target: Option<usize>) -> Self {
        let kind = if config.public {
            ErrorType::PUBLIC
        } else {
            ErrorType::PRIVATE
        };
        Self {
            name: config.name.clone(),
            set: config.set.clone(),
            increment: config.increment.clone(),
            delay: config.delay_ms.map(Duration::from_millis),
            error: config.error.clone().map(|message| (message, kind)),
            control: config.then,
            jump_target,
            until: config.until.clone(),
        }
    }

    /// The control call to make, once the loop condition is applied
    fn resolve_control(&self, ctx: &Context) -> Control {
        let Some(until) = &self.until else {
            return self.control;
        };
        let current = ctx.get(&until.key).and_then(|v| v.as_i64()).unwrap_or(0);
        if current >= until.at_least {
            Control::Next
        } else {
            self.control
        }
    }
}

#[async_trait]
impl Handler for ScriptedStage {
    async fn handle(&self, ctx: Context) {
        for (key, value) in &self.set {
            ctx.set(key.clone(), value.clone());
        }

        if let Some(key) = &self.increment {
            let current = ctx.get(key).and_then(|v| v.as_i64()).unwrap_or(0);
            ctx.set(key.clone(), current + 1);
        }

        if let Some(delay) = self.delay {
            sleep(delay).await;
        }

        if let Some((message, kind)) = &self.error {
            ctx.error(anyhow::anyhow!("{}", message))
                .set_type(*kind)
                .set_meta(json!({ "stage": self.name }));
        }

        let control = self.resolve_control(&ctx);
        debug!("Stage {} finished with {:?}", self.name, control);
        match control {
            Control::Next => ctx.next(),
            Control::Repeat => ctx.repeat(),
            Control::Jump => match self.jump_target {
                Some(target) => ctx.jump(target),
                None => {
                    ctx.abort_with_error(anyhow::anyhow!(
                        "stage '{}' has no jump target",
                        self.name
                    ));
                }
            },
            Control::Abort => ctx.abort(),
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}
