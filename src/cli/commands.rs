//! CLI command definitions

use clap::Args;
use serde_json::Value;

/// Run a flow
#[derive(Debug, Args, Clone)]
pub struct RunCommand {
    /// Path to flow YAML file
    #[arg(short, long)]
    pub file: String,

    /// Number of concurrent runs (overrides the config)
    #[arg(short, long)]
    pub runs: Option<usize>,

    /// Parameter overrides (key=value, values parsed as JSON when possible)
    #[arg(long, value_parser = parse_key_value)]
    pub param: Vec<(String, String)>,

    /// Give up on runs still active after this many seconds
    #[arg(long, default_value_t = 30)]
    pub timeout_secs: u64,
}

/// Validate a flow configuration
#[derive(Debug, Args, Clone)]
pub struct ValidateCommand {
    /// Path to flow YAML file
    #[arg(short, long)]
    pub file: String,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Parse key=value pairs
pub fn parse_key_value(s: &str) -> Result<(String, String), String> {
    let parts: Vec<&str> = s.splitn(2, '=').collect();
    if parts.len() != 2 {
        return Err(format!("Invalid key=value pair: {}", s));
    }
    Ok((parts[0].to_string(), parts[1].to_string()))
}

/// Interpret a parameter override: JSON if it parses, a plain string otherwise
pub fn param_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}
